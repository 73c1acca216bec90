//! Mock implementations for testing
//!
//! Host-side stand-ins for every platform trait. Each mock is a cheap clone
//! over shared state: hand one clone to the code under test and keep another
//! to inspect counters or inject failures afterwards.

#![cfg(any(test, feature = "std"))]

mod fabric;

pub use fabric::{Domain, LoopbackClient, LoopbackFabric, MockRmError, RmCall, RmOp};

use std::cell::RefCell;
use std::rc::Rc;

use crate::irq::TouchInterrupt;
use crate::power::SessionResource;
use crate::reset::ControllerReset;

/// Error returned by the hardware mocks when a failure is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockFault;

// ── Bus / power ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BusState {
    held: bool,
    acquires: u32,
    releases: u32,
    fail_acquire: bool,
    fail_release: bool,
}

/// Mock session resource (bus + power handle).
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Rc<RefCell<BusState>>,
}

impl MockBus {
    /// Create a released bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while acquired.
    pub fn held(&self) -> bool {
        self.state.borrow().held
    }

    /// Number of successful acquires.
    pub fn acquires(&self) -> u32 {
        self.state.borrow().acquires
    }

    /// Number of successful releases.
    pub fn releases(&self) -> u32 {
        self.state.borrow().releases
    }

    /// Make `acquire` fail.
    pub fn fail_acquire(&self, fail: bool) {
        self.state.borrow_mut().fail_acquire = fail;
    }

    /// Make `release` fail.
    pub fn fail_release(&self, fail: bool) {
        self.state.borrow_mut().fail_release = fail;
    }
}

impl SessionResource for MockBus {
    type Error = MockFault;

    async fn acquire(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_acquire {
            return Err(MockFault);
        }
        state.held = true;
        state.acquires = state.acquires.saturating_add(1);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_release {
            return Err(MockFault);
        }
        state.held = false;
        state.releases = state.releases.saturating_add(1);
        Ok(())
    }
}

// ── Interrupt ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct IrqState {
    enabled: bool,
    enables: u32,
    disables: u32,
    contact_releases: u32,
    fail_enable: bool,
    fail_disable: bool,
}

/// Mock touch interrupt line.
#[derive(Debug, Clone, Default)]
pub struct MockIrq {
    state: Rc<RefCell<IrqState>>,
}

impl MockIrq {
    /// Create an interrupt line, initially enabled or masked.
    pub fn new(enabled: bool) -> Self {
        let irq = Self::default();
        irq.state.borrow_mut().enabled = enabled;
        irq
    }

    /// Returns `true` while unmasked.
    pub fn enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    /// Number of successful `enable` calls.
    pub fn enables(&self) -> u32 {
        self.state.borrow().enables
    }

    /// Number of successful `disable` calls.
    pub fn disables(&self) -> u32 {
        self.state.borrow().disables
    }

    /// Number of `release_contacts` calls.
    pub fn contact_releases(&self) -> u32 {
        self.state.borrow().contact_releases
    }

    /// Make `enable` fail.
    pub fn fail_enable(&self, fail: bool) {
        self.state.borrow_mut().fail_enable = fail;
    }

    /// Make `disable` fail.
    pub fn fail_disable(&self, fail: bool) {
        self.state.borrow_mut().fail_disable = fail;
    }
}

impl TouchInterrupt for MockIrq {
    type Error = MockFault;

    fn enable(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_enable {
            return Err(MockFault);
        }
        state.enabled = true;
        state.enables = state.enables.saturating_add(1);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_disable {
            return Err(MockFault);
        }
        state.enabled = false;
        state.disables = state.disables.saturating_add(1);
        Ok(())
    }

    fn release_contacts(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        state.contact_releases = state.contact_releases.saturating_add(1);
        Ok(())
    }
}

// ── Reset ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ResetState {
    resets: u32,
    fail: bool,
}

/// Mock controller reset line.
#[derive(Debug, Clone, Default)]
pub struct MockReset {
    state: Rc<RefCell<ResetState>>,
}

impl MockReset {
    /// Create a reset line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reset pulses issued.
    pub fn resets(&self) -> u32 {
        self.state.borrow().resets
    }

    /// Make `reset_controller` fail.
    pub fn fail(&self, fail: bool) {
        self.state.borrow_mut().fail = fail;
    }
}

impl ControllerReset for MockReset {
    type Error = MockFault;

    async fn reset_controller(&mut self) -> Result<(), MockFault> {
        let mut state = self.state.borrow_mut();
        state.resets = state.resets.saturating_add(1);
        if state.fail {
            return Err(MockFault);
        }
        Ok(())
    }
}
