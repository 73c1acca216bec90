//! Session state shared between the foreground path, the notification path
//! and the control surface.
//!
//! The machine state itself only changes while the session gate is held. The
//! flags are atomics so the control surface and the suspend path can read them
//! without taking the gate.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::{EventCode, SessionError};

/// Which side of the handover a machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    /// The domain giving up the device.
    Owner,
    /// The domain receiving it.
    Borrower,
}

impl Side {
    /// Short name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Borrower => "borrower",
        }
    }
}

/// A closed state enumeration stored in a [`SessionState`].
pub trait MachineState: Copy + Eq + 'static {
    /// The initial (and terminal) state.
    const IDLE: Self;
    /// Which side the enumeration belongs to.
    const SIDE: Side;
    /// Every state.
    const ALL: &'static [Self];

    /// Numeric encoding.
    fn as_u8(self) -> u8;

    /// Name used in log lines.
    fn name(self) -> &'static str;

    /// Decode a stored value.
    fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_u8() == raw)
    }
}

// ── Owner states ─────────────────────────────────────────────────────────────

/// States of the owner machine, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OwnerState {
    /// No session; the owner drives the controller.
    Idle = 0,
    /// Bus and power held for the session.
    ResourceAcquired = 1,
    /// Local interrupt delivery masked.
    InterruptDisabled = 2,
    /// Memory lend issued.
    MemoryLent = 3,
    /// Memory lend acknowledged.
    MemoryLentAcked = 4,
    /// Interrupt lend issued.
    InterruptLent = 5,
    /// Both lends acknowledged; the borrower may run the session.
    AllLentAcked = 6,
    /// Memory taken back.
    MemoryReclaimed = 7,
    /// Interrupt taken back.
    InterruptReclaimed = 8,
    /// Local interrupt delivery restored.
    InterruptEnabled = 9,
    /// Bus and power released.
    ResourceReleased = 10,
}

impl OwnerState {
    /// Short name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResourceAcquired => "resource-acquired",
            Self::InterruptDisabled => "interrupt-disabled",
            Self::MemoryLent => "memory-lent",
            Self::MemoryLentAcked => "memory-lent-acked",
            Self::InterruptLent => "interrupt-lent",
            Self::AllLentAcked => "all-lent-acked",
            Self::MemoryReclaimed => "memory-reclaimed",
            Self::InterruptReclaimed => "interrupt-reclaimed",
            Self::InterruptEnabled => "interrupt-enabled",
            Self::ResourceReleased => "resource-released",
        }
    }
}

impl MachineState for OwnerState {
    const IDLE: Self = Self::Idle;
    const SIDE: Side = Side::Owner;
    const ALL: &'static [Self] = &[
        Self::Idle,
        Self::ResourceAcquired,
        Self::InterruptDisabled,
        Self::MemoryLent,
        Self::MemoryLentAcked,
        Self::InterruptLent,
        Self::AllLentAcked,
        Self::MemoryReclaimed,
        Self::InterruptReclaimed,
        Self::InterruptEnabled,
        Self::ResourceReleased,
    ];

    fn as_u8(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for OwnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Borrower states ──────────────────────────────────────────────────────────

/// States of the borrower machine, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BorrowerState {
    /// Waiting for an offer.
    Idle = 0,
    /// Both lend notifications observed.
    AllLentNotified = 1,
    /// Memory accepted.
    MemoryAccepted = 2,
    /// Own bus and power acquired.
    SessionResourceAcquired = 3,
    /// Interrupt accepted.
    InterruptAccepted = 4,
    /// Interrupt delivery enabled; the session is running.
    InterruptEnabled = 5,
    /// Interrupt delivery disabled for teardown.
    InterruptDisabled = 6,
    /// Interrupt released to the owner.
    InterruptReleased = 7,
    /// Own bus and power released.
    SessionResourceReleased = 8,
}

impl BorrowerState {
    /// Short name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AllLentNotified => "all-lent-notified",
            Self::MemoryAccepted => "memory-accepted",
            Self::SessionResourceAcquired => "session-resource-acquired",
            Self::InterruptAccepted => "interrupt-accepted",
            Self::InterruptEnabled => "interrupt-enabled",
            Self::InterruptDisabled => "interrupt-disabled",
            Self::InterruptReleased => "interrupt-released",
            Self::SessionResourceReleased => "session-resource-released",
        }
    }

    /// Returns `true` once memory has been accepted and not yet released.
    #[must_use]
    pub fn holds_memory(self) -> bool {
        self.as_u8() >= Self::MemoryAccepted.as_u8()
    }
}

impl MachineState for BorrowerState {
    const IDLE: Self = Self::Idle;
    const SIDE: Side = Side::Borrower;
    const ALL: &'static [Self] = &[
        Self::Idle,
        Self::AllLentNotified,
        Self::MemoryAccepted,
        Self::SessionResourceAcquired,
        Self::InterruptAccepted,
        Self::InterruptEnabled,
        Self::InterruptDisabled,
        Self::InterruptReleased,
        Self::SessionResourceReleased,
    ];

    fn as_u8(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for BorrowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Session state ────────────────────────────────────────────────────────────

/// Per-side session state: the machine state plus the session flags.
///
/// `active` is only true in the fully transferred state. `in_transition` is
/// only true while a transition holds the session gate.
pub struct SessionState<S> {
    state: AtomicU8,
    in_transition: AtomicBool,
    active: AtomicBool,
    abort_pending: AtomicBool,
    pending_code: AtomicU8,
    last_event: AtomicU8,
    event: Signal<CriticalSectionRawMutex, EventCode>,
    _state: PhantomData<S>,
}

impl<S: MachineState> Default for SessionState<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MachineState> SessionState<S> {
    /// Idle, inactive, nothing pending.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            in_transition: AtomicBool::new(false),
            active: AtomicBool::new(false),
            abort_pending: AtomicBool::new(false),
            pending_code: AtomicU8::new(0),
            last_event: AtomicU8::new(0),
            event: Signal::new(),
            _state: PhantomData,
        }
    }

    /// Current machine state.
    pub fn state(&self) -> S {
        S::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(S::IDLE)
    }

    pub(crate) fn set_state(&self, next: S) {
        let prev = self.state.swap(next.as_u8(), Ordering::AcqRel);
        trace!(
            "{}: {} -> {}",
            S::SIDE.as_str(),
            S::from_u8(prev).map_or("?", MachineState::name),
            next.name()
        );
    }

    /// Returns `true` while a session is fully established.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Returns `true` while a transition holds the session gate.
    pub fn in_transition(&self) -> bool {
        self.in_transition.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_transition(&self, value: bool) {
        self.in_transition.store(value, Ordering::Release);
    }

    /// Returns `true` while an abort is waiting to be unwound.
    pub fn abort_pending(&self) -> bool {
        self.abort_pending.load(Ordering::Acquire)
    }

    /// Mark an abort as pending with `code`. The first code raised wins.
    pub(crate) fn raise_abort(&self, code: EventCode) {
        if !self.abort_pending.swap(true, Ordering::AcqRel) {
            self.pending_code.store(code as u8, Ordering::Release);
        }
    }

    /// Code of the pending abort, if any.
    pub(crate) fn pending_code(&self) -> Option<EventCode> {
        self.abort_pending()
            .then(|| EventCode::from_u8(self.pending_code.load(Ordering::Acquire)))
    }

    pub(crate) fn clear_abort(&self) {
        self.pending_code.store(0, Ordering::Release);
        self.abort_pending.store(false, Ordering::Release);
    }

    /// Most recent abort reason, until cleared.
    pub fn last_event(&self) -> EventCode {
        EventCode::from_u8(self.last_event.load(Ordering::Acquire))
    }

    /// Publish an abort reason and wake any [`wait_event`](Self::wait_event) caller.
    pub(crate) fn publish(&self, code: EventCode) {
        self.last_event.store(code as u8, Ordering::Release);
        self.event.signal(code);
    }

    /// Control-surface write: `0` clears the last event, anything else is rejected.
    pub fn write_last_event(&self, value: u8) -> Result<(), SessionError> {
        if value != 0 {
            return Err(SessionError::InvalidValue);
        }
        self.last_event.store(0, Ordering::Release);
        Ok(())
    }

    /// Wait for the next published abort reason.
    pub async fn wait_event(&self) -> EventCode {
        self.event.wait().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_encoding_is_dense_and_unique() {
        for (i, state) in OwnerState::ALL.iter().enumerate() {
            assert_eq!(usize::from(state.as_u8()), i);
            assert_eq!(OwnerState::from_u8(state.as_u8()), Some(*state));
        }
        for (i, state) in BorrowerState::ALL.iter().enumerate() {
            assert_eq!(usize::from(state.as_u8()), i);
            assert_eq!(BorrowerState::from_u8(state.as_u8()), Some(*state));
        }
    }

    #[test]
    fn test_first_abort_code_wins() {
        let s = SessionState::<OwnerState>::new();
        assert_eq!(s.pending_code(), None);
        s.raise_abort(EventCode::TransportFailure);
        s.raise_abort(EventCode::ReclaimFailure);
        assert_eq!(s.pending_code(), Some(EventCode::TransportFailure));
        s.clear_abort();
        assert!(!s.abort_pending());
    }

    #[test]
    fn test_last_event_write_semantics() {
        let s = SessionState::<BorrowerState>::new();
        s.publish(EventCode::AcceptFailure);
        assert_eq!(s.write_last_event(3), Err(SessionError::InvalidValue));
        assert_eq!(s.last_event(), EventCode::AcceptFailure);
        s.write_last_event(0).unwrap();
        assert_eq!(s.last_event(), EventCode::None);
    }

    #[test]
    fn test_published_event_wakes_waiter() {
        let s = SessionState::<OwnerState>::new();
        s.publish(EventCode::LendFailure);
        let code = embassy_futures::block_on(s.wait_event());
        assert_eq!(code, EventCode::LendFailure);
    }

    #[test]
    fn test_borrower_memory_ownership_by_state() {
        assert!(!BorrowerState::AllLentNotified.holds_memory());
        assert!(BorrowerState::MemoryAccepted.holds_memory());
        assert!(BorrowerState::SessionResourceReleased.holds_memory());
    }
}
