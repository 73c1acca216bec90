//! Owner-side state machine.
//!
//! Runs in the primary domain. `start_session` lends the controller's IO
//! memory and interrupt line to the trusted domain and waits until both lends
//! are acknowledged; `end_session` reclaims both and gives the controller back
//! to the local driver.
//!
//! ```text
//! Idle → ResourceAcquired → InterruptDisabled → MemoryLent → MemoryLentAcked
//!      → InterruptLent → AllLentAcked ─(session)─► MemoryReclaimed
//!      → InterruptReclaimed → InterruptEnabled → ResourceReleased → Idle
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

use platform::{
    ResourceClass, ResourceManager, SessionResource, TouchInterrupt, TransferHandle,
};

use crate::config::SessionConfig;
use crate::control::TrustedTouchControl;
use crate::error::{EventCode, SessionError};
use crate::gate::SessionGate;
use crate::notify::{Expect, NotificationInbox};
use crate::state::{OwnerState, SessionState};
use crate::unwind::{abort, OwnerUndo, UndoFailed, Unwind, UnwindReport};

/// Everything the owner touches during a transition. Only reachable through
/// the session gate.
pub(crate) struct OwnerHw<'a, R, B, I> {
    rm: R,
    bus: B,
    irq: I,
    inbox: &'a NotificationInbox,
    memory: Option<TransferHandle>,
    interrupt: Option<TransferHandle>,
}

impl<R, B, I> OwnerHw<'_, R, B, I>
where
    R: ResourceManager,
{
    /// Reclaim the transfer of `class`. The handle is dropped once the
    /// resource manager confirms; on failure it is kept.
    async fn reclaim(&mut self, class: ResourceClass) -> Result<(), UndoFailed> {
        let slot = match class {
            ResourceClass::Memory => &mut self.memory,
            ResourceClass::Interrupt => &mut self.interrupt,
        };
        let Some(handle) = slot.as_ref() else {
            return Ok(());
        };
        if self.rm.reclaim(class, handle).await.is_err() {
            error!("owner: {} reclaim of {} failed", class, handle);
            return Err(UndoFailed);
        }
        let id = handle.id();
        *slot = None;
        self.inbox.retire(class, id);
        debug!("owner: {} {} reclaimed", class, id);
        Ok(())
    }

    /// Reclaim during an abort. The handle is dropped either way.
    async fn reclaim_or_abandon(&mut self, class: ResourceClass) -> Result<(), UndoFailed> {
        let result = self.reclaim(class).await;
        let slot = match class {
            ResourceClass::Memory => &mut self.memory,
            ResourceClass::Interrupt => &mut self.interrupt,
        };
        if let Some(handle) = slot.take() {
            error!("owner: abandoning {} transfer {}", class, handle);
        }
        result
    }
}

impl<R, B, I> Unwind for OwnerHw<'_, R, B, I>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
{
    type State = OwnerState;

    async fn undo(&mut self, action: OwnerUndo) -> Result<(), UndoFailed> {
        match action {
            OwnerUndo::Nothing => Ok(()),
            OwnerUndo::ReleaseResource => self.bus.release().await.map_err(|_| {
                error!("owner: bus release failed");
                UndoFailed
            }),
            OwnerUndo::EnableInterrupt => self.irq.enable().map_err(|_| {
                error!("owner: interrupt enable failed");
                UndoFailed
            }),
            OwnerUndo::ReclaimMemory => self.reclaim_or_abandon(ResourceClass::Memory).await,
            OwnerUndo::ReclaimInterrupt => {
                self.reclaim_or_abandon(ResourceClass::Interrupt).await
            }
        }
    }

    fn settle(&mut self) {
        self.inbox.reset();
    }
}

/// The primary domain's half of the handover.
pub struct OwnerSession<'a, R, B, I> {
    config: SessionConfig,
    inbox: &'a NotificationInbox,
    session: SessionState<OwnerState>,
    gate: SessionGate<OwnerHw<'a, R, B, I>>,
    suspended: AtomicBool,
}

impl<'a, R, B, I> OwnerSession<'a, R, B, I>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
{
    /// Create the owner machine in `Idle`.
    ///
    /// `inbox` must be the sink the resource manager delivers this domain's
    /// notifications to.
    pub fn new(config: SessionConfig, inbox: &'a NotificationInbox, rm: R, bus: B, irq: I) -> Self {
        if inbox.tag() != config.tag() {
            warn!(
                "owner: inbox listens for {}, descriptor is {}",
                inbox.tag(),
                config.tag()
            );
        }
        Self {
            config,
            inbox,
            session: SessionState::new(),
            gate: SessionGate::new(OwnerHw {
                rm,
                bus,
                irq,
                inbox,
                memory: None,
                interrupt: None,
            }),
            suspended: AtomicBool::new(false),
        }
    }

    /// Session flags and state.
    pub fn session(&self) -> &SessionState<OwnerState> {
        &self.session
    }

    /// Current machine state.
    pub fn state(&self) -> OwnerState {
        self.session.state()
    }

    /// Lend memory and interrupt to the trusted domain.
    ///
    /// Returns once both lends are acknowledged. Any failure unwinds to
    /// `Idle` before the error is returned.
    pub async fn start_session(&self) -> Result<(), SessionError> {
        if !self.config.enabled() {
            return Err(SessionError::Unsupported);
        }
        if self.suspended.load(Ordering::Acquire) {
            warn!("owner: device suspended, refusing session");
            return Err(SessionError::InvalidState);
        }
        if self.session.abort_pending() {
            return Err(SessionError::AbortPending);
        }
        if self.session.is_active() {
            return Err(SessionError::Busy);
        }
        let mut hw = self.gate.try_enter(&self.session)?;
        if self.session.state() != OwnerState::Idle {
            return Err(SessionError::InvalidState);
        }

        info!("owner: starting {} session", self.config.tag());
        self.inbox.arm(Expect::ALL);

        match self.lend_all(&mut hw).await {
            Ok(()) => {
                self.session.set_state(OwnerState::AllLentAcked);
                self.session.set_active(true);
                info!("owner: {} lent to trusted domain", self.config.tag());
                Ok(())
            }
            Err((reached, code)) => {
                abort(&mut *hw, &self.session, reached, code).await;
                Err(code.into())
            }
        }
    }

    async fn lend_all(&self, hw: &mut OwnerHw<'a, R, B, I>) -> Result<(), (OwnerState, EventCode)> {
        let descriptor = &self.config.descriptor;

        if hw.bus.acquire().await.is_err() {
            error!("owner: bus acquire failed");
            return Err((OwnerState::Idle, EventCode::LendFailure));
        }
        self.session.set_state(OwnerState::ResourceAcquired);

        if hw.irq.disable().is_err() {
            error!("owner: interrupt disable failed");
            return Err((OwnerState::ResourceAcquired, EventCode::LendFailure));
        }
        if hw.irq.release_contacts().is_err() {
            warn!("owner: could not release active contacts");
        }
        self.session.set_state(OwnerState::InterruptDisabled);

        let Ok(memory) = hw.rm.lend(ResourceClass::Memory, descriptor).await else {
            error!("owner: memory lend failed");
            return Err((OwnerState::InterruptDisabled, EventCode::LendFailure));
        };
        let memory_id = memory.id();
        hw.memory = Some(memory);
        self.session.set_state(OwnerState::MemoryLent);
        if self.inbox.lent().memory {
            self.session.set_state(OwnerState::MemoryLentAcked);
        }

        let Ok(interrupt) = hw.rm.lend(ResourceClass::Interrupt, descriptor).await else {
            error!("owner: interrupt lend failed");
            return Err((self.session.state(), EventCode::LendFailure));
        };
        let interrupt_id = interrupt.id();
        hw.interrupt = Some(interrupt);
        self.session.set_state(OwnerState::InterruptLent);

        self.inbox.wait_lent().await;
        self.inbox.disarm(Expect::LENT);

        let acked_memory = self.inbox.lent_id(ResourceClass::Memory);
        let acked_interrupt = self.inbox.lent_id(ResourceClass::Interrupt);
        if acked_memory != Some(memory_id) || acked_interrupt != Some(interrupt_id) {
            error!(
                "owner: lend acknowledgements do not match transfers {} / {}",
                memory_id, interrupt_id
            );
            return Err((OwnerState::InterruptLent, EventCode::LendNotificationFailure));
        }
        Ok(())
    }

    /// Reclaim memory and interrupt and return the controller to the local driver.
    ///
    /// Runs the pending unwind instead if an abort is pending. A no-op when
    /// no session is open.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        if !self.config.enabled() {
            return Err(SessionError::Unsupported);
        }
        let mut hw = self.gate.try_enter(&self.session)?;

        if let Some(code) = self.session.pending_code() {
            abort(&mut *hw, &self.session, self.session.state(), code).await;
            return Ok(());
        }
        if self.session.state() == OwnerState::Idle {
            info!("owner: no session to end");
            return Ok(());
        }
        if !self.session.is_active() {
            return Err(SessionError::InvalidState);
        }

        let released = self.inbox.released();
        if !released.both() {
            warn!(
                "owner: ending session before all releases (memory: {}, interrupt: {})",
                released.memory, released.interrupt
            );
        }

        match self.reclaim_all(&mut hw).await {
            Ok(()) => {
                self.session.set_state(OwnerState::Idle);
                self.session.set_active(false);
                self.inbox.reset();
                info!("owner: {} reclaimed from trusted domain", self.config.tag());
                Ok(())
            }
            Err(reached) => {
                abort(&mut *hw, &self.session, reached, EventCode::ReclaimFailure).await;
                Err(SessionError::ReclaimFailure)
            }
        }
    }

    async fn reclaim_all(&self, hw: &mut OwnerHw<'a, R, B, I>) -> Result<(), OwnerState> {
        hw.reclaim(ResourceClass::Memory)
            .await
            .map_err(|_| OwnerState::AllLentAcked)?;
        self.session.set_state(OwnerState::MemoryReclaimed);

        hw.reclaim(ResourceClass::Interrupt)
            .await
            .map_err(|_| OwnerState::MemoryReclaimed)?;
        self.session.set_state(OwnerState::InterruptReclaimed);

        if hw.irq.enable().is_err() {
            error!("owner: interrupt enable failed");
            return Err(OwnerState::InterruptReclaimed);
        }
        self.session.set_state(OwnerState::InterruptEnabled);

        if hw.bus.release().await.is_err() {
            error!("owner: bus release failed");
            return Err(OwnerState::InterruptEnabled);
        }
        self.session.set_state(OwnerState::ResourceReleased);
        Ok(())
    }

    /// Abort the session because the bus failed.
    ///
    /// Marks the abort pending at once, so new session requests are refused,
    /// then waits for the gate and unwinds. Returns `None` if another path
    /// already ran the unwind.
    pub async fn report_transport_failure(&self) -> Option<UnwindReport> {
        self.session.raise_abort(EventCode::TransportFailure);
        let mut hw = self.gate.enter(&self.session).await;
        let code = self.session.pending_code()?;
        Some(abort(&mut *hw, &self.session, self.session.state(), code).await)
    }

    /// Power-suspend hook: waits until no session is open or in transition,
    /// then refuses new sessions until [`resume`](Self::resume).
    pub async fn suspend(&self) {
        while self.session.in_transition() || self.session.is_active() {
            debug!("owner: suspend waiting for session to finish");
            self.gate.wait_finished().await;
        }
        self.suspended.store(true, Ordering::Release);
    }

    /// Power-resume hook: waits for an in-flight transition, then allows sessions again.
    pub async fn resume(&self) {
        while self.session.in_transition() {
            self.gate.wait_finished().await;
        }
        self.suspended.store(false, Ordering::Release);
    }

    /// Returns `true` while suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Returns `true` when the local driver may touch the controller.
    pub fn may_access_device(&self) -> bool {
        !self.session.in_transition()
            && !self.session.is_active()
            && self.session.state() == OwnerState::Idle
    }
}

impl<R, B, I> TrustedTouchControl for OwnerSession<'_, R, B, I>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
{
    async fn set_session(&self, active: bool) -> Result<(), SessionError> {
        if active {
            self.start_session().await
        } else {
            self.end_session().await
        }
    }

    fn session_active(&self) -> bool {
        self.session.is_active()
    }

    fn last_event(&self) -> EventCode {
        self.session.last_event()
    }

    fn write_last_event(&self, value: u8) -> Result<(), SessionError> {
        self.session.write_last_event(value)
    }

    fn resource_kind(&self) -> &'static str {
        self.config.tag().as_str()
    }

    async fn wait_event(&self) -> EventCode {
        self.session.wait_event().await
    }
}
