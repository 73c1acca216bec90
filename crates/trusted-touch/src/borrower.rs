//! Borrower-side state machine.
//!
//! Runs in the trusted domain. Once both lend notifications have arrived the
//! offer is checked against the local descriptor, then memory, the local bus
//! and the interrupt are taken over. Teardown gives everything back in
//! reverse.
//!
//! ```text
//! Idle → AllLentNotified → MemoryAccepted → SessionResourceAcquired
//!      → InterruptAccepted → InterruptEnabled ─(session)─► InterruptDisabled
//!      → InterruptReleased → SessionResourceReleased → Idle
//! ```

use platform::{
    ControllerReset, ResourceClass, ResourceManager, SessionResource, TouchInterrupt,
    TransferHandle,
};

use crate::config::SessionConfig;
use crate::control::TrustedTouchControl;
use crate::error::{EventCode, SessionError};
use crate::gate::SessionGate;
use crate::notify::{Expect, NotificationInbox, Offered};
use crate::state::{BorrowerState, SessionState};
use crate::unwind::{abort, BorrowerUndo, UndoFailed, Unwind, UnwindReport};

pub(crate) struct BorrowerHw<'a, R, B, I, X> {
    rm: R,
    bus: B,
    irq: I,
    reset: X,
    inbox: &'a NotificationInbox,
    memory: Option<TransferHandle>,
    interrupt: Option<TransferHandle>,
}

impl<R, B, I, X> BorrowerHw<'_, R, B, I, X>
where
    R: ResourceManager,
{
    /// Release the accepted transfer of `class` back to the owner.
    async fn release(&mut self, class: ResourceClass) -> Result<(), UndoFailed> {
        let slot = match class {
            ResourceClass::Memory => &mut self.memory,
            ResourceClass::Interrupt => &mut self.interrupt,
        };
        let Some(handle) = slot.as_ref() else {
            return Ok(());
        };
        if self.rm.release(class, handle).await.is_err() {
            error!("borrower: {} release of {} failed", class, handle);
            return Err(UndoFailed);
        }
        let id = handle.id();
        *slot = None;
        self.inbox.retire(class, id);
        debug!("borrower: {} {} released", class, id);
        Ok(())
    }

    async fn release_or_abandon(&mut self, class: ResourceClass) -> Result<(), UndoFailed> {
        let result = self.release(class).await;
        let slot = match class {
            ResourceClass::Memory => &mut self.memory,
            ResourceClass::Interrupt => &mut self.interrupt,
        };
        if let Some(handle) = slot.take() {
            error!("borrower: abandoning {} transfer {}", class, handle);
        }
        result
    }
}

impl<R, B, I, X> Unwind for BorrowerHw<'_, R, B, I, X>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
{
    type State = BorrowerState;

    async fn undo(&mut self, action: BorrowerUndo) -> Result<(), UndoFailed> {
        match action {
            BorrowerUndo::Nothing => Ok(()),
            BorrowerUndo::DiscardOffer => {
                self.inbox.discard_lent();
                Ok(())
            }
            BorrowerUndo::ReleaseMemory => self.release_or_abandon(ResourceClass::Memory).await,
            BorrowerUndo::ReleaseSessionResource => self.bus.release().await.map_err(|_| {
                error!("borrower: bus release failed");
                UndoFailed
            }),
            BorrowerUndo::ReleaseInterrupt => {
                self.release_or_abandon(ResourceClass::Interrupt).await
            }
            BorrowerUndo::DisableInterrupt => self.irq.disable().map_err(|_| {
                error!("borrower: interrupt disable failed");
                UndoFailed
            }),
        }
    }

    fn settle(&mut self) {
        self.inbox.arm(Expect::LENT);
    }
}

/// The trusted domain's half of the handover.
pub struct BorrowerSession<'a, R, B, I, X> {
    config: SessionConfig,
    inbox: &'a NotificationInbox,
    session: SessionState<BorrowerState>,
    gate: SessionGate<BorrowerHw<'a, R, B, I, X>>,
}

impl<'a, R, B, I, X> BorrowerSession<'a, R, B, I, X>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
    X: ControllerReset,
{
    /// Create the borrower machine in `Idle`, listening for lend notifications.
    pub fn new(
        config: SessionConfig,
        inbox: &'a NotificationInbox,
        rm: R,
        bus: B,
        irq: I,
        reset: X,
    ) -> Self {
        inbox.arm(Expect::LENT);
        Self {
            config,
            inbox,
            session: SessionState::new(),
            gate: SessionGate::new(BorrowerHw {
                rm,
                bus,
                irq,
                reset,
                inbox,
                memory: None,
                interrupt: None,
            }),
        }
    }

    /// Session flags and state.
    pub fn session(&self) -> &SessionState<BorrowerState> {
        &self.session
    }

    /// Current machine state.
    pub fn state(&self) -> BorrowerState {
        self.session.state()
    }

    /// Validate the offer and take over memory, bus and interrupt.
    ///
    /// Returns `NotificationsPending` without touching anything until both
    /// lend notifications have arrived. A mismatching offer aborts before any
    /// accept is issued.
    pub async fn on_all_resources_offered(&self) -> Result<(), SessionError> {
        if !self.config.enabled() {
            return Err(SessionError::Unsupported);
        }
        if self.session.abort_pending() {
            return Err(SessionError::AbortPending);
        }
        if self.session.is_active() {
            return Err(SessionError::Busy);
        }
        let lent = self.inbox.lent();
        if !lent.both() {
            debug!(
                "borrower: offer incomplete (memory: {}, interrupt: {})",
                lent.memory, lent.interrupt
            );
            return Err(SessionError::NotificationsPending);
        }

        let mut hw = self.gate.try_enter(&self.session)?;
        if self.session.state() != BorrowerState::Idle {
            return Err(SessionError::InvalidState);
        }
        let Some(offer) = self.inbox.take_offer() else {
            return Err(SessionError::NotificationsPending);
        };
        self.session.set_state(BorrowerState::AllLentNotified);

        if !self.config.descriptor.matches_offer(&offer.regions, offer.irq) {
            error!(
                "borrower: offer ({} region(s), {}) does not match descriptor",
                offer.regions.len(),
                offer.irq
            );
            abort(
                &mut *hw,
                &self.session,
                BorrowerState::AllLentNotified,
                EventCode::FunctionalFailure,
            )
            .await;
            return Err(SessionError::FunctionalFailure);
        }

        match self.accept_all(&mut hw, &offer).await {
            Ok(()) => {
                self.session.set_active(true);
                info!("borrower: {} session running", self.config.tag());
                Ok(())
            }
            Err(reached) => {
                abort(&mut *hw, &self.session, reached, EventCode::AcceptFailure).await;
                Err(SessionError::AcceptFailure)
            }
        }
    }

    async fn accept_all(
        &self,
        hw: &mut BorrowerHw<'a, R, B, I, X>,
        offer: &Offered,
    ) -> Result<(), BorrowerState> {
        let descriptor = &self.config.descriptor;

        let Ok(memory) = hw
            .rm
            .accept(ResourceClass::Memory, offer.memory, descriptor)
            .await
        else {
            error!("borrower: memory accept of {} failed", offer.memory);
            return Err(BorrowerState::AllLentNotified);
        };
        hw.memory = Some(memory);
        self.session.set_state(BorrowerState::MemoryAccepted);

        if hw.bus.acquire().await.is_err() {
            error!("borrower: bus acquire failed");
            return Err(BorrowerState::MemoryAccepted);
        }
        self.session.set_state(BorrowerState::SessionResourceAcquired);

        let Ok(interrupt) = hw
            .rm
            .accept(ResourceClass::Interrupt, offer.interrupt, descriptor)
            .await
        else {
            error!("borrower: interrupt accept of {} failed", offer.interrupt);
            return Err(BorrowerState::SessionResourceAcquired);
        };
        hw.interrupt = Some(interrupt);
        self.session.set_state(BorrowerState::InterruptAccepted);

        if hw.irq.enable().is_err() {
            error!("borrower: interrupt enable failed");
            return Err(BorrowerState::InterruptAccepted);
        }
        self.session.set_state(BorrowerState::InterruptEnabled);
        Ok(())
    }

    /// Wait for both lend notifications, then run
    /// [`on_all_resources_offered`](Self::on_all_resources_offered).
    pub async fn wait_and_accept(&self) -> Result<(), SessionError> {
        self.inbox.wait_lent().await;
        self.on_all_resources_offered().await
    }

    /// Give interrupt, bus and memory back and return to `Idle`.
    ///
    /// Runs the pending unwind instead if an abort is pending. A no-op when
    /// no session is running.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        if !self.config.enabled() {
            return Err(SessionError::Unsupported);
        }
        let mut hw = self.gate.try_enter(&self.session)?;

        if let Some(code) = self.session.pending_code() {
            abort(&mut *hw, &self.session, self.session.state(), code).await;
            return Ok(());
        }
        if !self.session.is_active() {
            info!("borrower: no session to tear down");
            return Ok(());
        }

        match self.release_all(&mut hw).await {
            Ok(()) => {
                self.session.set_state(BorrowerState::Idle);
                self.session.set_active(false);
                self.inbox.discard_lent();
                self.inbox.arm(Expect::LENT);
                info!("borrower: {} returned to owner", self.config.tag());
                Ok(())
            }
            Err(reached) => {
                abort(&mut *hw, &self.session, reached, EventCode::ReleaseFailure).await;
                Err(SessionError::ReleaseFailure)
            }
        }
    }

    async fn release_all(&self, hw: &mut BorrowerHw<'a, R, B, I, X>) -> Result<(), BorrowerState> {
        if hw.irq.disable().is_err() {
            error!("borrower: interrupt disable failed");
            return Err(BorrowerState::InterruptEnabled);
        }
        self.session.set_state(BorrowerState::InterruptDisabled);

        hw.release(ResourceClass::Interrupt)
            .await
            .map_err(|_| BorrowerState::InterruptDisabled)?;
        self.session.set_state(BorrowerState::InterruptReleased);

        if hw.bus.release().await.is_err() {
            error!("borrower: bus release failed");
            return Err(BorrowerState::InterruptReleased);
        }
        self.session.set_state(BorrowerState::SessionResourceReleased);

        hw.release(ResourceClass::Memory)
            .await
            .map_err(|_| BorrowerState::SessionResourceReleased)
    }

    /// Abort the session because the bus failed.
    ///
    /// Resets the controller first if its memory is held, so the owner gets
    /// it back in a known state. Returns `None` if another path already ran
    /// the unwind.
    pub async fn report_transport_failure(&self) -> Option<UnwindReport> {
        self.session.raise_abort(EventCode::TransportFailure);
        let mut hw = self.gate.enter(&self.session).await;
        let code = self.session.pending_code()?;
        let reached = self.session.state();
        if reached.holds_memory() {
            warn!("borrower: resetting touch controller");
            if hw.reset.reset_controller().await.is_err() {
                error!("borrower: controller reset failed");
            }
        }
        Some(abort(&mut *hw, &self.session, reached, code).await)
    }
}

impl<R, B, I, X> TrustedTouchControl for BorrowerSession<'_, R, B, I, X>
where
    R: ResourceManager,
    B: SessionResource,
    I: TouchInterrupt,
    X: ControllerReset,
{
    async fn set_session(&self, active: bool) -> Result<(), SessionError> {
        if active {
            self.on_all_resources_offered().await
        } else {
            self.teardown().await
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
