//! Abort/Unwind Controller
//!
//! Each side has one unwind table: for every state, the single action that
//! undoes it and the state reached afterwards. Aborting from state `S` walks
//! the links from `S` to `Idle`, running every undo action on the way. Failed
//! undo actions are counted and logged but never stop the walk; the contract
//! is "always reach Idle".
//!
//! ```text
//! reached ──undo──► next ──undo──► next ── … ──► Idle
//!                                                 │
//!                      clear active / abort-pending, publish event code
//! ```

use crate::error::EventCode;
use crate::state::{BorrowerState, MachineState, OwnerState, SessionState};

/// One row of an unwind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindStep<S, U> {
    /// State being unwound.
    pub state: S,
    /// Action that undoes it.
    pub undo: U,
    /// State after the action.
    pub next: S,
}

/// A machine state with an unwind table.
pub trait UnwindTable: MachineState {
    /// Undo action type.
    type Undo: Copy + Eq + 'static;

    /// The action that does nothing.
    const NOTHING: Self::Undo;

    /// One row per state.
    const TABLE: &'static [UnwindStep<Self, Self::Undo>];

    /// Name of an undo action for log lines.
    fn undo_name(undo: Self::Undo) -> &'static str;

    /// Row for this state.
    fn step(self) -> Option<&'static UnwindStep<Self, Self::Undo>> {
        Self::TABLE.iter().find(|row| row.state == self)
    }
}

/// An undo action failed. The reason has already been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoFailed;

/// Something that can run the undo actions of one side.
pub trait Unwind {
    /// The side's state enumeration.
    type State: UnwindTable;

    /// Run one undo action.
    async fn undo(&mut self, action: <Self::State as UnwindTable>::Undo) -> Result<(), UndoFailed>;

    /// Called once `Idle` is reached, before flags are cleared.
    fn settle(&mut self) {}
}

/// Result of one abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnwindReport {
    /// Code published for the abort.
    pub code: EventCode,
    /// Undo actions run (excluding no-ops).
    pub undone: u8,
    /// Undo actions that failed.
    pub failed: u8,
}

/// Unwind `target` from `reached` to `Idle` and publish `code`.
///
/// Must be called with the session gate held. Raises `abort_pending` for the
/// duration of the walk and clears it, together with `active`, afterwards.
pub async fn abort<U: Unwind>(
    target: &mut U,
    session: &SessionState<U::State>,
    reached: U::State,
    code: EventCode,
) -> UnwindReport {
    session.raise_abort(code);
    warn!(
        "{} abort from {}: {}",
        <U::State as MachineState>::SIDE.as_str(),
        reached.name(),
        code
    );

    let mut report = UnwindReport {
        code,
        undone: 0,
        failed: 0,
    };
    let mut state = reached;
    // Bounded by the table size so a malformed table cannot loop forever.
    for _ in 0..<U::State as UnwindTable>::TABLE.len() {
        if state == <U::State as MachineState>::IDLE {
            break;
        }
        let Some(row) = state.step() else {
            error!("no unwind step for {}", state.name());
            break;
        };
        if row.undo != <U::State as UnwindTable>::NOTHING {
            report.undone = report.undone.saturating_add(1);
            if target.undo(row.undo).await.is_err() {
                report.failed = report.failed.saturating_add(1);
                warn!(
                    "undo {} failed in {}, continuing",
                    <U::State as UnwindTable>::undo_name(row.undo),
                    state.name()
                );
            }
        }
        session.set_state(row.next);
        state = row.next;
    }

    session.set_state(<U::State as MachineState>::IDLE);
    target.settle();
    session.set_active(false);
    session.clear_abort();
    session.publish(code);
    info!(
        "{} unwound: {} undo action(s), {} failed",
        <U::State as MachineState>::SIDE.as_str(),
        report.undone,
        report.failed
    );
    report
}

// ── Owner table ──────────────────────────────────────────────────────────────

/// Undo actions of the owner machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OwnerUndo {
    /// Nothing to undo.
    Nothing,
    /// Release the bus and power handle.
    ReleaseResource,
    /// Re-enable local interrupt delivery.
    EnableInterrupt,
    /// Reclaim the memory transfer.
    ReclaimMemory,
    /// Reclaim the interrupt transfer.
    ReclaimInterrupt,
}

impl UnwindTable for OwnerState {
    type Undo = OwnerUndo;

    const NOTHING: OwnerUndo = OwnerUndo::Nothing;

    #[rustfmt::skip]
    const TABLE: &'static [UnwindStep<Self, OwnerUndo>] = &[
        UnwindStep { state: Self::ResourceReleased, undo: OwnerUndo::Nothing, next: Self::Idle },
        UnwindStep { state: Self::InterruptEnabled, undo: OwnerUndo::Nothing, next: Self::ResourceAcquired },
        UnwindStep { state: Self::InterruptReclaimed, undo: OwnerUndo::Nothing, next: Self::InterruptDisabled },
        UnwindStep { state: Self::MemoryReclaimed, undo: OwnerUndo::ReclaimInterrupt, next: Self::InterruptDisabled },
        UnwindStep { state: Self::AllLentAcked, undo: OwnerUndo::Nothing, next: Self::InterruptLent },
        UnwindStep { state: Self::InterruptLent, undo: OwnerUndo::ReclaimInterrupt, next: Self::MemoryLentAcked },
        UnwindStep { state: Self::MemoryLentAcked, undo: OwnerUndo::Nothing, next: Self::MemoryLent },
        UnwindStep { state: Self::MemoryLent, undo: OwnerUndo::ReclaimMemory, next: Self::InterruptDisabled },
        UnwindStep { state: Self::InterruptDisabled, undo: OwnerUndo::EnableInterrupt, next: Self::ResourceAcquired },
        UnwindStep { state: Self::ResourceAcquired, undo: OwnerUndo::ReleaseResource, next: Self::Idle },
        UnwindStep { state: Self::Idle, undo: OwnerUndo::Nothing, next: Self::Idle },
    ];

    fn undo_name(undo: OwnerUndo) -> &'static str {
        match undo {
            OwnerUndo::Nothing => "nothing",
            OwnerUndo::ReleaseResource => "release-resource",
            OwnerUndo::EnableInterrupt => "enable-interrupt",
            OwnerUndo::ReclaimMemory => "reclaim-memory",
            OwnerUndo::ReclaimInterrupt => "reclaim-interrupt",
        }
    }
}

// ── Borrower table ───────────────────────────────────────────────────────────

/// Undo actions of the borrower machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BorrowerUndo {
    /// Nothing to undo.
    Nothing,
    /// Forget the offer and wait for a new one.
    DiscardOffer,
    /// Release the memory transfer to the owner.
    ReleaseMemory,
    /// Release the borrower's own bus and power handle.
    ReleaseSessionResource,
    /// Release the interrupt transfer to the owner.
    ReleaseInterrupt,
    /// Mask interrupt delivery on the borrower.
    DisableInterrupt,
}

impl UnwindTable for BorrowerState {
    type Undo = BorrowerUndo;

    const NOTHING: BorrowerUndo = BorrowerUndo::Nothing;

    #[rustfmt::skip]
    const TABLE: &'static [UnwindStep<Self, BorrowerUndo>] = &[
        UnwindStep { state: Self::InterruptEnabled, undo: BorrowerUndo::DisableInterrupt, next: Self::InterruptAccepted },
        UnwindStep { state: Self::InterruptAccepted, undo: BorrowerUndo::ReleaseInterrupt, next: Self::SessionResourceAcquired },
        UnwindStep { state: Self::InterruptDisabled, undo: BorrowerUndo::ReleaseInterrupt, next: Self::SessionResourceAcquired },
        UnwindStep { state: Self::SessionResourceAcquired, undo: BorrowerUndo::ReleaseSessionResource, next: Self::MemoryAccepted },
        UnwindStep { state: Self::InterruptReleased, undo: BorrowerUndo::ReleaseSessionResource, next: Self::MemoryAccepted },
        UnwindStep { state: Self::MemoryAccepted, undo: BorrowerUndo::ReleaseMemory, next: Self::AllLentNotified },
        UnwindStep { state: Self::SessionResourceReleased, undo: BorrowerUndo::ReleaseMemory, next: Self::AllLentNotified },
        UnwindStep { state: Self::AllLentNotified, undo: BorrowerUndo::DiscardOffer, next: Self::Idle },
        UnwindStep { state: Self::Idle, undo: BorrowerUndo::Nothing, next: Self::Idle },
    ];

    fn undo_name(undo: BorrowerUndo) -> &'static str {
        match undo {
            BorrowerUndo::Nothing => "nothing",
            BorrowerUndo::DiscardOffer => "discard-offer",
            BorrowerUndo::ReleaseMemory => "release-memory",
            BorrowerUndo::ReleaseSessionResource => "release-session-resource",
            BorrowerUndo::ReleaseInterrupt => "release-interrupt",
            BorrowerUndo::DisableInterrupt => "disable-interrupt",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    /// Records undo actions; optionally fails all of them.
    struct Recorder<S: UnwindTable> {
        done: Vec<S::Undo>,
        fail: bool,
        settled: bool,
    }

    impl<S: UnwindTable> Recorder<S> {
        fn new(fail: bool) -> Self {
            Self {
                done: Vec::new(),
                fail,
                settled: false,
            }
        }
    }

    impl<S: UnwindTable> Unwind for Recorder<S> {
        type State = S;

        async fn undo(&mut self, action: S::Undo) -> Result<(), UndoFailed> {
            self.done.push(action);
            if self.fail {
                Err(UndoFailed)
            } else {
                Ok(())
            }
        }

        fn settle(&mut self) {
            self.settled = true;
        }
    }

    fn table_is_complete<S: UnwindTable>() {
        for state in S::ALL {
            let rows = S::TABLE.iter().filter(|r| r.state == *state).count();
            assert_eq!(rows, 1, "{} must have exactly one unwind step", state.name());
        }
        assert_eq!(S::TABLE.len(), S::ALL.len());
    }

    #[test]
    fn test_tables_cover_every_state_once() {
        table_is_complete::<OwnerState>();
        table_is_complete::<BorrowerState>();
    }

    #[test]
    fn test_idle_unwind_is_a_noop() {
        let session = SessionState::<OwnerState>::new();
        let mut target = Recorder::<OwnerState>::new(false);
        let report = embassy_futures::block_on(abort(
            &mut target,
            &session,
            OwnerState::Idle,
            EventCode::LendFailure,
        ));
        assert!(target.done.is_empty());
        assert_eq!(report.undone, 0);
        assert_eq!(session.last_event(), EventCode::LendFailure);
        assert!(!session.abort_pending());
    }

    #[test]
    fn test_owner_unwind_from_all_lent_reverses_lend_sequence() {
        let session = SessionState::<OwnerState>::new();
        let mut target = Recorder::<OwnerState>::new(false);
        embassy_futures::block_on(abort(
            &mut target,
            &session,
            OwnerState::AllLentAcked,
            EventCode::ReclaimFailure,
        ));
        assert_eq!(
            target.done,
            [
                OwnerUndo::ReclaimInterrupt,
                OwnerUndo::ReclaimMemory,
                OwnerUndo::EnableInterrupt,
                OwnerUndo::ReleaseResource,
            ]
        );
        assert!(target.settled);
        assert_eq!(session.state(), OwnerState::Idle);
    }

    #[test]
    fn test_borrower_unwind_continues_past_failures() {
        let session = SessionState::<BorrowerState>::new();
        session.set_active(true);
        let mut target = Recorder::<BorrowerState>::new(true);
        let report = embassy_futures::block_on(abort(
            &mut target,
            &session,
            BorrowerState::InterruptEnabled,
            EventCode::TransportFailure,
        ));
        assert_eq!(
            target.done,
            [
                BorrowerUndo::DisableInterrupt,
                BorrowerUndo::ReleaseInterrupt,
                BorrowerUndo::ReleaseSessionResource,
                BorrowerUndo::ReleaseMemory,
                BorrowerUndo::DiscardOffer,
            ]
        );
        assert_eq!(report.failed, 5);
        assert_eq!(session.state(), BorrowerState::Idle);
        assert!(!session.is_active());
        assert!(!session.abort_pending());
    }

    #[test]
    fn test_teardown_states_skip_already_undone_actions() {
        let session = SessionState::<BorrowerState>::new();
        let mut target = Recorder::<BorrowerState>::new(false);
        embassy_futures::block_on(abort(
            &mut target,
            &session,
            BorrowerState::InterruptReleased,
            EventCode::ReleaseFailure,
        ));
        assert_eq!(
            target.done,
            [
                BorrowerUndo::ReleaseSessionResource,
                BorrowerUndo::ReleaseMemory,
                BorrowerUndo::DiscardOffer,
            ]
        );
    }
}
