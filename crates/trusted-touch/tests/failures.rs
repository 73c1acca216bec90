//! Integration test: failures at every stage of the handover.
//!
//! Tests that:
//!   1. Every failed sub-step unwinds its side back to `Idle`
//!   2. The matching event code is published, and only terminal failures
//!      publish one
//!   3. Undo failures are logged and skipped, never leaving a side stuck
//!   4. A bus failure on the borrower resets the controller before the
//!      resources go back
//!   5. A mismatching offer is refused before anything is accepted
//!
//! Run with: cargo test -p trusted-touch --test failures

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use common::{config, descriptor, descriptor_with, inboxes, Board};
use embassy_futures::join::join;
use embassy_futures::yield_now;
use platform::mocks::{Domain, LoopbackFabric, RmOp};
use platform::{HandleId, InterruptId, IoRegion, Notification, ResourceClass, ResourceTag};
use trusted_touch::{
    Arrivals, BorrowerSession, BorrowerState, Environment, EventCode, OwnerSession, OwnerState,
    SessionConfig, SessionError, TouchMode, TrustedTouchControl,
};

// ── Owner: lend ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bus_acquire_failure_touches_nothing_else() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    board.pvm_bus.fail_acquire(true);
    assert_eq!(owner.start_session().await, Err(SessionError::LendFailure));

    assert_eq!(owner.state(), OwnerState::Idle);
    assert!(!owner.session_active());
    assert_eq!(owner.last_event(), EventCode::LendFailure);
    assert_eq!(board.pvm_irq.disables(), 0);
    assert!(fabric.calls().is_empty());
}

#[tokio::test]
async fn test_interrupt_lend_failure_reclaims_memory() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    fabric.fail(RmOp::Lend, ResourceClass::Interrupt);
    assert_eq!(owner.start_session().await, Err(SessionError::LendFailure));

    assert_eq!(owner.state(), OwnerState::Idle);
    assert_eq!(owner.last_event(), EventCode::LendFailure);
    assert_eq!(fabric.count(RmOp::Reclaim), 1);
    assert_eq!(fabric.outstanding_leases(), 0);
    assert!(board.pvm_irq.enabled());
    assert!(!board.pvm_bus.held());
    assert!(owner.may_access_device());

    fabric.clear_failures();
    owner.start_session().await.unwrap();
}

#[tokio::test]
async fn test_mismatched_ack_is_notification_failure() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    fabric.hold_notifications(true);
    let (started, ()) = join(owner.start_session(), async {
        yield_now().await;
        let regions = [IoRegion::new(0x1000, 0x1000)];
        fabric.inject(
            Domain::Primary,
            Notification::memory_lent(ResourceTag::Primary, HandleId(0x999), &regions),
        );
        fabric.inject(
            Domain::Primary,
            Notification::interrupt_lent(ResourceTag::Primary, HandleId(0x101), InterruptId(7)),
        );
    })
    .await;

    assert_eq!(started, Err(SessionError::LendNotificationFailure));
    assert_eq!(owner.state(), OwnerState::Idle);
    assert_eq!(owner.last_event(), EventCode::LendNotificationFailure);
    assert_eq!(fabric.outstanding_leases(), 0);
    assert!(board.pvm_irq.enabled());
}

// ── Owner: reclaim ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reclaim_while_borrowed_unwinds_locally() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();

    assert_eq!(owner.end_session().await, Err(SessionError::ReclaimFailure));
    assert_eq!(owner.state(), OwnerState::Idle);
    assert!(!owner.session_active());
    assert_eq!(owner.last_event(), EventCode::ReclaimFailure);
    assert!(board.pvm_irq.enabled());
    assert!(!board.pvm_bus.held());
    // The borrower still holds both transfers.
    assert_eq!(fabric.outstanding_leases(), 2);
}

// ── Borrower: accept ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mismatching_offer_is_refused_before_accept() {
    let mismatches = [
        descriptor_with(&[IoRegion::new(0x1000, 0x1000)], 8),
        descriptor_with(&[IoRegion::new(0x1000, 0x800)], 7),
        descriptor_with(&[IoRegion::new(0x1000, 0x1000), IoRegion::new(0x4000, 0x100)], 7),
    ];
    for local in mismatches {
        let (pvm_inbox, tvm_inbox) = inboxes();
        let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
        let board = Board::new();
        let owner = board.owner(&pvm_inbox, &fabric);
        let borrower = board.borrower(&tvm_inbox, &fabric, local);

        owner.start_session().await.unwrap();
        assert_eq!(
            borrower.on_all_resources_offered().await,
            Err(SessionError::FunctionalFailure)
        );
        assert_eq!(borrower.state(), BorrowerState::Idle);
        assert_eq!(borrower.last_event(), EventCode::FunctionalFailure);
        assert_eq!(fabric.count(RmOp::Accept), 0);
        assert_eq!(board.tvm_bus.acquires(), 0);
        assert_eq!(tvm_inbox.lent(), Arrivals::NONE);

        owner.end_session().await.unwrap();
        assert_eq!(fabric.outstanding_leases(), 0);
    }
}

#[tokio::test]
async fn test_interrupt_accept_failure_releases_memory() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    fabric.fail(RmOp::Accept, ResourceClass::Interrupt);
    assert_eq!(
        borrower.on_all_resources_offered().await,
        Err(SessionError::AcceptFailure)
    );

    assert_eq!(borrower.state(), BorrowerState::Idle);
    assert_eq!(borrower.last_event(), EventCode::AcceptFailure);
    assert_eq!(board.tvm_bus.acquires(), 1);
    assert_eq!(board.tvm_bus.releases(), 1);
    assert!(!board.tvm_irq.enabled());
    assert_eq!(fabric.count(RmOp::Release), 1);
    assert_eq!(
        pvm_inbox.released(),
        Arrivals { memory: true, interrupt: false }
    );

    owner.end_session().await.unwrap();
    assert_eq!(fabric.outstanding_leases(), 0);

    // Both sides recover for the next session.
    fabric.clear_failures();
    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();
}

#[tokio::test]
async fn test_interrupt_enable_failure_gives_everything_back() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    board.tvm_irq.fail_enable(true);
    assert_eq!(
        borrower.on_all_resources_offered().await,
        Err(SessionError::AcceptFailure)
    );
    assert!(!borrower.session_active());
    assert_eq!(fabric.count(RmOp::Release), 2);
    assert!(!board.tvm_bus.held());

    owner.end_session().await.unwrap();
    assert_eq!(fabric.outstanding_leases(), 0);
}

// ── Borrower: release ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_every_undo_failing_still_reaches_idle() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();

    board.tvm_irq.fail_disable(true);
    board.tvm_bus.fail_release(true);
    fabric.fail(RmOp::Release, ResourceClass::Memory);
    fabric.fail(RmOp::Release, ResourceClass::Interrupt);

    assert_eq!(borrower.teardown().await, Err(SessionError::ReleaseFailure));
    assert_eq!(borrower.state(), BorrowerState::Idle);
    assert!(!borrower.session_active());
    assert!(!borrower.session().abort_pending());
    assert_eq!(borrower.last_event(), EventCode::ReleaseFailure);
    assert_eq!(fabric.count(RmOp::Release), 2);

    // Nothing was released, so the owner cannot reclaim either.
    assert_eq!(owner.end_session().await, Err(SessionError::ReclaimFailure));
    assert_eq!(owner.state(), OwnerState::Idle);
}

#[tokio::test]
async fn test_bus_release_failure_still_releases_memory() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();

    board.tvm_bus.fail_release(true);
    assert_eq!(borrower.teardown().await, Err(SessionError::ReleaseFailure));
    assert_eq!(borrower.state(), BorrowerState::Idle);
    assert_eq!(fabric.count(RmOp::Release), 2);

    owner.end_session().await.unwrap();
    assert_eq!(fabric.outstanding_leases(), 0);
}

// ── Transport failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_borrower_transport_failure_resets_controller() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();

    let report = borrower.report_transport_failure().await.unwrap();
    assert_eq!(report.code, EventCode::TransportFailure);
    assert_eq!(report.undone, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(board.reset.resets(), 1);
    assert_eq!(borrower.state(), BorrowerState::Idle);
    assert_eq!(borrower.last_event(), EventCode::TransportFailure);
    assert_eq!(pvm_inbox.released(), Arrivals { memory: true, interrupt: true });

    owner.end_session().await.unwrap();
    assert_eq!(fabric.outstanding_leases(), 0);
}

#[tokio::test]
async fn test_reset_failure_does_not_stop_unwind() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    owner.start_session().await.unwrap();
    borrower.on_all_resources_offered().await.unwrap();

    board.reset.fail(true);
    let report = borrower.report_transport_failure().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(board.reset.resets(), 1);
    assert_eq!(borrower.state(), BorrowerState::Idle);
}

#[tokio::test]
async fn test_transport_failure_without_memory_skips_reset() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    let report = borrower.report_transport_failure().await.unwrap();
    assert_eq!(report.undone, 0);
    assert_eq!(board.reset.resets(), 0);
    assert_eq!(borrower.last_event(), EventCode::TransportFailure);
}

#[tokio::test]
async fn test_owner_transport_failure_reclaims() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    owner.start_session().await.unwrap();
    let report = owner.report_transport_failure().await.unwrap();
    assert_eq!(report.code, EventCode::TransportFailure);
    assert_eq!(report.undone, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(owner.state(), OwnerState::Idle);
    assert!(!owner.session_active());
    assert_eq!(fabric.outstanding_leases(), 0);
    assert!(board.pvm_irq.enabled());
    assert!(!board.pvm_bus.held());
}

#[tokio::test]
async fn test_abort_during_transition_runs_after_it() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    fabric.hold_notifications(true);
    let (_, (report, ())) = join(owner.start_session(), async {
        yield_now().await;
        join(owner.report_transport_failure(), async {
            assert!(owner.session().abort_pending());
            assert_eq!(owner.start_session().await, Err(SessionError::AbortPending));
            fabric.release_held();
        })
        .await
    })
    .await;

    assert!(report.is_some());
    assert_eq!(owner.state(), OwnerState::Idle);
    assert!(!owner.session().abort_pending());
    assert_eq!(owner.last_event(), EventCode::TransportFailure);
    assert_eq!(fabric.outstanding_leases(), 0);
}

// ── Event reporting ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_last_event_clears_only_with_zero() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);

    board.pvm_bus.fail_acquire(true);
    let (event, started) = join(owner.wait_event(), owner.start_session()).await;
    assert_eq!(event, EventCode::LendFailure);
    assert_eq!(started, Err(SessionError::LendFailure));

    assert_eq!(owner.write_last_event(1), Err(SessionError::InvalidValue));
    assert_eq!(owner.last_event(), EventCode::LendFailure);
    owner.write_last_event(0).unwrap();
    assert_eq!(owner.last_event(), EventCode::None);
}

#[tokio::test]
async fn test_rejections_publish_nothing() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let owner = board.owner(&pvm_inbox, &fabric);
    let borrower = board.borrower(&tvm_inbox, &fabric, descriptor());

    assert_eq!(
        borrower.on_all_resources_offered().await,
        Err(SessionError::NotificationsPending)
    );
    owner.start_session().await.unwrap();
    assert_eq!(owner.start_session().await, Err(SessionError::Busy));
    assert_eq!(owner.last_event(), EventCode::None);
    assert_eq!(borrower.last_event(), EventCode::None);
}

// ── Disabled mode ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disabled_mode_is_unsupported() {
    let (pvm_inbox, tvm_inbox) = inboxes();
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let board = Board::new();
    let disabled = |environment| SessionConfig {
        mode: TouchMode::Disabled,
        ..config(environment, descriptor())
    };

    let owner = OwnerSession::new(
        disabled(Environment::Primary),
        &pvm_inbox,
        fabric.client(Domain::Primary),
        board.pvm_bus.clone(),
        board.pvm_irq.clone(),
    );
    let borrower = BorrowerSession::new(
        disabled(Environment::Trusted),
        &tvm_inbox,
        fabric.client(Domain::Trusted),
        board.tvm_bus.clone(),
        board.tvm_irq.clone(),
        board.reset.clone(),
    );

    assert_eq!(owner.set_session(true).await, Err(SessionError::Unsupported));
    assert_eq!(owner.set_session(false).await, Err(SessionError::Unsupported));
    assert_eq!(borrower.set_session(true).await, Err(SessionError::Unsupported));
    assert!(fabric.calls().is_empty());
    assert_eq!(board.pvm_bus.acquires(), 0);
}
