//! Trusted touch handover on the host
//!
//! Both domains in one process over the loopback resource manager: one
//! successful session, then a session that loses the bus mid-way.
//! Run with: RUST_LOG=debug cargo run -p trusted-touch --example handover --features std,tracing

use platform::mocks::{Domain, LoopbackFabric, MockBus, MockIrq, MockReset};
use platform::ResourceTag;
use trusted_touch::{
    BorrowerSession, NotificationInbox, OwnerSession, Properties, SessionConfig,
    TrustedTouchControl,
};
use tracing_subscriber::EnvFilter;

fn board(environment: &str) -> Properties<'_> {
    Properties {
        touch_mode: Some("vm_mode"),
        environment: Some(environment),
        touch_type: Some("primary"),
        io_bases: &[0x1000],
        io_sizes: &[0x1000],
        irq: Some(7),
        reset_pulse_us: None,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pvm_config = SessionConfig::from_properties(&board("pvm")).map_err(|e| e.to_string())?;
    let tvm_config = SessionConfig::from_properties(&board("tvm")).map_err(|e| e.to_string())?;

    let pvm_inbox = NotificationInbox::new(ResourceTag::Primary);
    let tvm_inbox = NotificationInbox::new(ResourceTag::Primary);
    let fabric = LoopbackFabric::new(&pvm_inbox, &tvm_inbox);
    let reset = MockReset::new();

    let owner = OwnerSession::new(
        pvm_config,
        &pvm_inbox,
        fabric.client(Domain::Primary),
        MockBus::new(),
        MockIrq::new(true),
    );
    let borrower = BorrowerSession::new(
        tvm_config,
        &tvm_inbox,
        fabric.client(Domain::Trusted),
        MockBus::new(),
        MockIrq::new(false),
        reset.clone(),
    );

    let rt = tokio::runtime::Builder::new_current_thread().build()?;
    rt.block_on(async {
        owner.write_session("1").await?;
        borrower.write_session("1").await?;
        println!("session active: {}", borrower.session_active());
        borrower.write_session("0").await?;
        owner.write_session("0").await?;
        println!("session ended, leases outstanding: {}", fabric.outstanding_leases());

        owner.set_session(true).await?;
        borrower.set_session(true).await?;
        if let Some(report) = borrower.report_transport_failure().await {
            println!(
                "bus lost: {} ({} undone, {} failed, {} reset)",
                report.code,
                report.undone,
                report.failed,
                reset.resets()
            );
        }
        owner.set_session(false).await?;
        println!(
            "last events: owner {}, borrower {}",
            owner.last_event(),
            borrower.last_event()
        );
        Ok::<(), trusted_touch::SessionError>(())
    })
    .map_err(|e| e.to_string())?;

    Ok(())
}
