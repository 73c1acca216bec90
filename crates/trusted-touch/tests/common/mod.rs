//! Shared rig for the handover integration tests: one loopback resource
//! manager, one inbox per domain and mock hardware on both sides.

#![allow(dead_code, clippy::unwrap_used)]

use platform::mocks::{Domain, LoopbackClient, LoopbackFabric, MockBus, MockIrq, MockReset};
use platform::{InterruptId, IoRegion, ResourceDescriptor, ResourceTag};
use trusted_touch::{
    BorrowerSession, Environment, NotificationInbox, OwnerSession, SessionConfig, TouchMode,
};

pub type Owner<'a> = OwnerSession<'a, LoopbackClient<'a, 'a>, MockBus, MockIrq>;
pub type Borrower<'a> = BorrowerSession<'a, LoopbackClient<'a, 'a>, MockBus, MockIrq, MockReset>;

/// Touch controller at `[0x1000, 0x2000)` on interrupt 7.
pub fn descriptor() -> ResourceDescriptor {
    descriptor_with(&[IoRegion::new(0x1000, 0x1000)], 7)
}

pub fn descriptor_with(regions: &[IoRegion], irq: u32) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceTag::Primary, regions, InterruptId(irq)).unwrap()
}

pub fn config(environment: Environment, descriptor: ResourceDescriptor) -> SessionConfig {
    SessionConfig::new(TouchMode::Vm, environment, descriptor)
}

/// Inbox pair `(primary, trusted)`.
pub fn inboxes() -> (NotificationInbox, NotificationInbox) {
    (
        NotificationInbox::new(ResourceTag::Primary),
        NotificationInbox::new(ResourceTag::Primary),
    )
}

/// Mock hardware of both domains. Clones share state with the sessions.
pub struct Board {
    pub pvm_bus: MockBus,
    pub pvm_irq: MockIrq,
    pub tvm_bus: MockBus,
    pub tvm_irq: MockIrq,
    pub reset: MockReset,
}

impl Board {
    pub fn new() -> Self {
        Self {
            pvm_bus: MockBus::new(),
            pvm_irq: MockIrq::new(true),
            tvm_bus: MockBus::new(),
            tvm_irq: MockIrq::new(false),
            reset: MockReset::new(),
        }
    }

    pub fn owner<'a>(
        &self,
        inbox: &'a NotificationInbox,
        fabric: &'a LoopbackFabric<'a>,
    ) -> Owner<'a> {
        OwnerSession::new(
            config(Environment::Primary, descriptor()),
            inbox,
            fabric.client(Domain::Primary),
            self.pvm_bus.clone(),
            self.pvm_irq.clone(),
        )
    }

    pub fn borrower<'a>(
        &self,
        inbox: &'a NotificationInbox,
        fabric: &'a LoopbackFabric<'a>,
        descriptor: ResourceDescriptor,
    ) -> Borrower<'a> {
        BorrowerSession::new(
            config(Environment::Trusted, descriptor),
            inbox,
            fabric.client(Domain::Trusted),
            self.tvm_bus.clone(),
            self.tvm_irq.clone(),
            self.reset.clone(),
        )
    }
}
