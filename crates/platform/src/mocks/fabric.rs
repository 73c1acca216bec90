//! In-process loopback resource manager.
//!
//! Two [`LoopbackClient`]s (one per domain) share one [`LoopbackFabric`],
//! which keeps the lease table and routes notifications to each domain's
//! [`NotificationSink`]. Notifications are delivered synchronously from
//! inside the lend/release call unless delivery is held, in which case tests
//! decide when (and in which order) they arrive.

use std::cell::RefCell;

use crate::resource::{ResourceClass, ResourceDescriptor, ResourceTag};
use crate::rm::{HandleId, Notification, NotificationSink, ResourceManager, TransferHandle};

/// Which side of the fabric a client or notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// The domain that normally owns the touch controller.
    Primary,
    /// The trusted domain that borrows it.
    Trusted,
}

/// Resource manager operation, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmOp {
    /// `lend`
    Lend,
    /// `accept`
    Accept,
    /// `release`
    Release,
    /// `reclaim`
    Reclaim,
}

/// One recorded resource-manager call (recorded even when it fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmCall {
    /// Calling domain.
    pub domain: Domain,
    /// Operation.
    pub op: RmOp,
    /// Resource class.
    pub class: ResourceClass,
}

/// Errors returned by the loopback fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRmError {
    /// Failure injected with [`LoopbackFabric::fail`].
    Injected,
    /// No lease with that handle and class.
    UnknownHandle,
    /// The lease is not in a state that allows the operation.
    WrongState,
    /// The accepting side's descriptor does not match the lease.
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Lent,
    Accepted,
    Released,
}

#[derive(Debug)]
struct Lease {
    id: u64,
    tag: ResourceTag,
    class: ResourceClass,
    state: LeaseState,
    descriptor: ResourceDescriptor,
}

#[derive(Debug, Default)]
struct FabricState {
    next_handle: u64,
    leases: Vec<Lease>,
    calls: Vec<RmCall>,
    failures: Vec<(RmOp, ResourceClass)>,
    hold: bool,
    held: Vec<(Domain, Notification)>,
    delivered: Vec<(Domain, Notification)>,
}

/// Shared lease table and notification router.
pub struct LoopbackFabric<'a> {
    primary: &'a dyn NotificationSink,
    trusted: &'a dyn NotificationSink,
    state: RefCell<FabricState>,
}

impl<'a> LoopbackFabric<'a> {
    /// Create a fabric routing to the given per-domain sinks.
    pub fn new(primary: &'a dyn NotificationSink, trusted: &'a dyn NotificationSink) -> Self {
        Self {
            primary,
            trusted,
            state: RefCell::new(FabricState {
                next_handle: 0x100,
                ..FabricState::default()
            }),
        }
    }

    /// A resource manager client acting for `domain`.
    pub fn client(&self, domain: Domain) -> LoopbackClient<'_, 'a> {
        LoopbackClient {
            fabric: self,
            domain,
        }
    }

    /// Make every subsequent `op` on `class` fail until cleared.
    pub fn fail(&self, op: RmOp, class: ResourceClass) {
        self.state.borrow_mut().failures.push((op, class));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Queue notifications instead of delivering them.
    ///
    /// The `release_held*` methods deliver queued notifications regardless of
    /// this setting.
    pub fn hold_notifications(&self, hold: bool) {
        self.state.borrow_mut().hold = hold;
    }

    /// Number of queued notifications.
    pub fn held_count(&self) -> usize {
        self.state.borrow().held.len()
    }

    /// Deliver every queued notification in the order it was produced.
    pub fn release_held(&self) {
        let held = core::mem::take(&mut self.state.borrow_mut().held);
        for (domain, notification) in held {
            self.dispatch(domain, notification);
        }
    }

    /// Deliver every queued notification in reverse order.
    pub fn release_held_reversed(&self) {
        let held = core::mem::take(&mut self.state.borrow_mut().held);
        for (domain, notification) in held.into_iter().rev() {
            self.dispatch(domain, notification);
        }
    }

    /// Deliver the queued notifications accepted by `filter`; keep the rest queued.
    pub fn release_held_where(&self, mut filter: impl FnMut(Domain, &Notification) -> bool) {
        let held = core::mem::take(&mut self.state.borrow_mut().held);
        let (now, later): (Vec<_>, Vec<_>) =
            held.into_iter().partition(|(domain, n)| filter(*domain, n));
        self.state.borrow_mut().held = later;
        for (domain, notification) in now {
            self.dispatch(domain, notification);
        }
    }

    /// Deliver an arbitrary notification (stale, duplicate, foreign tag),
    /// bypassing the hold queue.
    pub fn inject(&self, domain: Domain, notification: Notification) {
        self.dispatch(domain, notification);
    }

    /// Every notification delivered so far, in delivery order.
    pub fn delivered(&self, domain: Domain) -> Vec<Notification> {
        self.state
            .borrow()
            .delivered
            .iter()
            .filter(|(d, _)| *d == domain)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Every call made so far, in call order.
    pub fn calls(&self) -> Vec<RmCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of calls of `op` made by any domain.
    pub fn count(&self, op: RmOp) -> usize {
        self.state.borrow().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of leases not yet reclaimed.
    pub fn outstanding_leases(&self) -> usize {
        self.state.borrow().leases.len()
    }

    fn route(&self, domain: Domain, notification: Notification) {
        {
            let mut state = self.state.borrow_mut();
            if state.hold {
                state.held.push((domain, notification));
                return;
            }
        }
        self.dispatch(domain, notification);
    }

    fn dispatch(&self, domain: Domain, notification: Notification) {
        self.state
            .borrow_mut()
            .delivered
            .push((domain, notification.clone()));
        // The borrow must be dropped before the sink runs.
        match domain {
            Domain::Primary => self.primary.deliver(notification),
            Domain::Trusted => self.trusted.deliver(notification),
        }
    }

    fn begin(&self, domain: Domain, op: RmOp, class: ResourceClass) -> Result<(), MockRmError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RmCall { domain, op, class });
        if state.failures.contains(&(op, class)) {
            return Err(MockRmError::Injected);
        }
        Ok(())
    }

    fn lend(
        &self,
        domain: Domain,
        class: ResourceClass,
        descriptor: &ResourceDescriptor,
    ) -> Result<TransferHandle, MockRmError> {
        self.begin(domain, RmOp::Lend, class)?;
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_handle;
            state.next_handle = id.wrapping_add(1);
            state.leases.push(Lease {
                id,
                tag: descriptor.tag(),
                class,
                state: LeaseState::Lent,
                descriptor: descriptor.clone(),
            });
            id
        };
        let handle = TransferHandle::new(id).ok_or(MockRmError::UnknownHandle)?;
        let notification = match class {
            ResourceClass::Memory => {
                Notification::memory_lent(descriptor.tag(), HandleId(id), descriptor.regions())
            }
            ResourceClass::Interrupt => {
                Notification::interrupt_lent(descriptor.tag(), HandleId(id), descriptor.irq())
            }
        };
        self.route(Domain::Trusted, notification.clone());
        self.route(Domain::Primary, notification);
        Ok(handle)
    }

    fn accept(
        &self,
        domain: Domain,
        class: ResourceClass,
        handle: HandleId,
        expected: &ResourceDescriptor,
    ) -> Result<TransferHandle, MockRmError> {
        self.begin(domain, RmOp::Accept, class)?;
        let mut state = self.state.borrow_mut();
        let lease = state
            .leases
            .iter_mut()
            .find(|l| l.id == handle.0 && l.class == class)
            .ok_or(MockRmError::UnknownHandle)?;
        if lease.state != LeaseState::Lent {
            return Err(MockRmError::WrongState);
        }
        let matches = match class {
            ResourceClass::Memory => lease.descriptor.matches_regions(expected.regions()),
            ResourceClass::Interrupt => lease.descriptor.irq() == expected.irq(),
        };
        if !matches {
            return Err(MockRmError::Mismatch);
        }
        lease.state = LeaseState::Accepted;
        TransferHandle::new(handle.0).ok_or(MockRmError::UnknownHandle)
    }

    fn release(
        &self,
        domain: Domain,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), MockRmError> {
        self.begin(domain, RmOp::Release, class)?;
        let tag = {
            let mut state = self.state.borrow_mut();
            let lease = state
                .leases
                .iter_mut()
                .find(|l| l.id == handle.id().0 && l.class == class)
                .ok_or(MockRmError::UnknownHandle)?;
            if lease.state != LeaseState::Accepted {
                return Err(MockRmError::WrongState);
            }
            lease.state = LeaseState::Released;
            lease.tag
        };
        self.route(
            Domain::Primary,
            Notification::released(tag, class, handle.id()),
        );
        Ok(())
    }

    fn reclaim(
        &self,
        domain: Domain,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), MockRmError> {
        self.begin(domain, RmOp::Reclaim, class)?;
        let mut state = self.state.borrow_mut();
        let pos = state
            .leases
            .iter()
            .position(|l| l.id == handle.id().0 && l.class == class)
            .ok_or(MockRmError::UnknownHandle)?;
        let lease_state = state.leases.get(pos).map(|l| l.state);
        if lease_state == Some(LeaseState::Accepted) {
            return Err(MockRmError::WrongState);
        }
        state.leases.remove(pos);
        Ok(())
    }
}

/// One domain's view of a [`LoopbackFabric`].
pub struct LoopbackClient<'f, 'a> {
    fabric: &'f LoopbackFabric<'a>,
    domain: Domain,
}

impl ResourceManager for LoopbackClient<'_, '_> {
    type Error = MockRmError;

    async fn lend(
        &mut self,
        class: ResourceClass,
        descriptor: &ResourceDescriptor,
    ) -> Result<TransferHandle, MockRmError> {
        self.fabric.lend(self.domain, class, descriptor)
    }

    async fn accept(
        &mut self,
        class: ResourceClass,
        handle: HandleId,
        expected: &ResourceDescriptor,
    ) -> Result<TransferHandle, MockRmError> {
        self.fabric.accept(self.domain, class, handle, expected)
    }

    async fn release(
        &mut self,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), MockRmError> {
        self.fabric.release(self.domain, class, handle)
    }

    async fn reclaim(
        &mut self,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), MockRmError> {
        self.fabric.reclaim(self.domain, class, handle)
    }
}
