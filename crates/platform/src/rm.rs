//! Resource Manager abstraction
//!
//! The resource manager is the hypervisor-side service that moves memory
//! ranges and interrupt lines between the primary domain (owner) and the
//! trusted domain (borrower). Each transfer is identified by an opaque
//! [`TransferHandle`] issued on lend.
//!
//! # Transfer lifecycle
//!
//! ```text
//! owner: lend ──► borrower: accept ──► borrower: release ──► owner: reclaim
//!          │                                                   ▲
//!          └──────────── (abort before accept) ────────────────┘
//! ```
//!
//! Lend and release produce asynchronous [`Notification`]s. The owner also
//! receives its own `Lent` notifications back as acknowledgements.

use core::fmt;
use core::num::NonZeroU64;

use crate::resource::{
    InterruptId, IoRegion, RegionList, ResourceClass, ResourceDescriptor, ResourceTag,
};

// ── Handles ──────────────────────────────────────────────────────────────────

/// Identifier of a transfer, as carried by notifications.
///
/// Notifications only carry the id; holding a [`TransferHandle`] is what
/// allows the holder to release or reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Ownership token for one lent resource.
///
/// Not `Clone`: exactly one party holds the right to release or reclaim a
/// transfer at any time. Zero is never a valid handle.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferHandle(NonZeroU64);

impl TransferHandle {
    /// Wrap a raw handle value. Returns `None` for zero.
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The id under which this transfer appears in notifications.
    #[must_use]
    pub fn id(&self) -> HandleId {
        HandleId(self.0.get())
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ── Manager trait ────────────────────────────────────────────────────────────

/// Resource manager operations, as seen from one domain.
///
/// The owner side calls [`lend`][Self::lend] and [`reclaim`][Self::reclaim];
/// the borrower side calls [`accept`][Self::accept] and
/// [`release`][Self::release].
pub trait ResourceManager {
    /// Error type
    type Error: fmt::Debug;

    /// Lend the resources of `class` described by `descriptor` to the
    /// trusted domain.
    ///
    /// For [`ResourceClass::Memory`] every region of the descriptor is lent
    /// in one transfer.
    async fn lend(
        &mut self,
        class: ResourceClass,
        descriptor: &ResourceDescriptor,
    ) -> Result<TransferHandle, Self::Error>;

    /// Accept a transfer previously offered under `handle`.
    ///
    /// `expected` is the accepting side's own description of the resource;
    /// implementations may refuse when the transfer does not match it.
    async fn accept(
        &mut self,
        class: ResourceClass,
        handle: HandleId,
        expected: &ResourceDescriptor,
    ) -> Result<TransferHandle, Self::Error>;

    /// Give an accepted transfer back to the owner.
    async fn release(
        &mut self,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), Self::Error>;

    /// Take a lent or released transfer back.
    async fn reclaim(
        &mut self,
        class: ResourceClass,
        handle: &TransferHandle,
    ) -> Result<(), Self::Error>;
}

// ── Notifications ────────────────────────────────────────────────────────────

/// What happened to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotificationKind {
    /// The resource was lent (delivered to both domains).
    Lent,
    /// The borrower released the resource (delivered to the owner).
    Released,
}

impl NotificationKind {
    /// Short lowercase name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lent => "lent",
            Self::Released => "released",
        }
    }
}

/// Resource payload carried by a `Lent` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Offer {
    /// No payload (release notifications).
    None,
    /// The IO regions in the memory transfer.
    Memory(RegionList),
    /// The interrupt line in the interrupt transfer.
    Interrupt(InterruptId),
}

/// One resource-manager event, delivered asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Notification {
    /// Resource set the transfer belongs to.
    pub tag: ResourceTag,
    /// What happened.
    pub kind: NotificationKind,
    /// Which resource.
    pub class: ResourceClass,
    /// Transfer the event refers to.
    pub handle: HandleId,
    /// Payload, if any.
    pub offer: Offer,
}

impl Notification {
    /// Memory lent, carrying the offered regions.
    ///
    /// Regions beyond [`MAX_IO_REGIONS`](crate::resource::MAX_IO_REGIONS) are
    /// dropped; such an offer never matches a descriptor.
    #[must_use]
    pub fn memory_lent(tag: ResourceTag, handle: HandleId, regions: &[IoRegion]) -> Self {
        let mut list = RegionList::new();
        for region in regions {
            if list.push(*region).is_err() {
                break;
            }
        }
        Self {
            tag,
            kind: NotificationKind::Lent,
            class: ResourceClass::Memory,
            handle,
            offer: Offer::Memory(list),
        }
    }

    /// Interrupt lent, carrying the interrupt id.
    #[must_use]
    pub fn interrupt_lent(tag: ResourceTag, handle: HandleId, irq: InterruptId) -> Self {
        Self {
            tag,
            kind: NotificationKind::Lent,
            class: ResourceClass::Interrupt,
            handle,
            offer: Offer::Interrupt(irq),
        }
    }

    /// Resource released by the borrower.
    #[must_use]
    pub fn released(tag: ResourceTag, class: ResourceClass, handle: HandleId) -> Self {
        Self {
            tag,
            kind: NotificationKind::Released,
            class,
            handle,
            offer: Offer::None,
        }
    }
}

/// Receiver of resource-manager notifications.
///
/// Called from the notification context, concurrently with session
/// transitions. Implementations must not block on the session gate.
pub trait NotificationSink {
    /// Deliver one notification.
    fn deliver(&self, notification: Notification);
}
