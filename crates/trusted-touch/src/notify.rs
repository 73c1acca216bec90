//! Notification merge.
//!
//! Lend and release notifications arrive on the resource manager's callback
//! path, concurrently with the foreground transition and in either order. Each
//! phase (lent, released) has one [`ArrivalLatch`] holding a memory bit and an
//! interrupt bit; recording an arrival is a single `fetch_or`, and whichever
//! notification sets the second bit completes the phase. The foreground path
//! only ever waits on the phase's signal and reads the latch.
//!
//! The callback path never takes the session gate.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;
use platform::{
    HandleId, InterruptId, Notification, NotificationKind, NotificationSink, Offer, RegionList,
    ResourceClass, ResourceTag,
};

const MEMORY_BIT: u8 = 0b01;
const INTERRUPT_BIT: u8 = 0b10;
const BOTH: u8 = MEMORY_BIT | INTERRUPT_BIT;

fn class_bit(class: ResourceClass) -> u8 {
    match class {
        ResourceClass::Memory => MEMORY_BIT,
        ResourceClass::Interrupt => INTERRUPT_BIT,
    }
}

// ── Arrivals ─────────────────────────────────────────────────────────────────

/// Which notifications of one phase have arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Arrivals {
    /// The memory notification arrived.
    pub memory: bool,
    /// The interrupt notification arrived.
    pub interrupt: bool,
}

impl Arrivals {
    /// Nothing arrived.
    pub const NONE: Self = Self {
        memory: false,
        interrupt: false,
    };

    /// Returns `true` once both notifications arrived.
    #[must_use]
    pub fn both(self) -> bool {
        self.memory && self.interrupt
    }

    /// Returns `true` if the notification for `class` arrived.
    #[must_use]
    pub fn has(self, class: ResourceClass) -> bool {
        match class {
            ResourceClass::Memory => self.memory,
            ResourceClass::Interrupt => self.interrupt,
        }
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            memory: bits & MEMORY_BIT != 0,
            interrupt: bits & INTERRUPT_BIT != 0,
        }
    }
}

/// Outcome of recording one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Merge {
    /// The other notification of the phase has not arrived yet.
    Pending,
    /// This arrival completed the phase.
    Completed,
    /// This class had already arrived.
    Duplicate,
}

/// Lock-free two-bit latch for one phase.
#[derive(Debug, Default)]
pub struct ArrivalLatch(AtomicU8);

impl ArrivalLatch {
    /// Empty latch.
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Record the arrival of `class` and report how the phase stands.
    ///
    /// Completion is decided from the value the other bit had at the moment
    /// of this update, so either arrival order completes the phase exactly once.
    pub fn record(&self, class: ResourceClass) -> Merge {
        let bit = class_bit(class);
        let prev = self.0.fetch_or(bit, Ordering::AcqRel);
        if prev & bit != 0 {
            Merge::Duplicate
        } else if prev | bit == BOTH {
            Merge::Completed
        } else {
            Merge::Pending
        }
    }

    /// Current arrivals.
    pub fn arrivals(&self) -> Arrivals {
        Arrivals::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Forget every arrival.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

// ── Inbox ────────────────────────────────────────────────────────────────────

/// Which notification kinds the inbox currently accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expect(u8);

impl Expect {
    /// Accept nothing.
    pub const NONE: Self = Self(0);
    /// Accept lend notifications.
    pub const LENT: Self = Self(0b01);
    /// Accept release notifications.
    pub const RELEASED: Self = Self(0b10);
    /// Accept both kinds.
    pub const ALL: Self = Self(0b11);

    fn of(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Lent => Self::LENT,
            NotificationKind::Released => Self::RELEASED,
        }
    }

    fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The offer observed by the borrower once both lend notifications arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Offered {
    /// Regions carried by the memory notification.
    pub regions: RegionList,
    /// Interrupt carried by the interrupt notification.
    pub irq: InterruptId,
    /// Transfer id of the memory lend.
    pub memory: HandleId,
    /// Transfer id of the interrupt lend.
    pub interrupt: HandleId,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClassSlots {
    memory: Option<HandleId>,
    interrupt: Option<HandleId>,
}

impl ClassSlots {
    const EMPTY: Self = Self {
        memory: None,
        interrupt: None,
    };

    fn get(&self, class: ResourceClass) -> Option<HandleId> {
        match class {
            ResourceClass::Memory => self.memory,
            ResourceClass::Interrupt => self.interrupt,
        }
    }

    fn set(&mut self, class: ResourceClass, id: Option<HandleId>) {
        match class {
            ResourceClass::Memory => self.memory = id,
            ResourceClass::Interrupt => self.interrupt = id,
        }
    }
}

#[derive(Debug)]
struct Payload {
    lent: ClassSlots,
    released: ClassSlots,
    retired: ClassSlots,
    regions: RegionList,
    irq: Option<InterruptId>,
}

impl Payload {
    const EMPTY: Self = Self {
        lent: ClassSlots::EMPTY,
        released: ClassSlots::EMPTY,
        retired: ClassSlots::EMPTY,
        regions: RegionList::new(),
        irq: None,
    };
}

/// Notification receiver for one side of one resource set.
///
/// Folds notifications into the arrival latches and keeps the payload each
/// one carries (transfer id, offered regions, offered interrupt). Foreign
/// tags, kinds not currently expected, retired transfer ids and duplicates are
/// logged and dropped.
pub struct NotificationInbox {
    tag: ResourceTag,
    expect: AtomicU8,
    lent: ArrivalLatch,
    released: ArrivalLatch,
    payload: BlockingMutex<CriticalSectionRawMutex, RefCell<Payload>>,
    lent_ready: Signal<CriticalSectionRawMutex, ()>,
    released_ready: Signal<CriticalSectionRawMutex, ()>,
}

impl NotificationInbox {
    /// Inbox for resource set `tag`, accepting nothing until armed.
    pub const fn new(tag: ResourceTag) -> Self {
        Self {
            tag,
            expect: AtomicU8::new(0),
            lent: ArrivalLatch::new(),
            released: ArrivalLatch::new(),
            payload: BlockingMutex::new(RefCell::new(Payload::EMPTY)),
            lent_ready: Signal::new(),
            released_ready: Signal::new(),
        }
    }

    /// Resource set this inbox listens for.
    pub fn tag(&self) -> ResourceTag {
        self.tag
    }

    /// Start accepting `kinds`, forgetting earlier arrivals of those kinds.
    pub fn arm(&self, kinds: Expect) {
        self.with_payload(|p| {
            if kinds.contains(Expect::LENT) {
                self.lent.clear();
                p.lent = ClassSlots::EMPTY;
                p.regions.clear();
                p.irq = None;
            }
            if kinds.contains(Expect::RELEASED) {
                self.released.clear();
                p.released = ClassSlots::EMPTY;
            }
            self.expect.fetch_or(kinds.0, Ordering::AcqRel);
        });
        if kinds.contains(Expect::LENT) {
            self.lent_ready.reset();
        }
        if kinds.contains(Expect::RELEASED) {
            self.released_ready.reset();
        }
    }

    /// Stop accepting `kinds`; recorded arrivals are kept.
    pub fn disarm(&self, kinds: Expect) {
        self.expect.fetch_and(!kinds.0, Ordering::AcqRel);
    }

    /// Stop accepting anything and forget every arrival. Retired ids are kept.
    pub fn reset(&self) {
        self.with_payload(|p| {
            self.expect.store(0, Ordering::Release);
            self.lent.clear();
            self.released.clear();
            p.lent = ClassSlots::EMPTY;
            p.released = ClassSlots::EMPTY;
            p.regions.clear();
            p.irq = None;
        });
    }

    /// Lend notifications observed so far.
    pub fn lent(&self) -> Arrivals {
        self.lent.arrivals()
    }

    /// Release notifications observed so far.
    pub fn released(&self) -> Arrivals {
        self.released.arrivals()
    }

    /// Transfer id carried by the lend notification for `class`.
    pub fn lent_id(&self, class: ResourceClass) -> Option<HandleId> {
        self.with_payload(|p| p.lent.get(class))
    }

    /// Wait until both lend notifications have arrived.
    pub async fn wait_lent(&self) {
        while !self.lent().both() {
            self.lent_ready.wait().await;
        }
    }

    /// Wait until both release notifications have arrived.
    pub async fn wait_released(&self) {
        while !self.released().both() {
            self.released_ready.wait().await;
        }
    }

    /// The merged offer, once both lend notifications arrived.
    pub fn offer(&self) -> Option<Offered> {
        self.with_payload(|p| self.merged(p))
    }

    /// Take the merged offer and stop accepting lend notifications.
    ///
    /// Returns `None` and keeps listening if the offer is incomplete. No lend
    /// notification can replace the offer once it has been taken.
    pub fn take_offer(&self) -> Option<Offered> {
        self.with_payload(|p| {
            let offer = self.merged(p)?;
            self.expect.fetch_and(!Expect::LENT.0, Ordering::AcqRel);
            Some(offer)
        })
    }

    /// Remember `id` as finished; later notifications naming it are stale.
    pub fn retire(&self, class: ResourceClass, id: HandleId) {
        self.with_payload(|p| p.retired.set(class, Some(id)));
    }

    /// Retire the ids of the recorded lend notifications and forget them.
    pub fn discard_lent(&self) {
        self.with_payload(|p| self.drop_offer(p));
    }

    fn expects(&self, kind: NotificationKind) -> bool {
        Expect(self.expect.load(Ordering::Acquire)).contains(Expect::of(kind))
    }

    fn with_payload<R>(&self, f: impl FnOnce(&mut Payload) -> R) -> R {
        self.payload.lock(|cell| f(&mut cell.borrow_mut()))
    }

    fn merged(&self, p: &Payload) -> Option<Offered> {
        if !self.lent().both() {
            return None;
        }
        Some(Offered {
            regions: p.regions.clone(),
            irq: p.irq?,
            memory: p.lent.memory?,
            interrupt: p.lent.interrupt?,
        })
    }

    fn drop_offer(&self, p: &mut Payload) {
        for class in ResourceClass::ALL {
            if let Some(id) = p.lent.get(class) {
                p.retired.set(class, Some(id));
            }
        }
        p.lent = ClassSlots::EMPTY;
        p.regions.clear();
        p.irq = None;
        self.lent.clear();
    }

    /// Fold `n` into the payload and the latch of its phase.
    ///
    /// A lend for a class that already holds a different transfer id starts a
    /// new offer: the recorded one was never taken and is retired whole.
    fn fold(&self, p: &mut Payload, n: &Notification) -> Folded {
        if !self.expects(n.kind) {
            return Folded::Unexpected;
        }
        if p.retired.get(n.class) == Some(n.handle) {
            return Folded::Stale;
        }
        match n.kind {
            NotificationKind::Lent => {
                let superseded = match p.lent.get(n.class) {
                    Some(id) if id == n.handle => return Folded::Duplicate,
                    other => other,
                };
                if !matches!(
                    (&n.offer, n.class),
                    (Offer::Memory(_), ResourceClass::Memory)
                        | (Offer::Interrupt(_), ResourceClass::Interrupt)
                ) {
                    return Folded::Malformed;
                }
                if superseded.is_some() {
                    self.drop_offer(p);
                }
                match &n.offer {
                    Offer::Memory(regions) => p.regions.clone_from(regions),
                    Offer::Interrupt(irq) => p.irq = Some(*irq),
                    Offer::None => {}
                }
                p.lent.set(n.class, Some(n.handle));
                Folded::Recorded {
                    merge: self.lent.record(n.class),
                    superseded,
                }
            }
            NotificationKind::Released => {
                if p.lent.get(n.class) != Some(n.handle) {
                    return Folded::Stale;
                }
                if p.released.get(n.class).is_some() {
                    return Folded::Duplicate;
                }
                p.released.set(n.class, Some(n.handle));
                Folded::Recorded {
                    merge: self.released.record(n.class),
                    superseded: None,
                }
            }
        }
    }
}

/// What folding one notification into the inbox did.
enum Folded {
    Unexpected,
    Stale,
    Duplicate,
    Malformed,
    Recorded {
        merge: Merge,
        superseded: Option<HandleId>,
    },
}

impl NotificationSink for NotificationInbox {
    fn deliver(&self, n: Notification) {
        if n.tag != self.tag {
            debug!("ignoring {} notification for {}", n.kind.as_str(), n.tag);
            return;
        }
        let kind = n.kind.as_str();
        match self.with_payload(|p| self.fold(p, &n)) {
            Folded::Unexpected => {
                warn!("unexpected {} notification for {} {}, ignoring", kind, n.class, n.handle);
            }
            Folded::Stale => {
                warn!("stale {} notification for {} {}, ignoring", kind, n.class, n.handle);
            }
            Folded::Duplicate => {
                warn!("duplicate {} notification for {} {}, ignoring", kind, n.class, n.handle);
            }
            Folded::Malformed => {
                warn!("malformed {} notification for {} {}, ignoring", kind, n.class, n.handle);
            }
            Folded::Recorded { merge, superseded } => {
                if let Some(old) = superseded {
                    info!("{} {} replaces untaken offer {}", n.class, n.handle, old);
                }
                match merge {
                    Merge::Completed => {
                        debug!("all {} notifications received", kind);
                        match n.kind {
                            NotificationKind::Lent => self.lent_ready.signal(()),
                            NotificationKind::Released => self.released_ready.signal(()),
                        }
                    }
                    Merge::Pending => debug!("{} {} notification received", n.class, kind),
                    Merge::Duplicate => {}
                }
            }
        }
    }
}
