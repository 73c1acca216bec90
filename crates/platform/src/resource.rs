//! Resource Descriptor — which IO ranges and which interrupt line move between
//! domains during a trusted touch session.
//!
//! The descriptor is built once from board configuration and never changes.
//! Both sides build their own copy: the owner lends exactly this set, the
//! borrower only accepts an offer that matches it.
//!
//! # Region semantics
//!
//! An [`IoRegion`] is the half-open range `[base, base + size)`. Regions in a
//! descriptor are non-empty and pairwise disjoint. Offers are compared as
//! sets: the order in which either side lists its regions is irrelevant.

use core::fmt;

/// Maximum number of IO regions in one descriptor.
///
/// Touch controllers expose a bus controller window plus a handful of GPIO
/// pads (reset, interrupt); eight covers every layout seen so far.
pub const MAX_IO_REGIONS: usize = 8;

/// Fixed-capacity list of IO regions.
pub type RegionList = heapless::Vec<IoRegion, MAX_IO_REGIONS>;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Reasons a descriptor cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorError {
    /// No IO region was supplied.
    #[error("descriptor has no IO regions")]
    Empty,
    /// More than [`MAX_IO_REGIONS`] regions were supplied.
    #[error("descriptor has more than {MAX_IO_REGIONS} IO regions")]
    TooManyRegions,
    /// A region has size zero.
    #[error("IO region at {base:#x} has zero size")]
    ZeroSize {
        /// Base address of the offending region.
        base: u64,
    },
    /// `base + size` does not fit in the address space.
    #[error("IO region at {base:#x} overflows the address space")]
    Overflow {
        /// Base address of the offending region.
        base: u64,
    },
    /// Two regions share at least one address.
    #[error("IO regions at {first:#x} and {second:#x} overlap")]
    Overlap {
        /// Base address of the lower region.
        first: u64,
        /// Base address of the region that overlaps it.
        second: u64,
    },
}

// ── IoRegion ─────────────────────────────────────────────────────────────────

/// One memory-mapped IO range, `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoRegion {
    /// First address of the range.
    pub base: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl IoRegion {
    /// Create a region without validation; [`ResourceDescriptor::new`] validates.
    #[must_use]
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last address, or `None` if the range overflows.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.size)
    }

    /// Returns `true` if the two ranges share at least one address.
    ///
    /// Overflowing ranges never overlap anything (they are rejected earlier).
    #[must_use]
    pub fn overlaps(&self, other: &IoRegion) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.base < b_end && other.base < a_end,
            _ => false,
        }
    }
}

impl fmt::Display for IoRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "[{:#x}, {:#x})", self.base, end),
            None => write!(f, "[{:#x}, +{:#x})", self.base, self.size),
        }
    }
}

// ── InterruptId ──────────────────────────────────────────────────────────────

/// Hardware interrupt number of the touch controller line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct InterruptId(pub u32);

impl InterruptId {
    /// Return the raw interrupt number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InterruptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq {}", self.0)
    }
}

// ── ResourceTag / ResourceClass ──────────────────────────────────────────────

/// Which touch resource set a protocol instance governs.
///
/// Devices with two touch panels run two independent instances; the tag keeps
/// their notifications apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResourceTag {
    /// The main touch panel.
    #[default]
    Primary = 0,
    /// A second touch panel (foldables, dual-screen devices).
    Secondary = 1,
}

impl ResourceTag {
    /// Static identifier reported through the control surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parse the identifier produced by [`as_str`][Self::as_str].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two kinds of resource moved by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResourceClass {
    /// All IO regions of the descriptor, moved as one combined transfer.
    Memory,
    /// The controller interrupt line.
    Interrupt,
}

impl ResourceClass {
    /// Both classes, in lend order.
    pub const ALL: [ResourceClass; 2] = [ResourceClass::Memory, ResourceClass::Interrupt];

    /// Short lowercase name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ResourceDescriptor ───────────────────────────────────────────────────────

/// Immutable description of the resource set subject to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceDescriptor {
    tag: ResourceTag,
    regions: RegionList,
    irq: InterruptId,
}

impl ResourceDescriptor {
    /// Build a descriptor, validating every region.
    ///
    /// # Errors
    ///
    /// See [`DescriptorError`]: empty or oversized list, zero-sized or
    /// overflowing regions, overlapping regions.
    pub fn new(
        tag: ResourceTag,
        regions: &[IoRegion],
        irq: InterruptId,
    ) -> Result<Self, DescriptorError> {
        if regions.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let list = RegionList::from_slice(regions).map_err(|_| DescriptorError::TooManyRegions)?;

        for region in &list {
            if region.size == 0 {
                return Err(DescriptorError::ZeroSize { base: region.base });
            }
            if region.end().is_none() {
                return Err(DescriptorError::Overflow { base: region.base });
            }
        }

        let mut sorted = list.clone();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            if let [lower, upper] = pair {
                if lower.overlaps(upper) {
                    return Err(DescriptorError::Overlap {
                        first: lower.base,
                        second: upper.base,
                    });
                }
            }
        }

        Ok(Self {
            tag,
            regions: list,
            irq,
        })
    }

    /// Resource set this descriptor belongs to.
    #[must_use]
    pub fn tag(&self) -> ResourceTag {
        self.tag
    }

    /// IO regions, in configuration order.
    #[must_use]
    pub fn regions(&self) -> &[IoRegion] {
        &self.regions
    }

    /// The interrupt line.
    #[must_use]
    pub fn irq(&self) -> InterruptId {
        self.irq
    }

    /// Returns `true` if `regions` is exactly this descriptor's region set.
    ///
    /// Both lists are sorted independently before comparison, so offers that
    /// list the same regions in a different order still match. Base and size
    /// must both agree.
    #[must_use]
    pub fn matches_regions(&self, regions: &[IoRegion]) -> bool {
        if regions.len() != self.regions.len() {
            return false;
        }
        let Ok(mut offered) = RegionList::from_slice(regions) else {
            return false;
        };
        let mut expected = self.regions.clone();
        offered.sort_unstable();
        expected.sort_unstable();
        offered == expected
    }

    /// Returns `true` if an offer of `regions` plus `irq` is exactly this descriptor.
    #[must_use]
    pub fn matches_offer(&self, regions: &[IoRegion], irq: InterruptId) -> bool {
        irq == self.irq && self.matches_regions(regions)
    }
}
