//! Property-based tests for descriptor offer matching.
//! Verifies the set comparison holds for ALL orderings, not just fixed examples.

#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects, clippy::panic)]

use platform::{InterruptId, IoRegion, ResourceDescriptor, ResourceTag, MAX_IO_REGIONS};
use proptest::prelude::*;

/// Up to MAX_IO_REGIONS disjoint regions, one per 64 KiB slot.
fn disjoint_regions() -> impl Strategy<Value = Vec<IoRegion>> {
    proptest::collection::vec((0u64..0x8000, 1u64..=0x8000), 1..=MAX_IO_REGIONS).prop_map(
        |slots| {
            slots
                .into_iter()
                .zip(0u64..)
                .map(|((offset, size), slot)| IoRegion::new(slot * 0x1_0000 + offset, size))
                .collect()
        },
    )
}

proptest! {
    /// Any permutation of the configured regions matches the descriptor.
    #[test]
    fn offer_match_ignores_order(
        (regions, shuffled) in disjoint_regions()
            .prop_flat_map(|r| (Just(r.clone()), Just(r).prop_shuffle())),
        irq in 0u32..1024,
    ) {
        let desc = ResourceDescriptor::new(ResourceTag::Primary, &regions, InterruptId(irq));
        prop_assert!(desc.is_ok());
        let desc = desc.unwrap_or_else(|e| panic!("valid regions rejected: {e}"));
        prop_assert!(desc.matches_offer(&shuffled, InterruptId(irq)));
    }

    /// Changing the size of any one region breaks the match.
    #[test]
    fn offer_match_compares_sizes(
        regions in disjoint_regions(),
        pick in any::<prop::sample::Index>(),
    ) {
        let desc = ResourceDescriptor::new(ResourceTag::Secondary, &regions, InterruptId(7))
            .unwrap_or_else(|e| panic!("valid regions rejected: {e}"));
        let mut offered = regions.clone();
        let i = pick.index(offered.len());
        if let Some(region) = offered.get_mut(i) {
            region.size += 1;
        }
        prop_assert!(!desc.matches_offer(&offered, InterruptId(7)));
    }

    /// Any generated region list with an overlapping copy is rejected.
    #[test]
    fn overlapping_regions_are_rejected(regions in disjoint_regions()) {
        prop_assume!(regions.len() < MAX_IO_REGIONS);
        let mut with_dup = regions.clone();
        with_dup.push(regions[0]);
        let result = ResourceDescriptor::new(ResourceTag::Primary, &with_dup, InterruptId(1));
        prop_assert!(result.is_err());
    }
}
