//! Property tests for shard allocation

use bundler_asset::{AssetClass, BundleAllocator};
use proptest::prelude::*;

proptest! {
    #[test]
    fn shard_indices_never_decrease(
        sizes in prop::collection::vec(1u64..8_000_000, 1..60),
        split in 1_000_000u64..20_000_000,
    ) {
        let mut alloc = BundleAllocator::new(split);
        let mut last = 0u32;
        for bytes in sizes {
            let slot = alloc.destination_for(AssetClass::Texture);
            prop_assert!(slot.shard >= last);
            let placed = alloc.commit(AssetClass::Texture, slot.shard, bytes);
            prop_assert_eq!(placed.shard, slot.shard);
            last = slot.shard;
        }
    }

    #[test]
    fn closed_shards_never_receive_new_files(
        sizes in prop::collection::vec(1u64..8_000_000, 1..60),
    ) {
        let mut alloc = BundleAllocator::new(10 * 1024 * 1024);
        let mut closed = Vec::new();
        for bytes in sizes {
            let slot = alloc.destination_for(AssetClass::Mesh);
            prop_assert!(!closed.contains(&slot.shard));
            if alloc.commit(AssetClass::Mesh, slot.shard, bytes).rolled_over {
                closed.push(slot.shard);
            }
        }
        let total: usize = alloc
            .shards_with_files(AssetClass::Mesh)
            .iter()
            .map(|s| alloc.state(AssetClass::Mesh).files_in(*s))
            .sum();
        prop_assert_eq!(total, alloc.totals(AssetClass::Mesh).files);
    }
}
