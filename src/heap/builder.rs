use super::layout::AllocateDescription;
use super::mem::Address;
use super::spine::{ArrayletLayout, Spine, SpineHeader, SPINE_CHUNKED, SPINE_HASHED};
use crate::config::Config;
use crate::double_map::DoubleMapManager;
use std::cmp;

/// Allocates one arraylet leaf.
///
/// Implemented by the surrounding collector's allocation interface. A call
/// may run a collection as a side effect, and a moving collection may
/// relocate the spine under construction; when that happens the allocator
/// must store the spine's new address into the description before returning.
/// Exhaustion is reported with `None`, never by panicking.
pub trait LeafAllocator {
    fn allocate_leaf(&mut self, desc: &mut AllocateDescription) -> Option<Address>;
}

/// Materializes an indexable object from a layout decision and the raw spine
/// bytes.
pub struct SpineBuilder<'a> {
    config: &'a Config,
    double_map: Option<&'a DoubleMapManager>,
}

impl<'a> SpineBuilder<'a> {
    pub fn new(config: &'a Config, double_map: Option<&'a DoubleMapManager>) -> SpineBuilder<'a> {
        SpineBuilder { config, double_map }
    }

    /// Writes the spine header into `raw` and connects the leaves the layout
    /// calls for.
    ///
    /// Returns `None` when a leaf allocation fails; the spine and any leaves
    /// attached so far are abandoned as floating garbage for the next
    /// collection to reclaim, and the caller should treat the allocation as a
    /// transient failure.
    pub fn materialize(
        &self,
        desc: &mut AllocateDescription,
        raw: Address,
        allocator: &mut dyn LeafAllocator,
    ) -> Option<Spine> {
        assert!(desc.element_size() <= u32::MAX as usize);

        let mut flags = 0;
        if desc.is_chunked() {
            flags |= SPINE_CHUNKED;
        }
        if desc.pre_hash() {
            flags |= SPINE_HASHED;
        }

        let spine = Spine::at(raw);
        spine.write_header(SpineHeader {
            layout: desc.layout(),
            flags,
            element_size: desc.element_size() as u32,
            element_count: desc.element_count(),
            arrayoid_slots: desc.arrayoid_slots(),
        });
        desc.set_spine(raw);

        let spine = match desc.layout() {
            ArrayletLayout::InlineContiguous => {
                assert_eq!(desc.arrayoid_slots(), 1);
                // All data is inline with the spine; no leaf pointers exist.
                spine
            }
            ArrayletLayout::Discontiguous | ArrayletLayout::Hybrid => {
                if desc.data_size() == 0 {
                    // Empty array: the arrayoid has no slots to initialize.
                    spine
                } else {
                    self.connect_leaves(desc, allocator)?
                }
            }
        };

        if desc.pre_hash() {
            spine.initialize_hash_slot(desc.hash_offset());
        }

        if let Some(double_map) = self.double_map {
            assert!(
                desc.layout() != ArrayletLayout::Hybrid,
                "hybrid arraylets cannot be double mapped"
            );

            // Single-leaf or inline data is already contiguous and skips the
            // mapping. A mapping failure is not an allocation failure; native
            // callers that needed the flat view fall back to copying.
            if spine.is_data_discontiguous(desc.leaf_size()) {
                double_map.map_contiguous(spine, desc.leaf_size(), desc.data_size());
            }
        }

        debug_assert_eq!(spine.address(), desc.spine());
        Some(spine)
    }

    /// Allocates a leaf per arrayoid slot and attaches each to the spine.
    ///
    /// The spine address is re-read from the description after every leaf
    /// allocation; a previously fetched pointer is stale the moment an
    /// allocation runs, since the collection it may trigger can move the
    /// spine.
    fn connect_leaves(
        &self,
        desc: &mut AllocateDescription,
        allocator: &mut dyn LeafAllocator,
    ) -> Option<Spine> {
        let leaf_size = desc.leaf_size();

        assert!(desc.bytes_requested() >= desc.contiguous_bytes());
        let mut bytes_remaining = desc.bytes_requested() - desc.contiguous_bytes();
        let mut slot = 0;

        while bytes_remaining > 0 {
            let leaf = match allocator.allocate_leaf(desc) {
                Some(leaf) => leaf,
                None => {
                    // The spine and the slot leaves attached so far are now
                    // floating garbage.
                    trace!(
                        "leaf allocation failed at arrayoid slot {}, abandoning spine {}",
                        slot,
                        desc.spine()
                    );
                    desc.clear_spine();
                    return None;
                }
            };

            // The collection the leaf allocation may have run can move the
            // spine; refetch before touching the arrayoid.
            let spine = Spine::at(desc.spine());
            spine.set_leaf(slot, leaf);

            bytes_remaining -= cmp::min(bytes_remaining, leaf_size);
            slot += 1;
        }

        let spine = Spine::at(desc.spine());

        match desc.layout() {
            ArrayletLayout::Discontiguous => {
                if slot == desc.arrayoid_slots() - 1 {
                    // The data size is an exact leaf multiple; the trailing
                    // slot references no leaf.
                    assert_eq!(desc.data_size() % leaf_size, 0);
                    spine.set_null_slot(slot);
                } else {
                    assert_ne!(desc.data_size() % leaf_size, 0);
                    assert_eq!(slot, desc.arrayoid_slots());
                }
            }
            ArrayletLayout::Hybrid => {
                // The final slot points at the inline remainder section,
                // spine-relative so a moving collection never has to fix it.
                assert_eq!(slot, desc.arrayoid_slots() - 1);

                let offset = super::spine::inline_data_offset(
                    desc.arrayoid_slots(),
                    self.config.align_spine_data,
                    self.config.object_alignment,
                );
                spine.set_inline_offset(slot, offset);
            }
            ArrayletLayout::InlineContiguous => unreachable!(),
        }

        Some(spine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::layout::LayoutEngine;
    use crate::heap::mem::align_usize;

    const LEAF: usize = 4096;

    fn test_config() -> Config {
        let mut config = Config::new();
        config.arraylet_leaf_size = LEAF;
        config
    }

    /// Hands out leaves from a pre-sized pool, optionally failing from a
    /// given call index on, optionally moving the spine on every call the way
    /// a collection triggered by the allocation would.
    struct PoolAllocator {
        leaves: Vec<Vec<u8>>,
        next: usize,
        fail_from: Option<usize>,
        relocations: Vec<Vec<usize>>,
        next_home: usize,
    }

    impl PoolAllocator {
        fn new(count: usize) -> PoolAllocator {
            PoolAllocator {
                leaves: (0..count).map(|_| vec![0u8; LEAF]).collect(),
                next: 0,
                fail_from: None,
                relocations: Vec::new(),
                next_home: 0,
            }
        }

        fn failing_from(count: usize, fail_from: usize) -> PoolAllocator {
            let mut allocator = PoolAllocator::new(count);
            allocator.fail_from = Some(fail_from);
            allocator
        }

        fn leaf_address(&self, index: usize) -> Address {
            Address::from_ptr(self.leaves[index].as_ptr())
        }
    }

    impl LeafAllocator for PoolAllocator {
        fn allocate_leaf(&mut self, desc: &mut AllocateDescription) -> Option<Address> {
            if Some(self.next) == self.fail_from {
                return None;
            }

            if self.next_home < self.relocations.len() {
                // Behave like a moving collection: copy the spine to a new
                // location and update the description.
                let old = desc.spine();
                let new = Address::from_ptr(self.relocations[self.next_home].as_ptr());
                self.next_home += 1;

                unsafe {
                    std::ptr::copy_nonoverlapping(
                        old.to_ptr::<u8>(),
                        new.to_mut_ptr::<u8>(),
                        desc.contiguous_bytes(),
                    );
                }
                desc.set_spine(new);
            }

            let leaf = self.leaf_address(self.next);
            self.next += 1;
            Some(leaf)
        }
    }

    // Word-backed so the header overlay is properly aligned.
    fn spine_buffer(desc: &AllocateDescription) -> Vec<usize> {
        vec![0usize; align_usize(desc.contiguous_bytes(), 8) / 8]
    }

    #[test]
    fn inline_contiguous_writes_no_leaf_pointers() {
        let config = test_config();
        let mut desc = LayoutEngine::new(&config).compute(16, 8, false, true).unwrap();
        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(0);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        assert_eq!(spine.header().layout, ArrayletLayout::InlineContiguous);
        assert_eq!(spine.arrayoid_slot(0), 0);
        assert_eq!(allocator.next, 0);
    }

    #[test]
    fn discontiguous_connects_every_leaf() {
        let config = test_config();
        // 10000 bytes: three leaves, remainder in the third.
        let mut desc = LayoutEngine::new(&config).compute(2500, 4, false, true).unwrap();
        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(3);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        let leaves = spine.leaf_addresses();
        assert_eq!(leaves.len(), 3);
        for (index, leaf) in leaves.iter().enumerate() {
            assert_eq!(*leaf, allocator.leaf_address(index));
        }
    }

    #[test]
    fn exact_multiple_nulls_the_trailing_slot() {
        let config = test_config();
        let mut desc = LayoutEngine::new(&config).compute(2048, 4, false, true).unwrap();
        assert_eq!(desc.arrayoid_slots(), 3);

        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(2);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        assert_eq!(spine.leaf_addresses().len(), 2);
        assert_eq!(spine.arrayoid_slot(2), 0);
    }

    #[test]
    fn leaf_failure_abandons_the_build() {
        let config = test_config();
        // Five leaves worth of data, failure at the third allocation.
        let mut desc = LayoutEngine::new(&config).compute(4500, 4, false, true).unwrap();
        assert_eq!(desc.physical_leaf_count(), 5);

        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::failing_from(5, 2);

        let result = SpineBuilder::new(&config, None).materialize(
            &mut desc,
            Address::from_ptr(buffer.as_ptr()),
            &mut allocator,
        );

        assert!(result.is_none());
        assert!(desc.spine().is_null());
        // Leaves 0 and 1 were handed out and never freed: floating garbage
        // for the next collection to reclaim.
        assert_eq!(allocator.next, 2);
    }

    #[test]
    fn zero_length_array_skips_arrayoid_initialization() {
        let config = test_config();
        let mut desc = LayoutEngine::new(&config).compute(0, 4, false, true).unwrap();
        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(0);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        assert_eq!(spine.header().arrayoid_slots, 0);
        assert_eq!(allocator.next, 0);
    }

    #[test]
    fn spine_relocation_mid_build_is_honoured() {
        let config = test_config();
        let mut desc = LayoutEngine::new(&config).compute(2500, 4, false, true).unwrap();
        let buffer = spine_buffer(&desc);

        let mut allocator = PoolAllocator::new(3);
        // Move the spine on every leaf allocation.
        allocator.relocations = (0..3)
            .map(|_| vec![0usize; align_usize(desc.contiguous_bytes(), 8) / 8])
            .collect();

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        // The final spine is not where the build started, and its arrayoid is
        // fully connected at the final address.
        assert_ne!(spine.address(), Address::from_ptr(buffer.as_ptr()));
        assert_eq!(spine.address(), desc.spine());

        let leaves = spine.leaf_addresses();
        assert_eq!(leaves.len(), 3);
        for (index, leaf) in leaves.iter().enumerate() {
            assert_eq!(*leaf, allocator.leaf_address(index));
        }
    }

    #[test]
    fn hybrid_terminal_slot_is_a_spine_relative_offset() {
        let mut config = test_config();
        config.hybrid_arraylets = true;
        let mut desc = LayoutEngine::new(&config).compute(2500, 4, false, true).unwrap();
        assert_eq!(desc.layout(), ArrayletLayout::Hybrid);

        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(2);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        let terminal = spine.arrayoid_slot(2);
        let expected =
            super::super::spine::inline_data_offset(3, config.align_spine_data, config.object_alignment);
        assert_eq!(terminal, expected);

        // The remainder section lies inside the spine allocation.
        assert!(terminal + desc.data_size() % LEAF <= desc.contiguous_bytes());
    }

    #[test]
    fn pre_hash_initializes_the_hash_slot() {
        let config = test_config();
        let mut desc = LayoutEngine::new(&config).compute(16, 8, true, true).unwrap();
        let buffer = spine_buffer(&desc);
        let mut allocator = PoolAllocator::new(0);

        let spine = SpineBuilder::new(&config, None)
            .materialize(&mut desc, Address::from_ptr(buffer.as_ptr()), &mut allocator)
            .unwrap();

        assert!(spine.header().is_hashed());
        let hash = unsafe { spine.address().offset(desc.hash_offset()).read_word() };
        assert_ne!(hash, 0);
    }
}
