//! Double mapping of discontiguous arraylet leaves.
//!
//! A discontiguous array's leaves are scattered across the heap, which makes
//! bulk operations (JNI critical sections, intrinsics) pay a per-leaf tax.
//! Double mapping re-maps the physical pages behind those leaves into one
//! fresh contiguous virtual range, so the same bytes are reachable both
//! leaf-by-leaf through the arrayoid and flat through the contiguous view.

pub mod table;
pub mod vmem;

pub use self::table::{AddressRangeEntry, AddressRangeTable};
pub use self::vmem::{double_map_supported, PhysicalRun, VirtualMemory, VmemIdentifier};

use crate::heap::mem::{align_usize, page_size, Address};
use crate::heap::region::HeapRegionManager;
use crate::heap::spine::Spine;
use std::sync::Arc;

/// Owns the registry of active double maps and drives the platform layer to
/// create and destroy them.
///
/// Concurrent requests for the same spine are legal; exactly one wins the
/// table insert and the loser tears its own mapping down again. The table
/// lock is never held across a mapping or unmapping syscall.
pub struct DoubleMapManager {
    vmem: Arc<dyn VirtualMemory>,
    regions: Arc<HeapRegionManager>,
    table: AddressRangeTable,
    page_size: usize,
}

impl DoubleMapManager {
    pub fn new(vmem: Arc<dyn VirtualMemory>, regions: Arc<HeapRegionManager>) -> DoubleMapManager {
        DoubleMapManager {
            vmem,
            regions,
            table: AddressRangeTable::new(),
            page_size: page_size(),
        }
    }

    /// Builds a contiguous view over the spine's leaves and registers it.
    ///
    /// Returns the view's base address, or `None` when the platform mapping
    /// fails. Failure is not fatal to the allocation that requested it; the
    /// object simply stays leaf-only.
    pub fn map_contiguous(
        &self,
        spine: Spine,
        leaf_size: usize,
        data_size: usize,
    ) -> Option<Address> {
        let spine_addr = spine.address();
        let leaf_addrs = spine.leaf_addresses();

        // A single-leaf or inline spine is already contiguous.
        assert!(leaf_addrs.len() >= 2, "double map of contiguous data");
        assert_eq!(leaf_addrs.len(), (data_size + leaf_size - 1) / leaf_size);
        assert_eq!(leaf_size % self.page_size, 0);

        let mut runs = Vec::with_capacity(leaf_addrs.len());

        for (index, leaf) in leaf_addrs.iter().enumerate() {
            debug_assert!(leaf.is_aligned(self.page_size));

            let descriptor = match self.regions.descriptor_for_address(*leaf) {
                Some(descriptor) => descriptor,
                None => {
                    warn!("leaf {} not backed by any mapped region, cannot double map", leaf);
                    return None;
                }
            };

            // The last leaf may be partially filled; the run still has to
            // cover whole pages of it.
            let used = std::cmp::min(leaf_size, data_size - index * leaf_size);

            runs.push(PhysicalRun {
                offset: descriptor.file_offset_of(*leaf),
                len: align_usize(used, self.page_size),
            });
        }

        let total_size = align_usize(data_size, self.page_size);

        // Syscalls happen outside the table lock.
        let (contiguous, identifier) = self.vmem.reserve_and_map(&runs, total_size)?;

        let inserted = self.table.insert_if_absent(AddressRangeEntry {
            spine_addr,
            contiguous,
            identifier,
            leaf_addrs,
            data_size,
        });

        if !inserted {
            // Another thread mapped this spine first. Our mapping is
            // redundant; discard it and report the conflict to the caller.
            trace!("spine {} already double mapped, discarding duplicate", spine_addr);
            self.vmem.unmap(contiguous, identifier.size, &identifier);
            return None;
        }

        trace!(
            "double mapped spine {} over {} leaves at {}",
            spine_addr,
            runs.len(),
            contiguous
        );

        Some(contiguous)
    }

    /// Tears down the double map registered for a spine. Returns false when
    /// no mapping was registered or the unmap syscall failed.
    ///
    /// The entry is removed from the table unconditionally; a failed syscall
    /// leaks the address range and is logged, but the registry stays
    /// consistent either way.
    pub fn unmap(&self, spine_addr: Address) -> bool {
        let entry = match self.table.find_and_remove(spine_addr) {
            Some(entry) => entry,
            None => return false,
        };

        let released = self
            .vmem
            .unmap(entry.contiguous, entry.identifier.size, &entry.identifier);

        if !released {
            warn!(
                "failed to unmap contiguous range {} for spine {}",
                entry.contiguous, spine_addr
            );
        }

        released
    }

    /// Looks up the contiguous view registered for a spine, if any.
    pub fn contiguous_view(&self, spine_addr: Address) -> Option<Address> {
        self.table.contiguous_for(spine_addr)
    }

    pub fn active_mappings(&self) -> usize {
        self.table.len()
    }
}
