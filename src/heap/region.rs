use super::builder::LeafAllocator;
use super::layout::AllocateDescription;
use super::mem::{Address, MemRegion};

/// Metadata for one heap region: its address range and where its bytes live
/// inside the backing physical store, which is what the virtual-memory layer
/// needs to re-map pages.
#[derive(Copy, Clone, Debug)]
pub struct RegionDescriptor {
    pub region: MemRegion,
    pub file_offset: usize,
}

impl RegionDescriptor {
    /// Physical-store offset of an address inside this region.
    pub fn file_offset_of(&self, addr: Address) -> usize {
        debug_assert!(self.region.contains(addr));
        self.file_offset + addr.offset_from(self.region.start)
    }
}

/// Address-to-region lookup over the registered heap regions.
pub struct HeapRegionManager {
    regions: Vec<RegionDescriptor>,
}

impl HeapRegionManager {
    pub fn new() -> HeapRegionManager {
        HeapRegionManager {
            regions: Vec::new(),
        }
    }

    pub fn add_region(&mut self, descriptor: RegionDescriptor) {
        self.regions.push(descriptor);
    }

    pub fn descriptor_for_address(&self, addr: Address) -> Option<&RegionDescriptor> {
        self.regions.iter().find(|d| d.region.contains(addr))
    }
}

impl Default for HeapRegionManager {
    fn default() -> HeapRegionManager {
        HeapRegionManager::new()
    }
}

/// Bump allocator for spine bytes: word aligned, no reclamation. Abandoned
/// spines stay where they are until a collection runs.
pub struct BumpAllocator {
    top: Address,
    end: Address,
}

impl BumpAllocator {
    pub fn new(region: MemRegion) -> BumpAllocator {
        BumpAllocator {
            top: region.start,
            end: region.end,
        }
    }

    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        let result = self.top.align_up(8);
        let new_top = result.offset(size);

        if new_top > self.end {
            return None;
        }

        self.top = new_top;
        Some(result)
    }
}

/// Carves fixed-size leaves out of a region whose start and leaf size are
/// both page aligned, so every leaf stays individually re-mappable.
pub struct BumpLeafAllocator {
    top: Address,
    end: Address,
    leaf_size: usize,
}

impl BumpLeafAllocator {
    pub fn new(region: MemRegion, leaf_size: usize) -> BumpLeafAllocator {
        BumpLeafAllocator {
            top: region.start,
            end: region.end,
            leaf_size,
        }
    }
}

impl LeafAllocator for BumpLeafAllocator {
    fn allocate_leaf(&mut self, _desc: &mut AllocateDescription) -> Option<Address> {
        let result = self.top;
        let new_top = result.offset(self.leaf_size);

        if new_top > self.end {
            return None;
        }

        self.top = new_top;
        Some(result)
    }
}
