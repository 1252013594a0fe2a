//! Heap-side arraylet machinery: spine layout, leaf connection and the
//! region bookkeeping double mapping needs.

pub mod builder;
pub mod layout;
pub mod mem;
pub mod region;
pub mod spine;

use std::fmt;

/// Why an indexable allocation could not be satisfied.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// The request is refused by policy: a chunked layout was asked for
    /// outside a GC-safe point (retry from one), or the requested size
    /// cannot be represented at all.
    Denied,

    /// The heap could not supply the memory right now. Retry after a
    /// collection.
    Transient,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::Denied => write!(f, "allocation denied outside a GC-safe point"),
            AllocError::Transient => write!(f, "allocation failed, retry after a collection"),
        }
    }
}

impl std::error::Error for AllocError {}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use self::builder::SpineBuilder;
        use self::layout::LayoutEngine;
        use self::mem::{align_usize, page_size, Address, MemRegion};
        use self::region::{BumpAllocator, BumpLeafAllocator, HeapRegionManager, RegionDescriptor};
        use self::spine::Spine;
        use crate::config::Config;
        use crate::double_map::{double_map_supported, DoubleMapManager};
        use crate::double_map::vmem::SharedHeapFile;
        use parking_lot::Mutex;
        use std::sync::Arc;

        /// A shared-file backed heap that can allocate indexable objects and
        /// double map the discontiguous ones.
        ///
        /// The backing file is split into a spine area and a leaf area. Both
        /// are bump allocated; this heap exists to exercise the arraylet
        /// machinery end to end, not to be a general-purpose allocator.
        pub struct ArrayletHeap {
            config: Config,
            backing: Arc<SharedHeapFile>,
            spines: Mutex<BumpAllocator>,
            leaves: Mutex<BumpLeafAllocator>,
            double_map: Option<DoubleMapManager>,
        }

        impl ArrayletHeap {
            /// Creates a heap with dedicated spine and leaf capacities, both
            /// rounded up to whole pages.
            pub fn new(
                config: Config,
                spine_capacity: usize,
                leaf_capacity: usize,
            ) -> Result<ArrayletHeap, String> {
                config.verify()?;

                let page = page_size();
                let spine_capacity = align_usize(spine_capacity, page);
                let leaf_capacity = align_usize(leaf_capacity, page);

                let backing = Arc::new(SharedHeapFile::new(spine_capacity + leaf_capacity)?);
                let base = backing.base();

                let spine_area = MemRegion::new(base, base.offset(spine_capacity));
                let leaf_area = MemRegion::new(
                    base.offset(spine_capacity),
                    base.offset(spine_capacity + leaf_capacity),
                );

                let double_map = if config.enable_double_map && double_map_supported() {
                    let mut regions = HeapRegionManager::new();
                    regions.add_region(RegionDescriptor {
                        region: leaf_area,
                        file_offset: spine_capacity,
                    });

                    let vmem: Arc<dyn crate::double_map::VirtualMemory> = backing.clone();

                    Some(DoubleMapManager::new(vmem, Arc::new(regions)))
                } else {
                    None
                };

                Ok(ArrayletHeap {
                    spines: Mutex::new(BumpAllocator::new(spine_area)),
                    leaves: Mutex::new(BumpLeafAllocator::new(
                        leaf_area,
                        config.arraylet_leaf_size,
                    )),
                    config,
                    backing,
                    double_map,
                })
            }

            /// Allocates and fully initializes one indexable object.
            ///
            /// `gc_allowed` states whether the caller sits at a GC-safe
            /// point; chunked layouts are refused with [`AllocError::Denied`]
            /// when it does not.
            pub fn allocate_indexable_object(
                &self,
                element_count: usize,
                element_size: usize,
                pre_hash: bool,
                gc_allowed: bool,
            ) -> Result<Spine, AllocError> {
                let engine = LayoutEngine::new(&self.config);
                let mut desc = engine.compute(element_count, element_size, pre_hash, gc_allowed)?;

                let raw = self
                    .spines
                    .lock()
                    .allocate(desc.contiguous_bytes())
                    .ok_or(AllocError::Transient)?;

                let builder = SpineBuilder::new(&self.config, self.double_map.as_ref());
                let mut leaves = self.leaves.lock();

                builder
                    .materialize(&mut desc, raw, &mut *leaves)
                    .ok_or(AllocError::Transient)
            }

            /// The contiguous view over a discontiguous object's data,
            /// establishing it first if none exists yet.
            pub fn double_map(&self, spine: Spine) -> Option<Address> {
                let double_map = self.double_map.as_ref()?;

                if let Some(view) = double_map.contiguous_view(spine.address()) {
                    return Some(view);
                }

                if !spine.is_data_discontiguous(self.config.arraylet_leaf_size) {
                    return None;
                }

                double_map
                    .map_contiguous(
                        spine,
                        self.config.arraylet_leaf_size,
                        spine.header().data_size(),
                    )
                    // A concurrent caller may have won the registration; its
                    // view serves us just as well.
                    .or_else(|| double_map.contiguous_view(spine.address()))
            }

            /// Drops the contiguous view registered for a spine, typically
            /// when the object dies or moves.
            pub fn release_double_map(&self, spine_addr: Address) -> bool {
                match self.double_map.as_ref() {
                    Some(double_map) => double_map.unmap(spine_addr),
                    None => false,
                }
            }

            pub fn config(&self) -> &Config {
                &self.config
            }

            pub fn double_mapping_enabled(&self) -> bool {
                self.double_map.is_some()
            }

            pub fn active_double_maps(&self) -> usize {
                self.double_map
                    .as_ref()
                    .map(|dm| dm.active_mappings())
                    .unwrap_or(0)
            }

            /// The heap's primary mapping, mostly useful to tests.
            pub fn backing_region(&self) -> MemRegion {
                self.backing.region()
            }
        }
    }
}
