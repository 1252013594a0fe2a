use super::mem::{align_usize, Address};
use super::spine::{arrayoid_offset, inline_data_offset, ArrayletLayout};
use super::AllocError;
use crate::config::Config;
use std::mem;

/// Finalized allocation request for one indexable object.
///
/// Produced by the [`LayoutEngine`], consumed once by the spine builder and
/// discarded. While leaves are being attached the description tracks the
/// spine's *current* address: a collection triggered by a leaf allocation may
/// move the spine, in which case the allocator rewrites `spine` and every
/// later access must go through [`AllocateDescription::spine`] again.
#[derive(Debug)]
pub struct AllocateDescription {
    layout: ArrayletLayout,
    element_count: usize,
    element_size: usize,
    data_size: usize,
    arrayoid_slots: usize,
    leaf_size: usize,
    bytes_requested: usize,
    contiguous_bytes: usize,
    hash_offset: usize,
    chunked: bool,
    gc_allowed: bool,
    pre_hash: bool,
    spine: Address,
}

impl AllocateDescription {
    pub fn layout(&self) -> ArrayletLayout {
        self.layout
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Number of arrayoid slots. For a
    /// discontiguous array whose data size is an exact leaf multiple this is
    /// one more than the number of physical leaves; the trailing slot stays
    /// null.
    pub fn arrayoid_slots(&self) -> usize {
        self.arrayoid_slots
    }

    /// Number of leaves that actually get allocated.
    pub fn physical_leaf_count(&self) -> usize {
        match self.layout {
            ArrayletLayout::InlineContiguous => 0,
            ArrayletLayout::Discontiguous => {
                (self.data_size + self.leaf_size - 1) / self.leaf_size
            }
            ArrayletLayout::Hybrid => self.arrayoid_slots - 1,
        }
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Total bytes for the request: spine plus all leaf bytes.
    pub fn bytes_requested(&self) -> usize {
        self.bytes_requested
    }

    /// Bytes of the spine allocation itself.
    pub fn contiguous_bytes(&self) -> usize {
        self.contiguous_bytes
    }

    /// Byte offset of the reserved hash slot; only meaningful when
    /// `pre_hash()` is set.
    pub fn hash_offset(&self) -> usize {
        self.hash_offset
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn is_gc_allowed(&self) -> bool {
        self.gc_allowed
    }

    pub fn pre_hash(&self) -> bool {
        self.pre_hash
    }

    /// The spine's current location, or null before the spine bytes were
    /// attached / after the build was abandoned.
    pub fn spine(&self) -> Address {
        self.spine
    }

    /// Records a (new) spine location. Called by the builder when the raw
    /// bytes are attached and by leaf allocators whose collection moved the
    /// spine.
    pub fn set_spine(&mut self, spine: Address) {
        self.spine = spine;
    }

    pub fn clear_spine(&mut self) {
        self.spine = Address::null();
    }
}

/// Computes the layout decision and byte sizes for an indexable object
/// allocation request. Pure: no allocation happens here.
pub struct LayoutEngine<'a> {
    config: &'a Config,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(config: &'a Config) -> LayoutEngine<'a> {
        LayoutEngine { config }
    }

    /// Decides how the array is laid out and how many bytes the request
    /// needs.
    ///
    /// `gc_allowed` tells the engine whether the caller sits at a point where
    /// leaf allocation may trigger a collection. Chunked layouts allocate
    /// leaves one by one and are therefore only selectable when that is true
    /// (or the array is empty and no leaf is ever needed); otherwise the
    /// request is denied and the caller must retry from a GC-safe point.
    pub fn compute(
        &self,
        element_count: usize,
        element_size: usize,
        pre_hash: bool,
        gc_allowed: bool,
    ) -> Result<AllocateDescription, AllocError> {
        let leaf_size = self.config.arraylet_leaf_size;
        // A data size that cannot be represented can never be satisfied, no
        // matter how much is collected.
        let data_size = element_count
            .checked_mul(element_size)
            .ok_or(AllocError::Denied)?;

        let (layout, arrayoid_slots) = if data_size == 0 {
            (ArrayletLayout::Discontiguous, 0)
        } else if data_size <= leaf_size {
            (ArrayletLayout::InlineContiguous, 1)
        } else if self.config.hybrid_arraylets {
            (ArrayletLayout::Hybrid, data_size / leaf_size + 1)
        } else {
            (ArrayletLayout::Discontiguous, data_size / leaf_size + 1)
        };

        let mut spine_bytes = self.spine_size(layout, arrayoid_slots, data_size);
        let mut hash_offset = 0;

        if pre_hash {
            // The hash slot lands at the current end of the spine; grow the
            // spine by one word to hold it.
            hash_offset = spine_bytes;
            spine_bytes += mem::size_of::<usize>();
        }

        spine_bytes = align_usize(spine_bytes, self.config.object_alignment);

        // Bytes laid out besides the spine, in leaves.
        let (layout_bytes, chunked) = match layout {
            ArrayletLayout::InlineContiguous => (0, false),
            ArrayletLayout::Discontiguous => {
                if !gc_allowed && data_size > 0 {
                    return Err(AllocError::Denied);
                }

                (data_size, true)
            }
            ArrayletLayout::Hybrid => {
                assert!(arrayoid_slots > 0);

                if !gc_allowed {
                    return Err(AllocError::Denied);
                }

                (leaf_size * (arrayoid_slots - 1), true)
            }
        };

        if chunked {
            trace!(
                "chunked arraylet layout: {} elements, {} spine bytes, {} arrayoid slots",
                element_count,
                spine_bytes,
                arrayoid_slots
            );
        }

        Ok(AllocateDescription {
            layout,
            element_count,
            element_size,
            data_size,
            arrayoid_slots,
            leaf_size,
            bytes_requested: spine_bytes + layout_bytes,
            contiguous_bytes: spine_bytes,
            hash_offset,
            chunked,
            gc_allowed,
            pre_hash,
            spine: Address::null(),
        })
    }

    /// Spine byte size for a layout, before hash and alignment adjustments.
    /// A pure query over object metadata.
    fn spine_size(&self, layout: ArrayletLayout, arrayoid_slots: usize, data_size: usize) -> usize {
        let word = mem::size_of::<usize>();

        match layout {
            ArrayletLayout::InlineContiguous => {
                self.inline_data_offset(arrayoid_slots) + data_size
            }
            ArrayletLayout::Discontiguous => arrayoid_offset() + arrayoid_slots * word,
            ArrayletLayout::Hybrid => {
                self.inline_data_offset(arrayoid_slots)
                    + data_size % self.config.arraylet_leaf_size
            }
        }
    }

    pub fn inline_data_offset(&self, arrayoid_slots: usize) -> usize {
        inline_data_offset(
            arrayoid_slots,
            self.config.align_spine_data,
            self.config.object_alignment,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_leaf(leaf: usize) -> Config {
        let mut config = Config::new();
        config.arraylet_leaf_size = leaf;
        config
    }

    #[test]
    fn small_data_is_inline_contiguous() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        let desc = engine.compute(100, 8, false, true).unwrap();
        assert_eq!(desc.layout(), ArrayletLayout::InlineContiguous);
        assert_eq!(desc.arrayoid_slots(), 1);
        assert_eq!(desc.physical_leaf_count(), 0);
        assert!(!desc.is_chunked());
        assert_eq!(desc.bytes_requested(), desc.contiguous_bytes());
    }

    #[test]
    fn zero_length_array_is_trivially_discontiguous() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        // Allowed even when GC is not, since no leaf is ever allocated.
        let desc = engine.compute(0, 4, false, false).unwrap();
        assert_eq!(desc.layout(), ArrayletLayout::Discontiguous);
        assert_eq!(desc.arrayoid_slots(), 0);
        assert_eq!(desc.physical_leaf_count(), 0);
    }

    #[test]
    fn discontiguous_leaf_count_covers_data() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        for &(count, size) in &[(1025usize, 4usize), (4097, 1), (10000, 8), (4096, 3)] {
            let desc = engine.compute(count, size, false, true).unwrap();
            assert_eq!(desc.layout(), ArrayletLayout::Discontiguous);

            let leaves = desc.physical_leaf_count();
            let data = count * size;
            assert!((leaves - 1) * 4096 < data);
            assert!(data <= leaves * 4096);
        }
    }

    #[test]
    fn exact_leaf_multiple_gets_trailing_empty_slot() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        let desc = engine.compute(2048, 4, false, true).unwrap();
        assert_eq!(desc.data_size(), 8192);
        assert_eq!(desc.physical_leaf_count(), 2);
        assert_eq!(desc.arrayoid_slots(), 3);
    }

    #[test]
    fn chunked_layout_denied_without_gc() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        match engine.compute(10000, 8, false, false) {
            Err(AllocError::Denied) => {}
            other => panic!("expected denial, got {:?}", other.map(|d| d.layout())),
        }
    }

    #[test]
    fn hybrid_keeps_remainder_inline() {
        let mut config = config_with_leaf(4096);
        config.hybrid_arraylets = true;
        let engine = LayoutEngine::new(&config);

        let desc = engine.compute(2500, 4, false, true).unwrap();
        assert_eq!(desc.layout(), ArrayletLayout::Hybrid);
        // 10000 bytes: two full leaves, 1808 bytes inline.
        assert_eq!(desc.arrayoid_slots(), 3);
        assert_eq!(desc.physical_leaf_count(), 2);
        assert_eq!(
            desc.bytes_requested(),
            desc.contiguous_bytes() + 2 * 4096
        );
        assert!(desc.contiguous_bytes() > engine.inline_data_offset(3));

        // And hybrid also requires a GC-safe allocation path.
        assert!(matches!(
            engine.compute(2500, 4, false, false),
            Err(AllocError::Denied)
        ));
    }

    #[test]
    fn pre_hash_reserves_one_word() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        let plain = engine.compute(100, 8, false, true).unwrap();
        let hashed = engine.compute(100, 8, true, true).unwrap();

        assert_eq!(hashed.hash_offset(), plain.contiguous_bytes());
        assert!(hashed.contiguous_bytes() >= plain.contiguous_bytes() + mem::size_of::<usize>());
    }

    #[test]
    fn unrepresentable_data_size_is_rejected_outright() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        // No collection can make an overflowing size allocatable.
        assert!(matches!(
            engine.compute(usize::MAX, 8, false, true),
            Err(AllocError::Denied)
        ));
    }

    #[test]
    fn spine_starts_unattached() {
        let config = config_with_leaf(4096);
        let engine = LayoutEngine::new(&config);

        let desc = engine.compute(10000, 8, false, true).unwrap();
        assert!(desc.spine().is_null());
    }
}
