use super::mem::Address;
use std::mem;

/// How the element data of an indexable object is laid out relative to its
/// spine.
///
/// The kind is chosen once by the layout engine and never changes for the
/// lifetime of the object.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ArrayletLayout {
    /// All data lives inline in the spine; no leaves exist.
    InlineContiguous = 0,

    /// All data lives in leaves referenced from the arrayoid.
    Discontiguous = 1,

    /// Full leaves plus a same-size-class remainder stored inline with the
    /// spine, referenced by the final arrayoid slot as a spine-relative
    /// offset.
    Hybrid = 2,
}

/// The spine is marked as chunked (element data not contiguous with the
/// header).
pub const SPINE_CHUNKED: u8 = 1 << 0;

/// A hash slot was reserved at the end of the spine.
pub const SPINE_HASHED: u8 = 1 << 1;

/// Fixed-layout spine header.
///
/// This is a plain overlay written directly into heap memory; it carries no
/// vtable so the binary layout is exactly what is declared here. The arrayoid
/// (one machine word per slot) is embedded immediately after the header.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct SpineHeader {
    pub layout: ArrayletLayout,
    pub flags: u8,
    pub element_size: u32,
    pub element_count: usize,
    pub arrayoid_slots: usize,
}

impl SpineHeader {
    pub fn data_size(&self) -> usize {
        self.element_count * self.element_size as usize
    }

    pub fn is_chunked(&self) -> bool {
        self.flags & SPINE_CHUNKED != 0
    }

    pub fn is_hashed(&self) -> bool {
        self.flags & SPINE_HASHED != 0
    }
}

/// Byte offset of the arrayoid within a spine.
pub fn arrayoid_offset() -> usize {
    mem::size_of::<SpineHeader>()
}

/// Byte offset of the inline data section for spines that carry data
/// (InlineContiguous and the hybrid remainder). The section starts past the
/// arrayoid, optionally rounded up to the object alignment.
pub fn inline_data_offset(arrayoid_slots: usize, align_data: bool, alignment: usize) -> usize {
    let past_arrayoid = arrayoid_offset() + arrayoid_slots * mem::size_of::<usize>();

    if align_data {
        super::mem::align_usize(past_arrayoid, alignment)
    } else {
        past_arrayoid
    }
}

/// A reference to a spine living in heap memory.
///
/// The wrapped address must point at a spine-sized allocation; a `Spine` is
/// only as stable as the object it names and must be refetched after any
/// operation that can move the object.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Spine(Address);

impl Spine {
    pub fn at(addr: Address) -> Spine {
        debug_assert!(!addr.is_null());
        Spine(addr)
    }

    pub fn address(self) -> Address {
        self.0
    }

    pub fn write_header(self, header: SpineHeader) {
        unsafe {
            *self.0.to_mut_ptr::<SpineHeader>() = header;
        }
    }

    pub fn header(self) -> SpineHeader {
        unsafe { *self.0.to_ptr::<SpineHeader>() }
    }

    fn slot_address(self, index: usize) -> Address {
        let slots = self.header().arrayoid_slots;
        assert!(index < slots, "arrayoid index {} out of range {}", index, slots);
        self.0
            .offset(arrayoid_offset() + index * mem::size_of::<usize>())
    }

    /// Raw arrayoid slot value: a leaf address, a spine-relative offset
    /// (hybrid final slot) or 0 (null).
    pub fn arrayoid_slot(self, index: usize) -> usize {
        unsafe { self.slot_address(index).read_word() }
    }

    pub fn set_leaf(self, index: usize, leaf: Address) {
        debug_assert!(!leaf.is_null());
        unsafe { self.slot_address(index).write_word(leaf.to_usize()) }
    }

    pub fn set_null_slot(self, index: usize) {
        unsafe { self.slot_address(index).write_word(0) }
    }

    /// Writes the hybrid terminal slot: a byte offset into the spine itself,
    /// not a heap pointer.
    pub fn set_inline_offset(self, index: usize, offset: usize) {
        unsafe { self.slot_address(index).write_word(offset) }
    }

    /// The leaf addresses of this spine in traversal order.
    ///
    /// Stops at the terminal slot when it is null (discontiguous exact
    /// multiple) or a spine-relative offset (hybrid remainder); neither names
    /// a leaf.
    pub fn leaf_addresses(self) -> Vec<Address> {
        let header = self.header();
        let mut leaves = Vec::with_capacity(header.arrayoid_slots);

        match header.layout {
            ArrayletLayout::InlineContiguous => {}
            ArrayletLayout::Discontiguous => {
                for index in 0..header.arrayoid_slots {
                    let value = self.arrayoid_slot(index);

                    if value == 0 {
                        break;
                    }

                    leaves.push(Address::from_usize(value));
                }
            }
            ArrayletLayout::Hybrid => {
                for index in 0..header.arrayoid_slots.saturating_sub(1) {
                    leaves.push(Address::from_usize(self.arrayoid_slot(index)));
                }
            }
        }

        leaves
    }

    /// Whether the element data actually spans more than one leaf. Spines
    /// whose data fits a single leaf are already contiguous in memory and
    /// never need a double map.
    pub fn is_data_discontiguous(self, leaf_size: usize) -> bool {
        let header = self.header();

        header.layout == ArrayletLayout::Discontiguous && header.data_size() > leaf_size
    }

    /// Fills the reserved hash slot. Only valid on spines built with the
    /// pre-hash flag.
    pub fn initialize_hash_slot(self, hash_offset: usize) {
        assert!(self.header().is_hashed());

        // Identity hash derived from the allocation address, as good as any
        // for a freshly built object.
        let hash = self.0.to_usize().wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 16;
        unsafe { self.0.offset(hash_offset).write_word(hash) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spine_in(buffer: &mut Vec<usize>, header: SpineHeader) -> Spine {
        let spine = Spine::at(Address::from_ptr(buffer.as_ptr()));
        spine.write_header(header);
        spine
    }

    fn header(layout: ArrayletLayout, slots: usize) -> SpineHeader {
        SpineHeader {
            layout,
            flags: if layout == ArrayletLayout::InlineContiguous {
                0
            } else {
                SPINE_CHUNKED
            },
            element_size: 8,
            element_count: 100,
            arrayoid_slots: slots,
        }
    }

    #[test]
    fn header_round_trips_through_memory() {
        let mut buffer = vec![0usize; 64];
        let spine = spine_in(&mut buffer, header(ArrayletLayout::Discontiguous, 3));

        let read = spine.header();
        assert_eq!(read.layout, ArrayletLayout::Discontiguous);
        assert_eq!(read.element_count, 100);
        assert_eq!(read.element_size, 8);
        assert_eq!(read.arrayoid_slots, 3);
        assert!(read.is_chunked());
        assert_eq!(read.data_size(), 800);
    }

    #[test]
    fn arrayoid_slots_read_back_in_order() {
        let mut buffer = vec![0usize; 64];
        let spine = spine_in(&mut buffer, header(ArrayletLayout::Discontiguous, 3));

        spine.set_leaf(0, Address::from_usize(0x10000));
        spine.set_leaf(1, Address::from_usize(0x20000));
        spine.set_null_slot(2);

        assert_eq!(spine.arrayoid_slot(0), 0x10000);
        assert_eq!(spine.arrayoid_slot(1), 0x20000);
        assert_eq!(spine.arrayoid_slot(2), 0);
        assert_eq!(
            spine.leaf_addresses(),
            vec![Address::from_usize(0x10000), Address::from_usize(0x20000)]
        );
    }

    #[test]
    fn hybrid_terminal_slot_is_not_a_leaf() {
        let mut buffer = vec![0usize; 64];
        let spine = spine_in(&mut buffer, header(ArrayletLayout::Hybrid, 2));

        spine.set_leaf(0, Address::from_usize(0x30000));
        spine.set_inline_offset(1, inline_data_offset(2, true, 8));

        assert_eq!(spine.leaf_addresses(), vec![Address::from_usize(0x30000)]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_slot_index_asserts() {
        let mut buffer = vec![0usize; 64];
        let spine = spine_in(&mut buffer, header(ArrayletLayout::Discontiguous, 2));

        spine.arrayoid_slot(2);
    }

    #[test]
    fn single_leaf_data_is_not_discontiguous() {
        let mut buffer = vec![0usize; 64];
        let spine = spine_in(&mut buffer, header(ArrayletLayout::Discontiguous, 1));

        // 800 bytes of data, 4 KiB leaves: one leaf, contiguous in memory.
        assert!(!spine.is_data_discontiguous(4096));
        assert!(spine.is_data_discontiguous(512));
    }
}
