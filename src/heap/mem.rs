use std::fmt;

/// An untyped heap address.
///
/// All raw pointer arithmetic in the crate goes through this type; a null
/// address marks an empty arrayoid slot.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    pub fn null() -> Address {
        Address(0)
    }

    pub fn from_usize(value: usize) -> Address {
        Address(value)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    pub fn to_usize(self) -> usize {
        self.0
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    /// Byte distance to a lower address.
    pub fn offset_from(self, base: Address) -> usize {
        debug_assert!(base.0 <= self.0);
        self.0 - base.0
    }

    pub fn align_up(self, alignment: usize) -> Address {
        Address(align_usize(self.0, alignment))
    }

    pub fn is_aligned(self, alignment: usize) -> bool {
        self.0 % alignment == 0
    }

    /// Reads one machine word at this address.
    pub unsafe fn read_word(self) -> usize {
        *self.to_ptr::<usize>()
    }

    /// Writes one machine word at this address.
    pub unsafe fn write_word(self, value: usize) {
        *self.to_mut_ptr::<usize>() = value;
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A half-open address range `[start, end)`.
#[derive(Copy, Clone, Debug)]
pub struct MemRegion {
    pub start: Address,
    pub end: Address,
}

impl MemRegion {
    pub fn new(start: Address, end: Address) -> MemRegion {
        debug_assert!(start <= end);
        MemRegion { start, end }
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    pub fn size(&self) -> usize {
        self.end.to_usize() - self.start.to_usize()
    }
}

/// Rounds `value` up to a multiple of `align` (`align` must be non-zero).
pub fn align_usize(value: usize, align: usize) -> usize {
    debug_assert!(align != 0);
    (value + align - 1) / align * align
}

/// The operating system page size, the granularity of all virtual-memory
/// mapping requests.
pub fn page_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        } else {
            4096
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_to_ceiling() {
        assert_eq!(align_usize(0, 8), 0);
        assert_eq!(align_usize(1, 8), 8);
        assert_eq!(align_usize(8, 8), 8);
        assert_eq!(align_usize(9, 8), 16);
    }

    #[test]
    fn address_arithmetic() {
        let base = Address::from_usize(0x1000);
        assert_eq!(base.offset(0x10).to_usize(), 0x1010);
        assert_eq!(base.offset(0x10).offset_from(base), 0x10);
        assert_eq!(base.offset(3).align_up(8).to_usize(), 0x1008);
        assert!(Address::null().is_null());
        assert!(!base.is_null());
    }

    #[test]
    fn region_bounds_are_half_open() {
        let region = MemRegion::new(Address::from_usize(0x1000), Address::from_usize(0x2000));
        assert!(region.contains(Address::from_usize(0x1000)));
        assert!(region.contains(Address::from_usize(0x1fff)));
        assert!(!region.contains(Address::from_usize(0x2000)));
        assert_eq!(region.size(), 0x1000);
    }

    #[test]
    fn page_size_is_a_power_of_two() {
        let size = page_size();
        assert!(size.is_power_of_two());
    }
}
