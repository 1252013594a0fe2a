use super::vmem::VmemIdentifier;
use crate::heap::mem::Address;
use ahash::AHashMap;
use parking_lot::Mutex;

/// One active double map: the spine's heap address keyed to its contiguous
/// counterpart, plus everything needed to take the mapping down again.
#[derive(Debug)]
pub struct AddressRangeEntry {
    pub spine_addr: Address,
    pub contiguous: Address,
    pub identifier: VmemIdentifier,
    pub leaf_addrs: Vec<Address>,
    pub data_size: usize,
}

/// Process-wide registry of active double maps.
///
/// The map is fully encapsulated: the only operations are conditional insert
/// and removal, both under the internal lock. Callers never hold the lock
/// across the mapping syscalls themselves, so slow kernel calls cannot stall
/// unrelated lookups.
pub struct AddressRangeTable {
    entries: Mutex<AHashMap<usize, AddressRangeEntry>>,
}

impl AddressRangeTable {
    pub fn new() -> AddressRangeTable {
        AddressRangeTable {
            entries: Mutex::new(AHashMap::new()),
        }
    }

    /// Inserts the entry unless one already exists for the same spine
    /// address. Returns false on a duplicate, leaving the existing entry
    /// untouched; the caller owns the rejected mapping and must tear it down.
    pub fn insert_if_absent(&self, entry: AddressRangeEntry) -> bool {
        let mut entries = self.entries.lock();
        let key = entry.spine_addr.to_usize();

        if entries.contains_key(&key) {
            return false;
        }

        entries.insert(key, entry);
        true
    }

    /// Removes and returns the entry for a spine address, when one exists.
    pub fn find_and_remove(&self, spine_addr: Address) -> Option<AddressRangeEntry> {
        self.entries.lock().remove(&spine_addr.to_usize())
    }

    /// The contiguous view registered for a spine address, when one exists.
    pub fn contiguous_for(&self, spine_addr: Address) -> Option<Address> {
        self.entries
            .lock()
            .get(&spine_addr.to_usize())
            .map(|entry| entry.contiguous)
    }

    pub fn contains(&self, spine_addr: Address) -> bool {
        self.entries.lock().contains_key(&spine_addr.to_usize())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AddressRangeTable {
    fn default() -> AddressRangeTable {
        AddressRangeTable::new()
    }
}
