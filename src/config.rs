use crate::heap::mem::page_size;

/// Tunables for the arraylet heap and the GC worker pool.
///
/// A `Config` is built once at startup and shared read-only afterwards.
pub struct Config {
    /// Byte size of a single arraylet leaf. Must be a power of two and a
    /// multiple of the page size so leaves stay individually mappable.
    pub arraylet_leaf_size: usize,

    /// Alignment applied to the spine allocation size.
    pub object_alignment: usize,

    /// When set, the inline data section of hybrid spines is aligned to
    /// `object_alignment` past the arrayoid instead of starting right after
    /// it.
    pub align_spine_data: bool,

    /// Platform variant that keeps the remainder of a chunked array inline
    /// with the spine (the hybrid layout). Mutually exclusive with double
    /// mapping: a hybrid spine has no flat leaf-only representation.
    pub hybrid_arraylets: bool,

    /// Present discontiguous arraylet data as one contiguous virtual range.
    /// Only honoured on targets where the virtual-memory layer supports
    /// page-granularity remapping.
    pub enable_double_map: bool,

    /// Number of worker threads driving GC tasks.
    pub gc_workers: usize,
}

impl Config {
    pub fn new() -> Config {
        Config {
            arraylet_leaf_size: 64 * 1024,
            object_alignment: 8,
            align_spine_data: true,
            hybrid_arraylets: false,
            enable_double_map: false,
            gc_workers: num_cpus::get(),
        }
    }

    /// Checks the cross-field invariants. Called once after the embedder has
    /// finished adjusting fields.
    pub fn verify(&self) -> Result<(), String> {
        if !self.arraylet_leaf_size.is_power_of_two() {
            return Err(format!(
                "arraylet leaf size {} is not a power of two",
                self.arraylet_leaf_size
            ));
        }

        if self.arraylet_leaf_size % page_size() != 0 {
            return Err(format!(
                "arraylet leaf size {} is not a multiple of the page size {}",
                self.arraylet_leaf_size,
                page_size()
            ));
        }

        if !self.object_alignment.is_power_of_two() {
            return Err(format!(
                "object alignment {} is not a power of two",
                self.object_alignment
            ));
        }

        if self.hybrid_arraylets && self.enable_double_map {
            return Err("hybrid arraylets cannot be combined with double mapping".to_string());
        }

        if self.gc_workers == 0 {
            return Err("at least one GC worker is required".to_string());
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
