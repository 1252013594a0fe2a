use crate::heap::mem::Address;

/// A run of physical pages, identified by its byte offset inside the backing
/// store and its length. All but the last run of a request must be
/// page-multiple sized.
#[derive(Copy, Clone, Debug)]
pub struct PhysicalRun {
    pub offset: usize,
    pub len: usize,
}

/// Handle describing an established contiguous mapping, required to release
/// it later.
#[derive(Copy, Clone, Debug)]
pub struct VmemIdentifier {
    pub size: usize,
}

/// The platform's virtual-memory layer.
///
/// The only two operations this core needs: re-mapping a set of physical page
/// runs into one fresh contiguous virtual range, and releasing such a range.
pub trait VirtualMemory: Send + Sync {
    /// Reserves `total_size` bytes (page rounded) of virtual space and maps
    /// each run's pages at its corresponding offset within the reservation.
    /// Returns `None` when the reservation or any mapping fails; a partial
    /// result is never leaked.
    fn reserve_and_map(
        &self,
        runs: &[PhysicalRun],
        total_size: usize,
    ) -> Option<(Address, VmemIdentifier)>;

    /// Releases a mapping previously returned by `reserve_and_map`.
    fn unmap(&self, addr: Address, size: usize, identifier: &VmemIdentifier) -> bool;
}

/// Whether this build carries a [`VirtualMemory`] substrate. A
/// build-configuration fact, not a runtime probe: targets without a
/// substrate compile the shared-file heap out entirely.
///
/// The unix substrate below covers Linux and macOS; a Windows one would
/// implement the same trait over `CreateFileMapping`/`MapViewOfFile`.
pub fn double_map_supported() -> bool {
    cfg!(unix)
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use crate::heap::mem::{page_size, MemRegion};
        use std::ptr;

        /// Heap backing whose pages can be mapped at more than one virtual
        /// address.
        ///
        /// The storage is an anonymous shared file (`memfd_create` on Linux,
        /// an unlinked temporary file elsewhere) mapped once as the heap
        /// proper; any page-aligned range of it can additionally be mapped
        /// into a contiguous reservation, which is exactly what a double map
        /// is.
        pub struct SharedHeapFile {
            fd: libc::c_int,
            base: Address,
            capacity: usize,
        }

        impl SharedHeapFile {
            pub fn new(capacity: usize) -> Result<SharedHeapFile, String> {
                assert_eq!(capacity % page_size(), 0);

                let fd = Self::create_backing_fd()?;

                if unsafe { libc::ftruncate(fd, capacity as libc::off_t) } != 0 {
                    unsafe { libc::close(fd) };
                    return Err("failed to size the heap backing file".to_string());
                }

                let base = unsafe {
                    libc::mmap(
                        ptr::null_mut(),
                        capacity,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_SHARED,
                        fd,
                        0,
                    )
                };

                if base == libc::MAP_FAILED {
                    unsafe { libc::close(fd) };
                    return Err("failed to map the heap backing file".to_string());
                }

                Ok(SharedHeapFile {
                    fd,
                    base: Address::from_usize(base as usize),
                    capacity,
                })
            }

            cfg_if::cfg_if! {
                if #[cfg(target_os = "linux")] {
                    fn create_backing_fd() -> Result<libc::c_int, String> {
                        let name = b"arraylet-heap\0";
                        let fd = unsafe {
                            libc::memfd_create(name.as_ptr() as *const libc::c_char, libc::MFD_CLOEXEC)
                        };

                        if fd < 0 {
                            Err("memfd_create failed".to_string())
                        } else {
                            Ok(fd)
                        }
                    }
                } else {
                    fn create_backing_fd() -> Result<libc::c_int, String> {
                        let mut template = *b"/tmp/arraylet-heap-XXXXXX\0";
                        let fd = unsafe { libc::mkstemp(template.as_mut_ptr() as *mut libc::c_char) };

                        if fd < 0 {
                            return Err("mkstemp failed".to_string());
                        }

                        // The file only needs to exist as long as the fd does.
                        unsafe { libc::unlink(template.as_ptr() as *const libc::c_char) };
                        Ok(fd)
                    }
                }
            }

            /// The heap's primary mapping.
            pub fn region(&self) -> MemRegion {
                MemRegion::new(self.base, self.base.offset(self.capacity))
            }

            pub fn base(&self) -> Address {
                self.base
            }

            pub fn capacity(&self) -> usize {
                self.capacity
            }
        }

        impl VirtualMemory for SharedHeapFile {
            fn reserve_and_map(
                &self,
                runs: &[PhysicalRun],
                total_size: usize,
            ) -> Option<(Address, VmemIdentifier)> {
                assert_eq!(total_size % page_size(), 0);
                debug_assert!(runs.iter().map(|r| r.len).sum::<usize>() >= total_size);

                let reservation = unsafe {
                    libc::mmap(
                        ptr::null_mut(),
                        total_size,
                        libc::PROT_NONE,
                        libc::MAP_PRIVATE | libc::MAP_ANON,
                        -1,
                        0,
                    )
                };

                if reservation == libc::MAP_FAILED {
                    return None;
                }

                let mut offset_in_reservation = 0;

                for run in runs {
                    debug_assert_eq!(run.offset % page_size(), 0);

                    let target = reservation as usize + offset_in_reservation;
                    let mapped = unsafe {
                        libc::mmap(
                            target as *mut libc::c_void,
                            run.len,
                            libc::PROT_READ | libc::PROT_WRITE,
                            libc::MAP_SHARED | libc::MAP_FIXED,
                            self.fd,
                            run.offset as libc::off_t,
                        )
                    };

                    if mapped == libc::MAP_FAILED {
                        unsafe { libc::munmap(reservation, total_size) };
                        return None;
                    }

                    offset_in_reservation += run.len;
                }

                Some((
                    Address::from_usize(reservation as usize),
                    VmemIdentifier { size: total_size },
                ))
            }

            fn unmap(&self, addr: Address, size: usize, _identifier: &VmemIdentifier) -> bool {
                unsafe { libc::munmap(addr.to_mut_ptr::<libc::c_void>(), size) == 0 }
            }
        }

        impl Drop for SharedHeapFile {
            fn drop(&mut self) {
                unsafe {
                    libc::munmap(self.base.to_mut_ptr::<libc::c_void>(), self.capacity);
                    libc::close(self.fd);
                }
            }
        }
    }
}
