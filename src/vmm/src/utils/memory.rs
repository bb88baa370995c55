// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::os::unix::io::RawFd;
use std::result::Result;

use vm_memory::VolatileSlice;

/// Errors associated with operations on memory mappings.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// The address is null.
    #[error("Mapped memory address cannot be null")]
    NullAddress,
    /// The address is the value mmap returns on failure.
    #[error("Incorrect memory address: MAP_FAILED")]
    MapFailed,
    /// The mapping has no length.
    #[error("Mapped data size cannot be 0")]
    ZeroLength,
    /// The mmap syscall itself failed.
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] std::io::Error),
}

/// Sole owner of one host virtual memory mapping.
///
/// The range is unmapped exactly once, by `release()` or on drop. A failing `munmap` is
/// fatal to the process.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: *mut libc::c_void,
    len: usize,
    mapped: bool,
}

// SAFETY: the mapping is plain memory owned by this value alone; nothing in it is bound to
// the thread that created it.
unsafe impl Send for MemoryMapping {}

impl MemoryMapping {
    /// Take ownership of the mapping at `addr` spanning `len` bytes.
    ///
    /// # Safety
    ///
    /// `addr..addr + len` must be a live mapping produced by `mmap` that nothing else will
    /// unmap.
    pub unsafe fn acquire(addr: *mut libc::c_void, len: usize) -> Result<Self, MappingError> {
        if addr.is_null() {
            return Err(MappingError::NullAddress);
        }
        if addr == libc::MAP_FAILED {
            return Err(MappingError::MapFailed);
        }
        if len == 0 {
            return Err(MappingError::ZeroLength);
        }
        Ok(MemoryMapping {
            addr,
            len,
            mapped: true,
        })
    }

    /// Map `len` bytes of `fd` read-write and shared, starting at offset 0.
    pub fn map_shared(fd: RawFd, len: usize) -> Result<Self, MappingError> {
        Self::map(len, libc::MAP_SHARED, fd)
    }

    /// Allocate `len` bytes of anonymous, shared, read-write memory.
    pub fn map_anonymous(len: usize) -> Result<Self, MappingError> {
        // MAP_SHARED keeps host writes visible to the guest through the same pages.
        Self::map(len, libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1)
    }

    fn map(len: usize, flags: i32, fd: RawFd) -> Result<Self, MappingError> {
        if len == 0 {
            return Err(MappingError::ZeroLength);
        }
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // SAFETY: a fresh mapping chosen by the kernel cannot alias any Rust object.
        let addr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, flags, fd, 0) };
        if addr == libc::MAP_FAILED {
            return Err(MappingError::Mmap(std::io::Error::last_os_error()));
        }
        // SAFETY: `addr` was just returned by a successful mmap of `len` bytes.
        unsafe { Self::acquire(addr, len) }
    }

    pub fn address(&self) -> *mut libc::c_void {
        self.addr
    }

    pub fn length(&self) -> usize {
        self.len
    }

    /// Bounds-checked view over the whole mapping. Empty once the mapping is released.
    pub fn as_volatile_slice(&self) -> VolatileSlice<'_> {
        let len = if self.mapped { self.len } else { 0 };
        // SAFETY: the range stays mapped for as long as `self` is borrowed.
        unsafe { VolatileSlice::new(self.addr as *mut u8, len) }
    }

    /// Unmap the range if it is still mapped. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if !self.mapped {
            return;
        }
        self.mapped = false;
        // SAFETY: the range is owned by this value and was mapped until now.
        if unsafe { libc::munmap(self.addr, self.len) } < 0 {
            crate::fatal!(
                "Error unmapping memory at {:p} ({} bytes): {}",
                self.addr,
                self.len,
                std::io::Error::last_os_error()
            );
        }
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        self.release();
    }
}
