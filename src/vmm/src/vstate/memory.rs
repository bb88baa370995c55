// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::utils::memory::{MappingError, MemoryMapping};
use vm_memory::{Bytes, VolatileMemoryError, VolatileSlice};

/// The only memory slot a VM gets.
pub const GUEST_MEMORY_SLOT: u32 = 0;

/// Host memory backing the guest's physical address range
/// `guest_addr..guest_addr + size`.
#[derive(Debug)]
pub struct GuestMemory {
    mapping: MemoryMapping,
    guest_addr: u64,
}

impl GuestMemory {
    /// Allocate `size` bytes of zeroed anonymous shared memory for `guest_addr`.
    pub fn new(guest_addr: u64, size: usize) -> Result<Self, MappingError> {
        let mapping = MemoryMapping::map_anonymous(size)?;
        Ok(GuestMemory {
            mapping,
            guest_addr,
        })
    }

    pub fn guest_addr(&self) -> u64 {
        self.guest_addr
    }

    pub fn size(&self) -> usize {
        self.mapping.length()
    }

    /// Host virtual address of guest physical address `guest_addr`.
    pub fn host_address(&self) -> u64 {
        self.mapping.address() as u64
    }

    pub fn as_volatile_slice(&self) -> VolatileSlice<'_> {
        self.mapping.as_volatile_slice()
    }

    /// Copy `data` into guest memory starting `offset` bytes past the region base.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), VolatileMemoryError> {
        self.as_volatile_slice().write_slice(data, offset)
    }

    /// Fill `buf` from guest memory starting `offset` bytes past the region base.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), VolatileMemoryError> {
        self.as_volatile_slice().read_slice(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let memory = GuestMemory::new(0x1000, 0x2000).unwrap();
        assert_eq!(memory.guest_addr(), 0x1000);
        assert_eq!(memory.size(), 0x2000);
        assert_ne!(memory.host_address(), 0);

        assert!(matches!(
            GuestMemory::new(0x1000, 0),
            Err(MappingError::ZeroLength)
        ));
    }

    #[test]
    fn test_read_write() {
        let memory = GuestMemory::new(0, 0x1000).unwrap();
        let mut buf = [0xffu8; 4];
        memory.read(0x10, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);

        memory.write(0xffc, &[1, 2, 3, 4]).unwrap();
        memory.read(0xffc, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        // Crossing the end of the region is refused.
        assert!(memory.write(0xffe, &[1, 2, 3, 4]).is_err());
        assert!(memory.read(0x1000, &mut buf).is_err());
    }
}
