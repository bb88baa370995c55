// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::utils::fd::{HandleError, ResourceHandle};
use crate::vstate::ioctls::{KVM_CREATE_VCPU, KVM_SET_USER_MEMORY_REGION};
use kvm_bindings::kvm_userspace_memory_region;
use std::os::unix::io::RawFd;
use utils::errno;
use utils::ioctl::{ioctl_with_ref, ioctl_with_val};

/// Id of the one vCPU a VM gets.
const VCPU_ID: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The VM descriptor cannot be owned.
    #[error("Invalid VM file descriptor: {0}")]
    Handle(#[source] HandleError),
    /// KVM_CREATE_VCPU failed.
    #[error("Error to create virtual CPU: {0}")]
    VcpuCreationFailed(#[source] errno::Error),
    /// KVM_SET_USER_MEMORY_REGION failed.
    #[error("Cannot set user memory region: {0}")]
    MemoryRegionInstallFailed(#[source] errno::Error),
}

/// Owner of a VM descriptor.
#[derive(Debug)]
pub struct VmHandle {
    fd: ResourceHandle,
}

impl VmHandle {
    pub fn acquire(raw_fd: RawFd) -> Result<Self, VmError> {
        let fd = ResourceHandle::acquire(raw_fd).map_err(VmError::Handle)?;
        Ok(VmHandle { fd })
    }

    pub fn fd(&self) -> &ResourceHandle {
        &self.fd
    }

    /// Create vCPU 0 and return its raw descriptor. The caller owns the descriptor.
    pub fn create_vcpu(&self) -> Result<RawFd, VmError> {
        // SAFETY: the argument is a vCPU id and the result is only a descriptor.
        let vcpu_fd = unsafe { ioctl_with_val(&self.fd, KVM_CREATE_VCPU(), VCPU_ID) };
        if vcpu_fd < 0 {
            return Err(VmError::VcpuCreationFailed(errno::Error::last()));
        }
        Ok(vcpu_fd)
    }

    /// Install (or replace) the guest memory slot `slot`.
    ///
    /// A `size` of 0 removes the slot.
    ///
    /// # Safety
    ///
    /// `userspace_addr..userspace_addr + size` must stay mapped for as long as the slot is
    /// installed, since the guest reads and writes it directly.
    pub unsafe fn install_memory_region(
        &self,
        slot: u32,
        guest_phys_addr: u64,
        size: u64,
        userspace_addr: u64,
        flags: u32,
    ) -> Result<(), VmError> {
        let region = kvm_userspace_memory_region {
            slot,
            flags,
            guest_phys_addr,
            memory_size: size,
            userspace_addr,
        };
        log::debug!(
            "KVM_SET_USER_MEMORY_REGION slot={} guest_phys_addr={:#x} size={:#x} userspace_addr={:#x}",
            slot,
            guest_phys_addr,
            size,
            userspace_addr
        );
        if ioctl_with_ref(&self.fd, KVM_SET_USER_MEMORY_REGION(), &region) < 0 {
            return Err(VmError::MemoryRegionInstallFailed(errno::Error::last()));
        }
        Ok(())
    }
}
