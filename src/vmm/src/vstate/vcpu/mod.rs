// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod run_state;

use crate::arch::x86_64::regs::{self, RegError};
use crate::utils::fd::{HandleError, ResourceHandle};
use crate::utils::memory::{MappingError, MemoryMapping};
use crate::vstate::ioctls::KVM_RUN;
use kvm_bindings::{kvm_regs, kvm_sregs};
use std::os::unix::io::RawFd;
use utils::errno;
use utils::ioctl::ioctl;

pub use run_state::{IoDirection, IoExit, RunState, RunStateError};

/// Errors associated with actions on vcpu.
#[derive(Debug, thiserror::Error)]
pub enum VcpuError {
    /// The vCPU descriptor cannot be owned.
    #[error("Invalid vCPU file descriptor: {0}")]
    Handle(#[source] HandleError),
    /// KVM reported a zero-sized run-state region.
    #[error("Invalid vCPU mmap size: 0")]
    InvalidMappingSize,
    /// Mapping the run-state region failed.
    #[error("Memory operation error: {0}")]
    Mapping(#[source] MappingError),
    /// Initial register setup failed.
    #[error("Vcpu registers configuration error: {0}")]
    RegisterSetupFailed(#[source] RegError),
    /// Reading or writing registers failed.
    #[error("Vcpu registers access error: {0}")]
    RegisterAccessFailed(#[source] RegError),
    /// KVM_RUN failed.
    #[error("Failed to trigger the running of the current vcpu: {0}")]
    RunFailed(#[source] errno::Error),
}

/// Owner of a vCPU descriptor and of its mapped run-state region.
///
/// The run-state mapping is declared first so that it is unmapped before the
/// descriptor backing it is closed.
#[derive(Debug)]
pub struct VcpuHandle {
    run_state: MemoryMapping,
    fd: ResourceHandle,
}

impl VcpuHandle {
    /// Take ownership of `raw_fd`, map its run-state region and prepare the registers for
    /// flat real-mode execution.
    ///
    /// On failure everything acquired so far, `raw_fd` included, is released.
    pub fn acquire(raw_fd: RawFd, mapping_size: usize) -> Result<Self, VcpuError> {
        let fd = ResourceHandle::acquire(raw_fd).map_err(VcpuError::Handle)?;
        if mapping_size == 0 {
            return Err(VcpuError::InvalidMappingSize);
        }
        let run_state =
            MemoryMapping::map_shared(raw_fd, mapping_size).map_err(VcpuError::Mapping)?;

        regs::setup_sregs(&fd).map_err(VcpuError::RegisterSetupFailed)?;
        regs::setup_regs(&fd).map_err(VcpuError::RegisterSetupFailed)?;

        Ok(VcpuHandle { run_state, fd })
    }

    pub fn fd(&self) -> &ResourceHandle {
        &self.fd
    }

    pub fn get_special_registers(&self) -> Result<kvm_sregs, VcpuError> {
        regs::get_sregs(&self.fd).map_err(VcpuError::RegisterAccessFailed)
    }

    pub fn set_special_registers(&self, sregs: &kvm_sregs) -> Result<(), VcpuError> {
        regs::set_sregs(&self.fd, sregs).map_err(VcpuError::RegisterAccessFailed)
    }

    pub fn get_standard_registers(&self) -> Result<kvm_regs, VcpuError> {
        regs::get_regs(&self.fd).map_err(VcpuError::RegisterAccessFailed)
    }

    pub fn set_standard_registers(&self, regs: &kvm_regs) -> Result<(), VcpuError> {
        regs::set_regs(&self.fd, regs).map_err(VcpuError::RegisterAccessFailed)
    }

    /// View of the run-state region, valid until the next `step()`.
    pub fn run_state(&self) -> RunState<'_> {
        RunState::new(self.run_state.as_volatile_slice())
    }

    /// Enter the guest and return once it exits to user space.
    pub fn step(&self) -> Result<(), VcpuError> {
        // SAFETY: KVM_RUN takes no argument. The kernel only writes the run-state region,
        // which stays mapped for the lifetime of `self`.
        if unsafe { ioctl(&self.fd, KVM_RUN()) } < 0 {
            return Err(VcpuError::RunFailed(errno::Error::last()));
        }
        Ok(())
    }
}
