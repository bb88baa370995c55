// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

use crate::vstate::ioctls::{KVM_GET_REGS, KVM_GET_SREGS, KVM_SET_REGS, KVM_SET_SREGS};
use kvm_bindings::{kvm_regs, kvm_sregs};
use std::os::unix::io::AsRawFd;
use utils::errno;
use utils::ioctl::{ioctl_with_mut_ref, ioctl_with_ref};

/// Bit 1 of RFLAGS is reserved and must always be set.
pub const X86_RFLAGS_RESERVED: u64 = 0x2;

#[derive(Debug, thiserror::Error)]
pub enum RegError {
    /// Get special registers error.
    #[error("Error to get special registers state: {0}")]
    GetSpecialRegisters(#[source] errno::Error),
    /// Set special registers error.
    #[error("Error to set special registers state: {0}")]
    SetSpecialRegisters(#[source] errno::Error),
    /// Get general purpose registers error.
    #[error("Error to get standard registers state: {0}")]
    GetBaseRegisters(#[source] errno::Error),
    /// Set general purpose registers error.
    #[error("Error to set standard registers state: {0}")]
    SetBaseRegisters(#[source] errno::Error),
}

pub fn get_sregs<F: AsRawFd>(vcpu: &F) -> Result<kvm_sregs, RegError> {
    let mut sregs = kvm_sregs::default();
    // SAFETY: the kernel writes at most size_of::<kvm_sregs>() bytes into `sregs`.
    if unsafe { ioctl_with_mut_ref(vcpu, KVM_GET_SREGS(), &mut sregs) } < 0 {
        return Err(RegError::GetSpecialRegisters(errno::Error::last()));
    }
    Ok(sregs)
}

pub fn set_sregs<F: AsRawFd>(vcpu: &F, sregs: &kvm_sregs) -> Result<(), RegError> {
    // SAFETY: the kernel only reads `sregs`.
    if unsafe { ioctl_with_ref(vcpu, KVM_SET_SREGS(), sregs) } < 0 {
        return Err(RegError::SetSpecialRegisters(errno::Error::last()));
    }
    Ok(())
}

pub fn get_regs<F: AsRawFd>(vcpu: &F) -> Result<kvm_regs, RegError> {
    let mut regs = kvm_regs::default();
    // SAFETY: the kernel writes at most size_of::<kvm_regs>() bytes into `regs`.
    if unsafe { ioctl_with_mut_ref(vcpu, KVM_GET_REGS(), &mut regs) } < 0 {
        return Err(RegError::GetBaseRegisters(errno::Error::last()));
    }
    Ok(regs)
}

pub fn set_regs<F: AsRawFd>(vcpu: &F, regs: &kvm_regs) -> Result<(), RegError> {
    // SAFETY: the kernel only reads `regs`.
    if unsafe { ioctl_with_ref(vcpu, KVM_SET_REGS(), regs) } < 0 {
        return Err(RegError::SetBaseRegisters(errno::Error::last()));
    }
    Ok(())
}

// Flat code segment: with base and selector at zero a linear address equals the offset,
// so the instruction pointer is the guest physical address of the next instruction.
pub fn setup_sregs<F: AsRawFd>(vcpu: &F) -> Result<(), RegError> {
    let mut sregs = get_sregs(vcpu)?;
    sregs.cs.base = 0;
    sregs.cs.selector = 0;
    set_sregs(vcpu, &sregs)
}

pub fn setup_regs<F: AsRawFd>(vcpu: &F) -> Result<(), RegError> {
    let mut regs = get_regs(vcpu)?;
    regs.rflags = X86_RFLAGS_RESERVED;
    set_regs(vcpu, &regs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_register_access_on_non_vcpu_fd() {
        let file = File::open("/dev/null").unwrap();
        assert!(matches!(
            get_sregs(&file),
            Err(RegError::GetSpecialRegisters(_))
        ));
        assert!(matches!(
            set_sregs(&file, &kvm_sregs::default()),
            Err(RegError::SetSpecialRegisters(_))
        ));
        assert!(matches!(get_regs(&file), Err(RegError::GetBaseRegisters(_))));
        assert!(matches!(
            set_regs(&file, &kvm_regs::default()),
            Err(RegError::SetBaseRegisters(_))
        ));
        // The setup helpers stop at the first failing step.
        assert!(matches!(
            setup_sregs(&file),
            Err(RegError::GetSpecialRegisters(_))
        ));
        assert!(matches!(
            setup_regs(&file),
            Err(RegError::GetBaseRegisters(_))
        ));
    }
}
