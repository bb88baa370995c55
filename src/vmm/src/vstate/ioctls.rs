// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request codes of the KVM ioctls issued by this crate, from `<linux/kvm.h>`.

use kvm_bindings::{kvm_regs, kvm_sregs, kvm_userspace_memory_region, KVMIO};

// Issued against the /dev/kvm descriptor.
ioctl_io_nr!(KVM_GET_API_VERSION, KVMIO, 0x00);
ioctl_io_nr!(KVM_CREATE_VM, KVMIO, 0x01);
ioctl_io_nr!(KVM_GET_VCPU_MMAP_SIZE, KVMIO, 0x04);

// Issued against a VM descriptor.
ioctl_io_nr!(KVM_CREATE_VCPU, KVMIO, 0x41);
ioctl_iow_nr!(
    KVM_SET_USER_MEMORY_REGION,
    KVMIO,
    0x46,
    kvm_userspace_memory_region
);

// Issued against a vCPU descriptor.
ioctl_io_nr!(KVM_RUN, KVMIO, 0x80);
ioctl_ior_nr!(KVM_GET_REGS, KVMIO, 0x81, kvm_regs);
ioctl_iow_nr!(KVM_SET_REGS, KVMIO, 0x82, kvm_regs);
ioctl_ior_nr!(KVM_GET_SREGS, KVMIO, 0x83, kvm_sregs);
ioctl_iow_nr!(KVM_SET_SREGS, KVMIO, 0x84, kvm_sregs);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        // Values as printed by the kernel headers on x86_64.
        assert_eq!(KVM_GET_API_VERSION(), 0xae00);
        assert_eq!(KVM_CREATE_VM(), 0xae01);
        assert_eq!(KVM_GET_VCPU_MMAP_SIZE(), 0xae04);
        assert_eq!(KVM_CREATE_VCPU(), 0xae41);
        assert_eq!(KVM_SET_USER_MEMORY_REGION(), 0x4020_ae46);
        assert_eq!(KVM_RUN(), 0xae80);
        assert_eq!(KVM_GET_REGS(), 0x8090_ae81);
        assert_eq!(KVM_SET_REGS(), 0x4090_ae82);
        assert_eq!(KVM_GET_SREGS(), 0x8138_ae83);
        assert_eq!(KVM_SET_SREGS(), 0x4138_ae84);
    }
}
