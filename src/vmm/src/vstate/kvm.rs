// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::utils::fd::{HandleError, ResourceHandle};
use crate::vstate::ioctls::{KVM_CREATE_VM, KVM_GET_API_VERSION, KVM_GET_VCPU_MMAP_SIZE};
use kvm_bindings::KVM_API_VERSION;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use utils::errno;
use utils::ioctl::{ioctl, ioctl_with_val};

/// Special file that provides an interface to the KVM subsystem.
pub const KVM_DEVICE_PATH: &str = "/dev/kvm";

/// Errors associated with the KVM subsystem handle.
#[derive(Debug, thiserror::Error)]
pub enum KvmError {
    /// Cannot open the KVM device.
    #[error("{}", ({
        if .0.raw_os_error() == Some(libc::EACCES) {
            format!(
                "Error to open '{}' [{}]\nMake sure the user launching the nullvm \
                process is configured on the /dev/kvm file's ACL.",
                KVM_DEVICE_PATH, .0
            )
        } else {
            format!("Error to open '{}' [{}]", KVM_DEVICE_PATH, .0)
        }
    }))]
    DeviceOpenFailed(#[source] std::io::Error),
    /// The opened device descriptor cannot be owned.
    #[error("Invalid KVM device descriptor: {0}")]
    Handle(#[source] HandleError),
    /// KVM_GET_API_VERSION failed.
    #[error("Error to get KVM API version: {0}")]
    ApiQueryFailed(#[source] errno::Error),
    /// The kernel speaks a different KVM API.
    #[error("Expected KVM API version {expected}, but got {actual}")]
    ApiVersionMismatch { expected: i32, actual: i32 },
    /// KVM_GET_VCPU_MMAP_SIZE failed.
    #[error("Error to get vCPU mmap size: {0}")]
    QueryFailed(#[source] errno::Error),
    /// KVM_CREATE_VM failed.
    #[error("Error to create VM file descriptor: {0}")]
    VmCreationFailed(#[source] errno::Error),
}

/// Handle on the KVM subsystem, i.e. an open `/dev/kvm`.
#[derive(Debug)]
pub struct KvmSubsystem {
    fd: ResourceHandle,
}

impl KvmSubsystem {
    /// Open `/dev/kvm` and make sure the kernel speaks the expected API version.
    pub fn open() -> Result<Self, KvmError> {
        Self::open_path(KVM_DEVICE_PATH)
    }

    pub(crate) fn open_path(path: &str) -> Result<Self, KvmError> {
        Self::open_path_with(path, query_api_version)
    }

    /// Open `path` and check the version reported by `api_version` for it.
    ///
    /// The device descriptor is closed again when anything after the open fails.
    pub(crate) fn open_path_with<F>(path: &str, api_version: F) -> Result<Self, KvmError>
    where
        F: FnOnce(&ResourceHandle) -> Result<i32, KvmError>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(KvmError::DeviceOpenFailed)?;
        let fd = ResourceHandle::acquire(file.as_raw_fd()).map_err(KvmError::Handle)?;
        // `fd` owns the descriptor from here on.
        let _ = file.into_raw_fd();

        let version = api_version(&fd)?;
        check_api_version(version)?;

        log::debug!("Opened {} (KVM API version {})", path, version);
        Ok(KvmSubsystem { fd })
    }

    pub fn fd(&self) -> &ResourceHandle {
        &self.fd
    }

    /// Size in bytes of the run-state region every vCPU descriptor must be mapped with.
    pub fn vcpu_mapping_size(&self) -> Result<usize, KvmError> {
        // SAFETY: KVM_GET_VCPU_MMAP_SIZE takes no argument and only returns a value.
        let size = unsafe { ioctl(&self.fd, KVM_GET_VCPU_MMAP_SIZE()) };
        if size < 0 {
            return Err(KvmError::QueryFailed(errno::Error::last()));
        }
        Ok(size as usize)
    }

    /// Create a VM and return its raw descriptor. The caller owns the descriptor.
    pub fn create_vm(&self) -> Result<RawFd, KvmError> {
        // SAFETY: machine type 0 is the default VM type and the result is only a descriptor.
        let vm_fd = unsafe { ioctl_with_val(&self.fd, KVM_CREATE_VM(), 0) };
        if vm_fd < 0 {
            return Err(KvmError::VmCreationFailed(errno::Error::last()));
        }
        Ok(vm_fd)
    }
}

/// Issue KVM_GET_API_VERSION on `fd`.
fn query_api_version(fd: &ResourceHandle) -> Result<i32, KvmError> {
    // SAFETY: KVM_GET_API_VERSION takes no argument and `fd` is a valid descriptor.
    let version = unsafe { ioctl(fd, KVM_GET_API_VERSION()) };
    if version < 0 {
        return Err(KvmError::ApiQueryFailed(errno::Error::last()));
    }
    Ok(version)
}

/// Accept only the API version this crate was written against.
pub fn check_api_version(version: i32) -> Result<(), KvmError> {
    let expected = KVM_API_VERSION as i32;
    if version != expected {
        return Err(KvmError::ApiVersionMismatch {
            expected,
            actual: version,
        });
    }
    Ok(())
}
