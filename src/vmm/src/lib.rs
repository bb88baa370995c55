// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the THIRD-PARTY file.

#[macro_use]
extern crate vmm_sys_util;

pub mod arch;
pub mod builder;
pub mod cpu;
pub mod devices;
pub mod logger;
pub mod machine;
pub mod resources;
pub mod service;
pub mod utils;
pub mod vmm_config;
pub mod vstate;

pub use crate::machine::{VirtualMachine, VmState};

use crate::utils::memory::MappingError;
use crate::vstate::kvm::KvmError;
use crate::vstate::vcpu::{RunStateError, VcpuError};
use crate::vstate::vm::VmError;
use vm_memory::VolatileMemoryError;

/// Errors associated with the VMM internal logic.
#[derive(Debug, thiserror::Error)]
pub enum VmmError {
    /// KVM subsystem error.
    #[error("Kvm error: {0}")]
    Kvm(#[source] KvmError),
    /// Vm error.
    #[error("Vm error: {0}")]
    Vm(#[source] VmError),
    /// Vcpu error.
    #[error("Vcpu error: {0}")]
    Vcpu(#[source] VcpuError),
    /// Guest memory allocation error.
    #[error("Guest memory error: {0}")]
    Mapping(#[source] MappingError),
    /// Guest memory access error.
    #[error("Guest memory access error: {0}")]
    GuestMemoryAccess(#[source] VolatileMemoryError),
    /// The vCPU run state could not be read.
    #[error("Vcpu run state error: {0}")]
    RunState(#[source] RunStateError),
    /// The serial console failed to emit a byte.
    #[error("Serial console error: {0:?}")]
    Serial(vm_superio::serial::Error<std::io::Error>),
    /// A memory region cannot be empty.
    #[error("Memory region size must be greater than 0")]
    InvalidRegionSize,
    /// Nothing to load.
    #[error("Guest code cannot be empty")]
    EmptyPayload,
    /// The guest code does not fit in guest memory.
    #[error("Guest code of {len} bytes does not fit in {size} bytes of guest memory")]
    PayloadTooLarge { len: usize, size: usize },
    /// Guest memory must be configured first.
    #[error("Guest memory is not configured")]
    MemoryNotConfigured,
    /// The operation is not allowed in the current state.
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: VmState,
    },
    /// The guest exited for a reason the run loop does not handle.
    #[error("Unhandled KVM exit reason: {0}")]
    UnhandledExitReason(u32),
}
