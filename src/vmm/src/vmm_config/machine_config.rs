// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Guest physical address the program is loaded at and starts from.
pub const DEFAULT_GUEST_ADDR: u64 = 0x1000;

/// One page of guest memory.
pub const DEFAULT_MEM_SIZE: usize = 0x1000;

/// Errors associated with actions on `VmConfigError`.
#[derive(Debug, thiserror::Error)]
pub enum VmConfigError {
    /// The memory size is invalid.
    #[error("The memory size is invalid, it must be greater than 0.")]
    InvalidMemorySize,
}

/// This represents part of the guest's configuration file in json format.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Base guest physical address of the memory region.
    #[serde(default = "default_guest_addr")]
    pub guest_addr: u64,
    /// The memory size in bytes.
    #[serde(default = "default_mem_size")]
    pub mem_size: usize,
}

fn default_guest_addr() -> u64 {
    DEFAULT_GUEST_ADDR
}

fn default_mem_size() -> usize {
    DEFAULT_MEM_SIZE
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            guest_addr: DEFAULT_GUEST_ADDR,
            mem_size: DEFAULT_MEM_SIZE,
        }
    }
}

/// Configuration of the vm.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmConfig {
    pub guest_addr: u64,
    pub mem_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            guest_addr: DEFAULT_GUEST_ADDR,
            mem_size: DEFAULT_MEM_SIZE,
        }
    }
}

impl TryFrom<MachineConfig> for VmConfig {
    type Error = VmConfigError;

    fn try_from(machine_config: MachineConfig) -> Result<Self, Self::Error> {
        if machine_config.mem_size == 0 {
            return Err(VmConfigError::InvalidMemorySize);
        }
        Ok(VmConfig {
            guest_addr: machine_config.guest_addr,
            mem_size: machine_config.mem_size,
        })
    }
}
