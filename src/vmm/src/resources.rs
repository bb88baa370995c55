// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::vmm_config::machine_config::{MachineConfig, VmConfig, VmConfigError};
use crate::vmm_config::program::{load_program, ProgramConfig, ProgramConfigError};

/// Errors associated with actions on configuring VM resources.
#[derive(Debug, thiserror::Error, derive_more::From)]
pub enum ResourcesError {
    /// JSON is invalid.
    #[error("Invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
    /// Guest program configuration error.
    #[error("Program error: {0}")]
    Program(ProgramConfigError),
    /// Vm memory configuration error.
    #[error("VM config error: {0}")]
    VmConfig(VmConfigError),
}

/// Used for configuring a vmm from json.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct VmmConfig {
    #[serde(rename = "machine-config", default)]
    machine_config: MachineConfig,
    #[serde(rename = "program")]
    program: ProgramConfig,
}

/// Everything needed to build and run one VM.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct VmResources {
    pub vm_config: VmConfig,
    pub code: Vec<u8>,
}

impl VmResources {
    pub fn from_json(config_json: &str) -> std::result::Result<Self, ResourcesError> {
        let vmm_config: VmmConfig = serde_json::from_str::<VmmConfig>(config_json)?;
        let mut resources: Self = Default::default();

        resources.build_vm_config(vmm_config.machine_config)?;
        resources.build_program(&vmm_config.program)?;
        Ok(resources)
    }

    /// Construct the vm config.
    pub fn build_vm_config(&mut self, machine_config: MachineConfig) -> Result<(), VmConfigError> {
        self.vm_config = VmConfig::try_from(machine_config)?;
        Ok(())
    }

    /// Read the guest program. Call after `build_vm_config`, the program must fit in memory.
    pub fn build_program(&mut self, program: &ProgramConfig) -> Result<(), ProgramConfigError> {
        self.code = load_program(program, self.vm_config.mem_size)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::io::Write;
    use ::utils::tempfile::TempFile;

    #[test]
    fn test_from_json() {
        let program_file = TempFile::new().unwrap();
        program_file.as_file().write_all(&[0xf4]).unwrap();
        let program_path = program_file.as_path().to_str().unwrap();

        // Invalid JSON string must yield a `serde_json` error.
        match VmResources::from_json(r#"}"#) {
            Err(ResourcesError::InvalidJson(_)) => (),
            _ => unreachable!(),
        }

        // The program is mandatory.
        match VmResources::from_json(r#"{}"#) {
            Err(ResourcesError::InvalidJson(_)) => (),
            _ => unreachable!(),
        }

        // Invalid JSON string that has an invalid program path.
        let mut json = r#"{
                "machine-config": {
                    "guest_addr": 4096,
                    "mem_size": 4096
                },
                "program": {
                    "path": "/invalid/path"
                }
            }"#
        .to_string();
        match VmResources::from_json(json.as_str()) {
            Err(ResourcesError::Program(ProgramConfigError::InvalidProgramPath(_))) => (),
            _ => unreachable!(),
        }

        // Invalid JSON string that has invalid memory size.
        json = format!(
            r#"{{
                "machine-config": {{
                    "guest_addr": 4096,
                    "mem_size": 0
                }},
                "program": {{
                    "path": "{}"
                }}
            }}"#,
            program_path
        );
        match VmResources::from_json(json.as_str()) {
            Err(ResourcesError::VmConfig(VmConfigError::InvalidMemorySize)) => (),
            _ => unreachable!(),
        }

        // Valid JSON string.
        json = format!(
            r#"{{
                "machine-config": {{
                    "guest_addr": 8192,
                    "mem_size": 8192
                }},
                "program": {{
                    "path": "{}"
                }}
            }}"#,
            program_path
        );
        let resources = VmResources::from_json(json.as_str()).unwrap();
        assert_eq!(resources.vm_config.guest_addr, 0x2000);
        assert_eq!(resources.vm_config.mem_size, 0x2000);
        assert_eq!(resources.code, vec![0xf4]);

        // The machine configuration falls back to one page at 0x1000.
        json = format!(r#"{{"program": {{"path": "{}"}}}}"#, program_path);
        let resources = VmResources::from_json(json.as_str()).unwrap();
        assert_eq!(resources.vm_config, VmConfig::default());
    }
}
