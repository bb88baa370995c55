// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;

/// This represents part of the guest's configuration file in json format.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Path of the flat binary loaded at the start of guest memory.
    pub path: String,
}

/// Errors associated with actions on `ProgramConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ProgramConfigError {
    /// The program file cannot be opened.
    #[error("The program file cannot be opened: {0}")]
    InvalidProgramPath(std::io::Error),
    /// The program file cannot be read.
    #[error("The program file cannot be read: {0}")]
    ReadProgram(std::io::Error),
    /// The program file is empty.
    #[error("The program file is empty")]
    EmptyProgram,
    /// The program does not fit in guest memory.
    #[error("The program ({len} bytes) does not fit in {mem_size} bytes of guest memory")]
    ProgramTooLarge { len: usize, mem_size: usize },
}

/// Read the program at `cfg.path`, checking that it fits in `mem_size` bytes.
pub fn load_program(cfg: &ProgramConfig, mem_size: usize) -> Result<Vec<u8>, ProgramConfigError> {
    use self::ProgramConfigError::{EmptyProgram, InvalidProgramPath, ProgramTooLarge, ReadProgram};

    let mut file = File::open(&cfg.path).map_err(InvalidProgramPath)?;
    let mut code = Vec::new();
    file.read_to_end(&mut code).map_err(ReadProgram)?;
    if code.is_empty() {
        return Err(EmptyProgram);
    }
    if code.len() > mem_size {
        return Err(ProgramTooLarge {
            len: code.len(),
            mem_size,
        });
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use utils::tempfile::TempFile;

    fn config_for(file: &TempFile) -> ProgramConfig {
        ProgramConfig {
            path: file.as_path().to_str().unwrap().to_string(),
        }
    }

    #[test]
    fn test_load_program() {
        let file = TempFile::new().unwrap();
        file.as_file().write_all(&[0xf4]).unwrap();
        assert_eq!(load_program(&config_for(&file), 0x1000).unwrap(), vec![0xf4]);
    }

    #[test]
    fn test_load_program_errors() {
        let missing = ProgramConfig {
            path: "/invalid/path".to_string(),
        };
        assert!(matches!(
            load_program(&missing, 0x1000),
            Err(ProgramConfigError::InvalidProgramPath(_))
        ));

        let file = TempFile::new().unwrap();
        assert!(matches!(
            load_program(&config_for(&file), 0x1000),
            Err(ProgramConfigError::EmptyProgram)
        ));

        file.as_file().write_all(&[0x90; 16]).unwrap();
        assert!(matches!(
            load_program(&config_for(&file), 8),
            Err(ProgramConfigError::ProgramTooLarge {
                len: 16,
                mem_size: 8
            })
        ));
    }
}
