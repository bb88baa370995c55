// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read access to the `kvm_run` structure the kernel shares with each vCPU.
//!
//! Fields are read at their x86_64 offsets through a bounds-checked view of the mapping,
//! never through a pointer cast, so a short mapping yields an error instead of a read of
//! foreign memory.

use kvm_bindings::{KVM_EXIT_IO_IN, KVM_EXIT_IO_OUT};
use std::mem::size_of;
use vm_memory::{ByteValued, Bytes, VolatileSlice};

/// Offset of `kvm_run.exit_reason`.
pub const EXIT_REASON_OFFSET: usize = 8;
/// Offset of the exit-specific union in `kvm_run`.
const EXIT_UNION_OFFSET: usize = 32;

// Layout of the `io` member of the exit union.
const IO_DIRECTION_OFFSET: usize = EXIT_UNION_OFFSET;
const IO_SIZE_OFFSET: usize = EXIT_UNION_OFFSET + 1;
const IO_PORT_OFFSET: usize = EXIT_UNION_OFFSET + 2;
const IO_COUNT_OFFSET: usize = EXIT_UNION_OFFSET + 4;
const IO_DATA_OFFSET_OFFSET: usize = EXIT_UNION_OFFSET + 8;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunStateError {
    /// The access does not fit inside the mapped run-state region.
    #[error("Run-state access of {len} bytes at offset {offset:#x} is outside the {size:#x} mapped bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDirection {
    /// The guest reads from the port.
    In,
    /// The guest writes to the port.
    Out,
    /// A value the kernel does not define.
    Unknown(u8),
}

impl From<u8> for IoDirection {
    fn from(value: u8) -> Self {
        match u32::from(value) {
            KVM_EXIT_IO_IN => IoDirection::In,
            KVM_EXIT_IO_OUT => IoDirection::Out,
            _ => IoDirection::Unknown(value),
        }
    }
}

/// Port I/O exit details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoExit {
    pub direction: IoDirection,
    /// Operand size in bytes.
    pub size: u8,
    pub port: u16,
    /// Repetition count of a string instruction, 1 otherwise.
    pub count: u32,
    /// Offset of the data buffer from the start of `kvm_run`.
    pub data_offset: u64,
}

/// Borrowed view over a vCPU's run-state mapping.
#[derive(Clone, Copy, Debug)]
pub struct RunState<'a> {
    slice: VolatileSlice<'a>,
}

impl<'a> RunState<'a> {
    pub fn new(slice: VolatileSlice<'a>) -> Self {
        RunState { slice }
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), RunStateError> {
        let size = self.slice.len();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(RunStateError::OutOfBounds { offset, len, size }),
        }
    }

    fn read<T: ByteValued>(&self, offset: usize) -> Result<T, RunStateError> {
        let len = size_of::<T>();
        self.check(offset, len)?;
        self.slice
            .read_obj(offset)
            .map_err(|_| RunStateError::OutOfBounds {
                offset,
                len,
                size: self.slice.len(),
            })
    }

    /// The `KVM_EXIT_*` reason of the last exit.
    pub fn exit_reason(&self) -> Result<u32, RunStateError> {
        self.read(EXIT_REASON_OFFSET)
    }

    /// Details of a `KVM_EXIT_IO` exit.
    pub fn io(&self) -> Result<IoExit, RunStateError> {
        Ok(IoExit {
            direction: IoDirection::from(self.read::<u8>(IO_DIRECTION_OFFSET)?),
            size: self.read(IO_SIZE_OFFSET)?,
            port: self.read(IO_PORT_OFFSET)?,
            count: self.read(IO_COUNT_OFFSET)?,
            data_offset: self.read(IO_DATA_OFFSET_OFFSET)?,
        })
    }

    /// The `size * count` bytes the guest wrote for an OUT exit.
    pub fn io_data(&self, io: &IoExit) -> Result<Vec<u8>, RunStateError> {
        let size = self.slice.len();
        let out_of_bounds = RunStateError::OutOfBounds {
            offset: usize::try_from(io.data_offset).unwrap_or(usize::MAX),
            len: usize::from(io.size).saturating_mul(io.count as usize),
            size,
        };
        let offset = usize::try_from(io.data_offset).map_err(|_| out_of_bounds.clone())?;
        let len = usize::from(io.size)
            .checked_mul(io.count as usize)
            .ok_or_else(|| out_of_bounds.clone())?;
        self.check(offset, len)?;

        let mut data = vec![0u8; len];
        self.slice
            .read_slice(&mut data, offset)
            .map_err(|_| out_of_bounds)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvm_bindings::{kvm_run, KVM_EXIT_HLT, KVM_EXIT_IO};

    fn view(buf: &mut [u8]) -> RunState<'_> {
        RunState::new(unsafe { VolatileSlice::new(buf.as_mut_ptr(), buf.len()) })
    }

    fn write_io_exit(buf: &mut [u8], direction: u8, size: u8, port: u16, count: u32, data_offset: u64) {
        buf[EXIT_REASON_OFFSET..EXIT_REASON_OFFSET + 4].copy_from_slice(&KVM_EXIT_IO.to_ne_bytes());
        buf[IO_DIRECTION_OFFSET] = direction;
        buf[IO_SIZE_OFFSET] = size;
        buf[IO_PORT_OFFSET..IO_PORT_OFFSET + 2].copy_from_slice(&port.to_ne_bytes());
        buf[IO_COUNT_OFFSET..IO_COUNT_OFFSET + 4].copy_from_slice(&count.to_ne_bytes());
        buf[IO_DATA_OFFSET_OFFSET..IO_DATA_OFFSET_OFFSET + 8]
            .copy_from_slice(&data_offset.to_ne_bytes());
    }

    #[test]
    fn test_offsets_match_kvm_run() {
        let run: kvm_run = unsafe { std::mem::zeroed() };
        let base = &run as *const kvm_run as usize;
        assert_eq!(
            std::ptr::addr_of!(run.exit_reason) as usize - base,
            EXIT_REASON_OFFSET
        );
        unsafe {
            let io = std::ptr::addr_of!(run.__bindgen_anon_1.io);
            assert_eq!(std::ptr::addr_of!((*io).direction) as usize - base, IO_DIRECTION_OFFSET);
            assert_eq!(std::ptr::addr_of!((*io).size) as usize - base, IO_SIZE_OFFSET);
            assert_eq!(std::ptr::addr_of!((*io).port) as usize - base, IO_PORT_OFFSET);
            assert_eq!(std::ptr::addr_of!((*io).count) as usize - base, IO_COUNT_OFFSET);
            assert_eq!(
                std::ptr::addr_of!((*io).data_offset) as usize - base,
                IO_DATA_OFFSET_OFFSET
            );
        }
    }

    #[test]
    fn test_exit_reason() {
        let mut buf = vec![0u8; 0x1000];
        buf[EXIT_REASON_OFFSET..EXIT_REASON_OFFSET + 4].copy_from_slice(&KVM_EXIT_HLT.to_ne_bytes());
        assert_eq!(view(&mut buf).exit_reason().unwrap(), KVM_EXIT_HLT);
    }

    #[test]
    fn test_io_out_exit() {
        let mut buf = vec![0u8; 0x1000];
        write_io_exit(&mut buf, KVM_EXIT_IO_OUT as u8, 1, 0x3f8, 1, 0x800);
        buf[0x800] = b'1';

        let run_state = view(&mut buf);
        let io = run_state.io().unwrap();
        assert_eq!(
            io,
            IoExit {
                direction: IoDirection::Out,
                size: 1,
                port: 0x3f8,
                count: 1,
                data_offset: 0x800,
            }
        );
        assert_eq!(run_state.io_data(&io).unwrap(), vec![b'1']);
    }

    #[test]
    fn test_io_direction() {
        assert_eq!(IoDirection::from(KVM_EXIT_IO_IN as u8), IoDirection::In);
        assert_eq!(IoDirection::from(KVM_EXIT_IO_OUT as u8), IoDirection::Out);
        assert_eq!(IoDirection::from(7), IoDirection::Unknown(7));
    }

    #[test]
    fn test_reads_are_bounds_checked() {
        // Too short to even hold the exit union.
        let mut short = vec![0u8; 16];
        let run_state = view(&mut short);
        assert!(run_state.exit_reason().is_ok());
        assert_eq!(
            run_state.io().unwrap_err(),
            RunStateError::OutOfBounds {
                offset: IO_DIRECTION_OFFSET,
                len: 1,
                size: 16,
            }
        );

        // A data offset pointing past the mapping.
        let mut buf = vec![0u8; 0x100];
        write_io_exit(&mut buf, KVM_EXIT_IO_OUT as u8, 1, 0x3f8, 1, 0x100);
        let run_state = view(&mut buf);
        let io = run_state.io().unwrap();
        assert!(matches!(
            run_state.io_data(&io),
            Err(RunStateError::OutOfBounds { offset: 0x100, len: 1, .. })
        ));

        // A repetition count whose payload overflows the mapping.
        write_io_exit(&mut buf, KVM_EXIT_IO_OUT as u8, 4, 0x3f8, u32::MAX, 0x80);
        let run_state = view(&mut buf);
        let io = run_state.io().unwrap();
        assert!(run_state.io_data(&io).is_err());
    }
}
