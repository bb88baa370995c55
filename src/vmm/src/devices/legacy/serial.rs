// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::NoInterrupt;
use std::io::Write;
use vm_superio::serial::{Error as SerialError, SerialEvents};
use vm_superio::Serial;

pub struct ConsoleEvents;

impl SerialEvents for ConsoleEvents {
    fn buffer_read(&self) {}

    fn out_byte(&self) {}

    fn tx_lost_byte(&self) {
        log::warn!("Serial console dropped an output byte");
    }

    fn in_buffer_empty(&self) {}
}

/// 16550 UART whose transmitted bytes go to `out` unchanged.
pub struct SerialConsole {
    serial: Serial<NoInterrupt, ConsoleEvents, Box<dyn Write + Send>>,
}

impl SerialConsole {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        SerialConsole {
            serial: Serial::with_events(NoInterrupt, ConsoleEvents, out),
        }
    }

    /// Guest read of register `offset`.
    pub fn read(&mut self, offset: u8) -> u8 {
        self.serial.read(offset)
    }

    /// Guest write of `value` to register `offset`.
    pub fn write(&mut self, offset: u8, value: u8) -> Result<(), SerialError<std::io::Error>> {
        self.serial.write(offset, value)
    }
}

impl std::fmt::Debug for SerialConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConsole").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::SharedBuffer;

    // Line status register and its "transmitter holding register empty" bit.
    const LSR_OFFSET: u8 = 5;
    const LSR_THR_EMPTY: u8 = 0x20;

    #[test]
    fn test_transmit() {
        let out = SharedBuffer::default();
        let mut console = SerialConsole::new(Box::new(out.clone()));
        for byte in b"1\n" {
            console.write(0, *byte).unwrap();
        }
        assert_eq!(out.contents(), b"1\n");
        assert_ne!(console.read(LSR_OFFSET) & LSR_THR_EMPTY, 0);
    }
}
