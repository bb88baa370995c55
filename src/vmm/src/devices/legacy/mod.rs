// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod serial;

use std::io;
use vm_superio::Trigger;

/// I/O port of the first legacy serial port's transmit holding register.
pub const COM1_PORT: u16 = 0x3f8;

/// Interrupt trigger for devices without an interrupt line.
///
/// The VM has no in-kernel irqchip, so there is nobody to deliver an interrupt to.
#[derive(Debug, Default)]
pub struct NoInterrupt;

impl Trigger for NoInterrupt {
    type E = io::Error;

    fn trigger(&self) -> io::Result<()> {
        Ok(())
    }
}
