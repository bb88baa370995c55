// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Whether this process may open `/dev/kvm` read-write.
///
/// Tests that need a real hypervisor return early when this is false, so the rest of the
/// suite still runs on hosts without nested virtualization.
pub fn kvm_available() -> bool {
    let available = OpenOptions::new()
        .read(true)
        .write(true)
        .open(crate::vstate::kvm::KVM_DEVICE_PATH)
        .is_ok();
    if !available {
        eprintln!("skipping: /dev/kvm is not accessible");
    }
    available
}

/// A `Write` sink whose contents can be inspected after it has been handed off.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
