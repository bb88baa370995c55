// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Portions Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host CPU identification through `cpuid`.

pub mod common;

pub use common::{get_cpuid, get_vendor_id_from_host, GetCpuidError};

/// To store the brand string we have 3 leaves, each with 4 registers, each with 4 bytes.
pub const BRAND_STRING_LENGTH: usize = 3 * 4 * 4;

/// Reported when the host does not implement the brand string leaves.
pub const UNKNOWN_BRAND: &str = "Unknown CPU brand";

const BRAND_STRING_LEAVES: [u32; 3] = [0x8000_0002, 0x8000_0003, 0x8000_0004];

// Leaf 0x1 ECX.
const VMX_BIT: u32 = 1 << 5;
// Leaf 0x8000_0001 ECX.
const SVM_BIT: u32 = 1 << 2;

/// Safe wrapper around [`std::arch::x86_64::__cpuid_count`].
fn cpuid_count(leaf: u32, subleaf: u32) -> std::arch::x86_64::CpuidResult {
    // SAFETY: every x86_64 CPU implements the `cpuid` instruction.
    unsafe { std::arch::x86_64::__cpuid_count(leaf, subleaf) }
}

/// Host CPU vendor, e.g. `GenuineIntel`.
pub fn vendor() -> Result<String, GetCpuidError> {
    let vendor_id = get_vendor_id_from_host()?;
    Ok(String::from_utf8_lossy(&vendor_id).into_owned())
}

/// Host CPU brand string, or [`UNKNOWN_BRAND`].
pub fn brand() -> String {
    let mut registers = Vec::with_capacity(BRAND_STRING_LEAVES.len() * 4);
    for leaf in BRAND_STRING_LEAVES {
        match get_cpuid(leaf, 0) {
            Ok(entry) => registers.extend([entry.eax, entry.ebx, entry.ecx, entry.edx]),
            Err(_) => return UNKNOWN_BRAND.to_string(),
        }
    }
    brand_from_registers(&registers)
}

fn brand_from_registers(registers: &[u32]) -> String {
    let bytes: Vec<u8> = registers
        .iter()
        .flat_map(|register| register.to_le_bytes())
        .collect();
    let brand = String::from_utf8_lossy(&bytes);
    let brand = brand.trim_end_matches('\0').trim();
    if brand.is_empty() {
        UNKNOWN_BRAND.to_string()
    } else {
        brand.to_string()
    }
}

/// Whether the host CPU advertises Intel VT-x or AMD-V.
pub fn is_virtualization_supported() -> bool {
    let vmx = get_cpuid(0x1, 0)
        .map(|entry| entry.ecx & VMX_BIT != 0)
        .unwrap_or(false);
    let svm = get_cpuid(0x8000_0001, 0)
        .map(|entry| entry.ecx & SVM_BIT != 0)
        .unwrap_or(false);
    vmx || svm
}
