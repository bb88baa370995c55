// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::resources::VmResources;
use crate::{VirtualMachine, VmmError};
use log::info;

/// Errors associated with starting the instance.
#[derive(Debug, thiserror::Error)]
pub enum StartVmError {
    /// Creating the VM failed.
    #[error("Cannot create the VM: {0}")]
    Create(#[source] VmmError),
    /// Configuring guest memory failed.
    #[error("Invalid memory configuration: {0}")]
    GuestMemory(#[source] VmmError),
    /// Loading the guest program failed.
    #[error("Cannot load the guest program: {0}")]
    LoadProgram(#[source] VmmError),
    /// The guest stopped on an error.
    #[error("Guest execution failed: {0}")]
    Run(#[source] VmmError),
}

/// Initialize `machine`, give it the configured memory and load the program.
pub fn build_vm(machine: &mut VirtualMachine, resources: &VmResources) -> Result<(), StartVmError> {
    machine.init().map_err(StartVmError::Create)?;
    let vm_config = &resources.vm_config;
    machine
        .set_mem_region(vm_config.guest_addr, vm_config.mem_size)
        .map_err(StartVmError::GuestMemory)?;
    machine
        .load_raw(&resources.code)
        .map_err(StartVmError::LoadProgram)?;
    Ok(())
}

/// Build `machine` from `resources` and run it until the guest halts.
pub fn run_vm(mut machine: VirtualMachine, resources: &VmResources) -> Result<(), StartVmError> {
    build_vm(&mut machine, resources)?;
    info!(
        "Running {} bytes of guest code at {:#x}",
        resources.code.len(),
        resources.vm_config.guest_addr
    );
    machine.run().map_err(StartVmError::Run)
}

/// Build a VM writing its serial output to stdout and run it until the guest halts.
pub fn build_and_run_vm(resources: &VmResources) -> Result<(), StartVmError> {
    run_vm(VirtualMachine::new(), resources)
}
