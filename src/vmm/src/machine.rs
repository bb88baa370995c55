// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The single-vCPU virtual machine and its run loop.
//!
//! A [`VirtualMachine`] goes through
//! `Uninitialized -> Initialized -> MemoryConfigured -> Running -> Halted | Errored`.
//! Kernel resources are released when the value is dropped, in reverse acquisition order:
//! vCPU mapping and descriptor, VM descriptor, KVM descriptor, then guest memory.

use crate::devices::legacy::serial::SerialConsole;
use crate::devices::legacy::COM1_PORT;
use crate::vstate::kvm::{KvmError, KvmSubsystem};
use crate::vstate::memory::{GuestMemory, GUEST_MEMORY_SLOT};
use crate::vstate::vcpu::{IoDirection, RunState, VcpuHandle};
use crate::vstate::vm::VmHandle;
use crate::VmmError;
use kvm_bindings::{KVM_EXIT_HLT, KVM_EXIT_IO};
use log::{debug, info};
use std::fmt;
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmState {
    Uninitialized,
    Initialized,
    MemoryConfigured,
    Running,
    Halted,
    Errored,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Fields drop in declaration order.
#[derive(Debug)]
struct KvmContext {
    vcpu: VcpuHandle,
    vm: VmHandle,
    kvm: KvmSubsystem,
}

#[derive(Debug)]
pub struct VirtualMachine {
    state: VmState,
    context: Option<KvmContext>,
    memory: Option<GuestMemory>,
    serial: SerialConsole,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// A machine whose serial console writes to host stdout.
    pub fn new() -> Self {
        Self::with_serial_output(Box::new(std::io::stdout()))
    }

    /// A machine whose serial console writes to `out`.
    pub fn with_serial_output(out: Box<dyn Write + Send>) -> Self {
        VirtualMachine {
            state: VmState::Uninitialized,
            context: None,
            memory: None,
            serial: SerialConsole::new(out),
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn guest_memory(&self) -> Option<&GuestMemory> {
        self.memory.as_ref()
    }

    pub fn kvm(&self) -> Option<&KvmSubsystem> {
        self.context.as_ref().map(|context| &context.kvm)
    }

    pub fn vm(&self) -> Option<&VmHandle> {
        self.context.as_ref().map(|context| &context.vm)
    }

    pub fn vcpu(&self) -> Option<&VcpuHandle> {
        self.context.as_ref().map(|context| &context.vcpu)
    }

    fn invalid_state(&self, operation: &'static str) -> VmmError {
        VmmError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Open KVM, create the VM and its vCPU.
    ///
    /// On failure the machine stays uninitialized and everything acquired so far is
    /// released.
    pub fn init(&mut self) -> Result<(), VmmError> {
        if self.state != VmState::Uninitialized {
            return Err(self.invalid_state("init"));
        }

        let kvm = KvmSubsystem::open().map_err(VmmError::Kvm)?;
        self.init_with(kvm, |kvm, _| kvm.vcpu_mapping_size())
    }

    /// Create the VM and its vCPU on an already opened `kvm`, sizing the vCPU run-state
    /// mapping with `vcpu_mapping_size`.
    pub(crate) fn init_with<F>(
        &mut self,
        kvm: KvmSubsystem,
        vcpu_mapping_size: F,
    ) -> Result<(), VmmError>
    where
        F: FnOnce(&KvmSubsystem, &VmHandle) -> Result<usize, KvmError>,
    {
        let vm = VmHandle::acquire(kvm.create_vm().map_err(VmmError::Kvm)?).map_err(VmmError::Vm)?;
        let mapping_size = vcpu_mapping_size(&kvm, &vm).map_err(VmmError::Kvm)?;
        let vcpu_fd = vm.create_vcpu().map_err(VmmError::Vm)?;
        let vcpu = VcpuHandle::acquire(vcpu_fd, mapping_size).map_err(VmmError::Vcpu)?;

        self.context = Some(KvmContext { vcpu, vm, kvm });
        self.state = VmState::Initialized;
        info!("VM initialized (vCPU run-state mapping: {:#x} bytes)", mapping_size);
        Ok(())
    }

    /// Back guest physical `guest_addr..guest_addr + size` with fresh host memory and
    /// point the vCPU at `guest_addr`.
    ///
    /// Calling this again replaces the previous region.
    pub fn set_mem_region(&mut self, guest_addr: u64, size: usize) -> Result<(), VmmError> {
        if !matches!(
            self.state,
            VmState::Initialized | VmState::MemoryConfigured
        ) {
            return Err(self.invalid_state("set_mem_region"));
        }
        if size == 0 {
            return Err(VmmError::InvalidRegionSize);
        }

        match self.install_region(guest_addr, size) {
            Ok(()) => {
                self.state = VmState::MemoryConfigured;
                info!(
                    "Guest memory configured at {:#x} ({:#x} bytes)",
                    guest_addr, size
                );
                Ok(())
            }
            Err(e) => {
                self.state = VmState::Initialized;
                Err(e)
            }
        }
    }

    fn install_region(&mut self, guest_addr: u64, size: usize) -> Result<(), VmmError> {
        let memory = GuestMemory::new(guest_addr, size).map_err(VmmError::Mapping)?;
        let Some(context) = self.context.as_ref() else {
            return Err(self.invalid_state("set_mem_region"));
        };

        if let Some(old) = self.memory.as_ref() {
            // The kernel refuses to move or resize a live slot, so drop it first.
            // SAFETY: a zero-sized region makes the kernel forget the slot.
            unsafe {
                context.vm.install_memory_region(
                    GUEST_MEMORY_SLOT,
                    old.guest_addr(),
                    0,
                    old.host_address(),
                    0,
                )
            }
            .map_err(VmmError::Vm)?;
            self.memory = None;
        }

        // SAFETY: `memory` is stored in `self` below and outlives the slot, which goes away
        // with the VM descriptor or on the next call to this function.
        unsafe {
            context.vm.install_memory_region(
                GUEST_MEMORY_SLOT,
                guest_addr,
                size as u64,
                memory.host_address(),
                0,
            )
        }
        .map_err(VmmError::Vm)?;
        self.memory = Some(memory);

        let mut regs = context
            .vcpu
            .get_standard_registers()
            .map_err(VmmError::Vcpu)?;
        regs.rip = guest_addr;
        context
            .vcpu
            .set_standard_registers(&regs)
            .map_err(VmmError::Vcpu)
    }

    /// Copy `code` to the start of guest memory.
    pub fn load_raw(&mut self, code: &[u8]) -> Result<(), VmmError> {
        match self.state {
            VmState::MemoryConfigured => {}
            VmState::Uninitialized | VmState::Initialized => {
                return Err(VmmError::MemoryNotConfigured)
            }
            _ => return Err(self.invalid_state("load_raw")),
        }
        if code.is_empty() {
            return Err(VmmError::EmptyPayload);
        }
        let memory = self.memory.as_ref().ok_or(VmmError::MemoryNotConfigured)?;
        if code.len() > memory.size() {
            return Err(VmmError::PayloadTooLarge {
                len: code.len(),
                size: memory.size(),
            });
        }

        memory.write(0, code).map_err(VmmError::GuestMemoryAccess)?;
        debug!(
            "Loaded {} bytes at guest address {:#x}",
            code.len(),
            memory.guest_addr()
        );
        Ok(())
    }

    /// Run the guest until it halts.
    pub fn run(&mut self) -> Result<(), VmmError> {
        if self.state != VmState::MemoryConfigured {
            return Err(self.invalid_state("run"));
        }

        self.state = VmState::Running;
        info!("Starting vCPU");
        match self.run_loop() {
            Ok(()) => {
                self.state = VmState::Halted;
                info!("Guest halted");
                Ok(())
            }
            Err(e) => {
                self.state = VmState::Errored;
                Err(e)
            }
        }
    }

    fn run_loop(&mut self) -> Result<(), VmmError> {
        let Some(context) = self.context.as_ref() else {
            return Err(self.invalid_state("run"));
        };
        let vcpu = &context.vcpu;
        loop {
            vcpu.step().map_err(VmmError::Vcpu)?;
            let run_state = vcpu.run_state();
            let reason = run_state.exit_reason().map_err(VmmError::RunState)?;
            match reason {
                KVM_EXIT_HLT => {
                    debug!("Exit reason: HLT");
                    return Ok(());
                }
                KVM_EXIT_IO => handle_io_exit(&mut self.serial, &run_state)?,
                other => return Err(VmmError::UnhandledExitReason(other)),
            }
        }
    }
}

fn handle_io_exit(serial: &mut SerialConsole, run_state: &RunState) -> Result<(), VmmError> {
    let io = run_state.io().map_err(VmmError::RunState)?;
    debug!(
        "Exit reason: IO {:?} port={:#x} size={} count={}",
        io.direction, io.port, io.size, io.count
    );
    match io.direction {
        IoDirection::Out if io.port == COM1_PORT && io.size == 1 && io.count == 1 => {
            let data = run_state.io_data(&io).map_err(VmmError::RunState)?;
            for byte in data {
                serial.write(0, byte).map_err(VmmError::Serial)?;
            }
        }
        // Nothing is written back, the guest reads whatever the buffer holds.
        IoDirection::In => debug!("Ignoring IN from port {:#x}", io.port),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::fd::is_fd_open;
    use crate::utils::test_utils::{kvm_available, SharedBuffer};

    /// Prints "1\n" on the serial port, then halts.
    pub(crate) const PRINT_ONE: [u8; 12] = [
        0xba, 0xf8, 0x03, // mov dx, 0x3f8
        0xb0, b'0', // mov al, '0'
        0x04, 0x01, // add al, 1
        0xee, // out dx, al
        0xb0, b'\n', // mov al, '\n'
        0xee, // out dx, al
        0xf4, // hlt
    ];

    /// Stores to guest physical address 0, which is not backed by memory.
    pub(crate) const WRITE_UNMAPPED: [u8; 4] = [
        0xa2, 0x00, 0x00, // mov [0], al
        0xf4, // hlt
    ];

    const KVM_EXIT_MMIO: u32 = 6;

    fn setup_machine(out: &SharedBuffer) -> VirtualMachine {
        let mut machine = VirtualMachine::with_serial_output(Box::new(out.clone()));
        machine.init().unwrap();
        machine
    }

    #[test]
    fn test_operations_before_init() {
        let mut machine = VirtualMachine::with_serial_output(Box::new(SharedBuffer::default()));
        assert_eq!(machine.state(), VmState::Uninitialized);
        assert!(machine.vcpu().is_none());
        assert!(machine.guest_memory().is_none());
        assert!(matches!(
            machine.set_mem_region(0x1000, 0x1000),
            Err(VmmError::InvalidState {
                operation: "set_mem_region",
                state: VmState::Uninitialized
            })
        ));
        assert!(matches!(
            machine.load_raw(&PRINT_ONE),
            Err(VmmError::MemoryNotConfigured)
        ));
        assert!(matches!(
            machine.run(),
            Err(VmmError::InvalidState {
                operation: "run",
                ..
            })
        ));
        assert_eq!(machine.state(), VmState::Uninitialized);
    }

    #[test]
    fn test_init_and_drop_closes_fds() {
        if !kvm_available() {
            return;
        }
        let mut machine = setup_machine(&SharedBuffer::default());
        assert_eq!(machine.state(), VmState::Initialized);
        let fds = [
            machine.kvm().unwrap().fd().value().unwrap(),
            machine.vm().unwrap().fd().value().unwrap(),
            machine.vcpu().unwrap().fd().value().unwrap(),
        ];
        assert!(fds.iter().all(|fd| is_fd_open(*fd)));

        assert!(matches!(
            machine.init(),
            Err(VmmError::InvalidState {
                operation: "init",
                state: VmState::Initialized
            })
        ));

        drop(machine);
        assert!(fds.iter().all(|fd| !is_fd_open(*fd)));
    }

    #[test]
    fn test_init_failure_closes_fds() {
        if !kvm_available() {
            return;
        }
        let failures: [fn() -> Result<usize, KvmError>; 2] = [
            || Err(KvmError::QueryFailed(utils::errno::Error::new(libc::EIO))),
            // The vCPU is created, then refused by its handle.
            || Ok(0),
        ];
        for failure in failures {
            let mut machine =
                VirtualMachine::with_serial_output(Box::new(SharedBuffer::default()));
            let kvm = KvmSubsystem::open().unwrap();
            let kvm_fd = kvm.fd().value().unwrap();
            let mut vm_fd = None;
            assert!(machine
                .init_with(kvm, |_, vm| {
                    vm_fd = vm.fd().value();
                    failure()
                })
                .is_err());

            assert_eq!(machine.state(), VmState::Uninitialized);
            assert!(machine.kvm().is_none());
            assert!(machine.vm().is_none());
            assert!(machine.vcpu().is_none());
            assert!(!is_fd_open(kvm_fd));
            assert!(!is_fd_open(vm_fd.unwrap()));
        }
    }

    #[test]
    fn test_set_mem_region_zero_size() {
        if !kvm_available() {
            return;
        }
        let mut machine = setup_machine(&SharedBuffer::default());
        assert!(matches!(
            machine.set_mem_region(0x1000, 0),
            Err(VmmError::InvalidRegionSize)
        ));
        assert!(machine.guest_memory().is_none());
        assert_eq!(machine.state(), VmState::Initialized);
        assert!(matches!(
            machine.load_raw(&PRINT_ONE),
            Err(VmmError::MemoryNotConfigured)
        ));
    }

    #[test]
    fn test_set_mem_region_moves_rip() {
        if !kvm_available() {
            return;
        }
        let mut machine = setup_machine(&SharedBuffer::default());
        machine.set_mem_region(0x1000, 0x1000).unwrap();
        assert_eq!(machine.state(), VmState::MemoryConfigured);
        let memory = machine.guest_memory().unwrap();
        assert_eq!(memory.guest_addr(), 0x1000);
        assert_eq!(memory.size(), 0x1000);
        let regs = machine.vcpu().unwrap().get_standard_registers().unwrap();
        assert_eq!(regs.rip, 0x1000);
    }

    #[test]
    fn test_set_mem_region_twice() {
        if !kvm_available() {
            return;
        }
        let out = SharedBuffer::default();
        let mut machine = setup_machine(&out);
        machine.set_mem_region(0x1000, 0x1000).unwrap();
        machine.set_mem_region(0x4000, 0x2000).unwrap();

        let memory = machine.guest_memory().unwrap();
        assert_eq!(memory.guest_addr(), 0x4000);
        assert_eq!(memory.size(), 0x2000);
        let regs = machine.vcpu().unwrap().get_standard_registers().unwrap();
        assert_eq!(regs.rip, 0x4000);

        // The guest runs from the second region.
        machine.load_raw(&PRINT_ONE).unwrap();
        machine.run().unwrap();
        assert_eq!(out.contents(), b"1\n");
    }

    #[test]
    fn test_load_raw() {
        if !kvm_available() {
            return;
        }
        let mut machine = setup_machine(&SharedBuffer::default());
        machine.set_mem_region(0x1000, 0x1000).unwrap();

        assert!(matches!(
            machine.load_raw(&[]),
            Err(VmmError::EmptyPayload)
        ));
        assert!(matches!(
            machine.load_raw(&[0xf4; 0x1001]),
            Err(VmmError::PayloadTooLarge {
                len: 0x1001,
                size: 0x1000
            })
        ));

        machine.load_raw(&PRINT_ONE).unwrap();
        let mut buf = [0u8; PRINT_ONE.len()];
        machine.guest_memory().unwrap().read(0, &mut buf).unwrap();
        assert_eq!(buf, PRINT_ONE);
    }

    #[test]
    fn test_run_prints_to_serial() {
        if !kvm_available() {
            return;
        }
        let out = SharedBuffer::default();
        let mut machine = setup_machine(&out);
        machine.set_mem_region(0x1000, 0x1000).unwrap();
        machine.load_raw(&PRINT_ONE).unwrap();
        machine.run().unwrap();
        assert_eq!(machine.state(), VmState::Halted);
        assert_eq!(out.contents(), b"1\n");

        // A halted machine does not run again.
        assert!(matches!(
            machine.run(),
            Err(VmmError::InvalidState {
                state: VmState::Halted,
                ..
            })
        ));
    }

    #[test]
    fn test_run_unhandled_exit() {
        if !kvm_available() {
            return;
        }
        let out = SharedBuffer::default();
        let mut machine = setup_machine(&out);
        machine.set_mem_region(0x1000, 0x1000).unwrap();
        machine.load_raw(&WRITE_UNMAPPED).unwrap();
        match machine.run() {
            Err(VmmError::UnhandledExitReason(reason)) => assert_eq!(reason, KVM_EXIT_MMIO),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(machine.state(), VmState::Errored);
        assert!(out.contents().is_empty());

        let fds = [
            machine.kvm().unwrap().fd().value().unwrap(),
            machine.vm().unwrap().fd().value().unwrap(),
            machine.vcpu().unwrap().fd().value().unwrap(),
        ];
        drop(machine);
        assert!(fds.iter().all(|fd| !is_fd_open(*fd)));
    }
}
