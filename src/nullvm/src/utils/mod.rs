use std::path::Path;
use vmm::builder::{build_and_run_vm, StartVmError};
use vmm::cpu::{self, GetCpuidError};
use vmm::resources::VmResources;
use vmm::service::protocol::{Request, Response};
use vmm::service::{create_transport, StreamClient, TransportError, TransportKind};

#[derive(Debug, thiserror::Error)]
pub enum UtilsError {
    /// Failed to create VmResources.
    #[error("Failed to create VmResources: {0}")]
    CreateVmResources(#[from] vmm::resources::ResourcesError),
    /// Failed to build or run the Vm.
    #[error("Failed to run virtual machine: {0}")]
    RunVm(StartVmError),
    /// Control-plane transport failure.
    #[error("Control plane error: {0}")]
    Transport(#[from] TransportError),
    /// The server refused a request.
    #[error("Server refused {request}: {message}")]
    Remote {
        request: &'static str,
        message: String,
    },
    /// Host CPU identification failed.
    #[error("Failed to identify the host CPU: {0}")]
    Cpuid(#[from] GetCpuidError),
    /// The host CPU has neither VMX nor SVM.
    #[error("Hardware virtualization is not supported on this host")]
    VirtualizationUnsupported,
}

pub fn run_vm_from_config(config: &str) -> Result<(), UtilsError> {
    // Prepare resources from the given configuration file.
    let vm_resources = VmResources::from_json(config)?;
    build_and_run_vm(&vm_resources).map_err(UtilsError::RunVm)?;
    Ok(())
}

pub fn serve(socket: &Path) -> Result<(), UtilsError> {
    let mut transport = create_transport(TransportKind::Stream, socket)?;
    transport.init()?;
    transport.run()?;
    Ok(())
}

/// Run the configured guest on the server listening at `socket`.
pub fn run_vm_remotely(config: &str, socket: &Path) -> Result<(), UtilsError> {
    let vm_resources = VmResources::from_json(config)?;
    let mut client = StreamClient::new(socket);
    client.init()?;

    let requests = [
        ("init", Request::Init),
        (
            "set_mem_region",
            Request::SetMemRegion {
                guest_addr: vm_resources.vm_config.guest_addr,
                size: vm_resources.vm_config.mem_size,
            },
        ),
        (
            "load_raw",
            Request::LoadRaw {
                code: vm_resources.code,
            },
        ),
        ("run", Request::Run),
    ];
    for (name, request) in requests {
        if let Response::Error { message } = client.request(&request)? {
            return Err(UtilsError::Remote {
                request: name,
                message,
            });
        }
        log::debug!("Server accepted {}", name);
    }
    Ok(())
}

pub fn cpu_report() -> Result<String, UtilsError> {
    let support = if cpu::is_virtualization_supported() {
        "supported"
    } else {
        "not supported"
    };
    Ok(format!(
        "Vendor: {}\nBrand: {}\nHardware virtualization: {}",
        cpu::vendor()?,
        cpu::brand(),
        support
    ))
}

/// Fail unless the host CPU supports hardware virtualization.
pub fn check_virtualization() -> Result<(), UtilsError> {
    if !cpu::is_virtualization_supported() {
        return Err(UtilsError::VirtualizationUnsupported);
    }
    Ok(())
}
