/// Wrapper for configuring the guest memory region.
pub mod machine_config;
/// Wrapper for configuring the guest program.
pub mod program;
