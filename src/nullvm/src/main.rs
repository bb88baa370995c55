use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::fs::read_to_string;
use std::path::PathBuf;
use std::process::ExitCode;
use vmm::service::STREAM_SERVER_PATH;

mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullVmExitCode {
    /// Success exit code.
    Ok = 0,
    /// Generic error exit code.
    GenericError = 1,
    /// Bad configuration for nullvm's resources.
    BadConfiguration = 153,
}

#[derive(Debug, thiserror::Error)]
enum CliInputError {
    #[error("Failed to open file: {0}")]
    FileIo(#[from] std::io::Error),
    #[error("Failed to initialize the logger: {0}")]
    Logger(#[from] vmm::logger::LoggerError),
    #[error("Failed to execute vmm: {0}")]
    Utils(#[from] utils::UtilsError),
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("Unexpected input error: {0}")]
    CliError(#[from] CliInputError),
}

impl MainError {
    fn exit_code(&self) -> NullVmExitCode {
        match self {
            MainError::CliError(e) => match e {
                CliInputError::FileIo(_) => NullVmExitCode::BadConfiguration,
                CliInputError::Utils(utils::UtilsError::CreateVmResources(_)) => {
                    NullVmExitCode::BadConfiguration
                }
                CliInputError::Logger(_) | CliInputError::Utils(_) => {
                    NullVmExitCode::GenericError
                }
            },
        }
    }
}

impl From<MainError> for ExitCode {
    fn from(value: MainError) -> Self {
        ExitCode::from(value.exit_code() as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Maximum level of the log lines written to stderr
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Virtual Machine related operations
    #[command(subcommand)]
    Vm(VmOperation),
    /// Show the host CPU and its virtualization support
    Cpu,
    /// Serve a virtual machine over a unix domain socket
    Serve {
        /// Path of the server socket
        #[arg(short, long, value_name = "PATH", default_value = STREAM_SERVER_PATH)]
        socket: PathBuf,
    },
    /// Drive a virtual machine served by `nullvm serve`
    #[command(subcommand)]
    Client(ClientOperation),
}

#[derive(Debug, Subcommand)]
enum VmOperation {
    /// Run guest VM
    Run {
        /// Path of the config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ClientOperation {
    /// Run guest VM on the server
    Run {
        /// Path of the config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Path of the server socket
        #[arg(short, long, value_name = "PATH", default_value = STREAM_SERVER_PATH)]
        socket: PathBuf,
    },
}

fn run(cli: Cli) -> Result<(), CliInputError> {
    vmm::logger::init(cli.log_level.into())?;
    match cli.command {
        Command::Vm(op) => match op {
            VmOperation::Run { config } => {
                let config = read_to_string(config)?;
                utils::run_vm_from_config(&config)?;
            }
        },
        Command::Cpu => {
            println!("{}", utils::cpu_report()?);
            utils::check_virtualization()?;
        }
        Command::Serve { socket } => utils::serve(&socket)?,
        Command::Client(op) => match op {
            ClientOperation::Run { config, socket } => {
                let config = read_to_string(config)?;
                utils::run_vm_remotely(&config, &socket)?;
            }
        },
    }
    Ok(())
}

fn main_exec() -> Result<(), MainError> {
    let cli = Cli::parse();
    let result = run(cli);
    if let Err(e) = result {
        log::error!("{}", e);
        return Err(MainError::CliError(e));
    }
    Ok(())
}

fn main() -> ExitCode {
    let result = main_exec();
    if let Err(err) = result {
        eprintln!("Error: {err:?}");
        ExitCode::from(err)
    } else {
        ExitCode::SUCCESS
    }
}
