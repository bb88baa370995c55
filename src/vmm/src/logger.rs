// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide log sink.
//!
//! Every crate in the workspace logs through the `log` facade. The binary installs the
//! sink once with [`init`]: `log` records are forwarded to a `tracing` fmt subscriber that
//! writes `[<time>] [<LEVEL>] <message>` lines to stderr. Until then log records are
//! discarded. [`fatal!`](crate::fatal) is the one escalation path for conditions the
//! process must not survive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Errors associated with installing the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A `log` logger was installed earlier in this process.
    #[error("Logger was already initialized: {0}")]
    AlreadyInitialized(log::SetLoggerError),
    /// A global `tracing` subscriber was installed earlier in this process.
    #[error("Cannot install the log subscriber: {0}")]
    Subscriber(tracing::subscriber::SetGlobalDefaultError),
}

/// Formats events as `[<time>] [<LEVEL>] <message>`.
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[")?;
        SystemTime.format_time(&mut writer)?;
        write!(writer, "] [{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn as_trace(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

fn timestamp() -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = SystemTime.format_time(&mut Writer::new(&mut buf));
    buf
}

/// Install the process-wide logger with `level` as the maximum enabled level.
pub fn init(level: log::LevelFilter) -> Result<(), LoggerError> {
    tracing_log::LogTracer::init_with_filter(level).map_err(LoggerError::AlreadyInitialized)?;
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(as_trace(level))
        .with_writer(std::io::stderr)
        .event_format(LineFormat)
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(LoggerError::Subscriber)?;
    INITIALIZED.store(true, Ordering::SeqCst);
    Ok(())
}

/// Report `args` and abort the process. Use through [`fatal!`](crate::fatal).
pub fn fatal(args: fmt::Arguments) -> ! {
    if INITIALIZED.load(Ordering::SeqCst) {
        log::error!("{}", args);
        log::logger().flush();
    } else {
        eprintln!("[{}] [FATAL] {}", timestamp(), args);
    }
    std::process::abort()
}

/// Log an error and terminate the process without unwinding.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::logger::fatal(format_args!($($arg)+))
    };
}
