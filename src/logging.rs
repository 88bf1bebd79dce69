use crate::ndjson_layer::NdjsonLayer;
use crate::redaction::RedactingWriter;
use crate::types::Result;
use std::panic;
use std::path::Path;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

pub const DEFAULT_LOG_FILTER: &str = "parley=debug,push=debug,pending=debug,accumulator=debug,escalation=info,reconciler=info,playback=info,applier=debug";

/// Keeps the non-blocking writers flushing; drop on shutdown.
pub struct LoggingGuards {
    _log: WorkerGuard,
    _trace: WorkerGuard,
}

/// Installs the global subscriber: a plain-text daily log, an NDJSON trace stream, and
/// span-trace capture for `ObservedError`. Both files pass through the redacting writer.
pub fn init_tracing(log_dir: &Path) -> Result<LoggingGuards> {
    std::fs::create_dir_all(log_dir)?;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => DEFAULT_LOG_FILTER.into(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "parley.log");
    let (log_writer, log_guard) = tracing_appender::non_blocking(file_appender);

    let trace_appender = tracing_appender::rolling::daily(log_dir, "trace.ndjson");
    let (trace_writer, trace_guard) = tracing_appender::non_blocking(trace_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || RedactingWriter::new(log_writer.clone()))
                .with_ansi(false),
        )
        .with(NdjsonLayer::new(RedactingWriter::new(trace_writer)))
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .map_err(|e| crate::types::ParleyError::Config(format!("tracing already initialized: {}", e)))?;

    Ok(LoggingGuards {
        _log: log_guard,
        _trace: trace_guard,
    })
}

/// Sets up a global panic hook that logs panics through tracing before the default hook runs.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}
