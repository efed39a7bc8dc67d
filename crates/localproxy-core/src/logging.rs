//! Structured logging for localproxy
//!
//! Uses `tracing` with a pretty or JSON formatter on stderr and an optional
//! append-mode log file. Stdout is left alone: the CLI uses it for the
//! proxied data stream.
//!
//! # Correlation Fields
//!
//! Use these field names consistently in events:
//! - `socket`: proxy socket identifier (`proxy-socket#N`)
//! - `fd`: raw descriptor number
//! - `role`: descriptor role (`data-in`, `data-out`, `stderr`)
//! - `pid`: proxy command process id
//!
//! **Never log proxied payload bytes.** Only sizes are logged; stderr lines
//! from the proxy command go through `Plug::log`.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration (`[logging]` in the config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `localproxy_core=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    pub format: LogFormat,

    /// Also append events to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn open_log_file(path: &Path) -> io::Result<File> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
        _ => {}
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(io::stderr().is_terminal())
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_timer(SystemTime)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    let writer = Mutex::new(file);
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_timer(SystemTime)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber.
///
/// Events go to stderr (stdout carries proxied data in the CLI) and, if
/// configured, to an append-mode file in the same format. Only the first
/// call succeeds.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers = vec![stderr_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(config.format, open_log_file(path)?));
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers).with(filter))?;
    let _ = LOGGING_INITIALIZED.set(());

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "logging initialized"
    );
    Ok(())
}

pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_logs_warnings_to_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = LogConfig {
            level: "trace".to_string(),
            format: LogFormat::Json,
            file: Some(PathBuf::from("/tmp/ftproxy.log")),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.level, "trace");
        assert_eq!(back.format, LogFormat::Json);
        assert_eq!(back.file, config.file);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("proxy.log");
        let file = open_log_file(&path).unwrap();
        drop(file);
        assert!(path.exists());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            LogError::AlreadyInitialized.to_string(),
            "logging already initialized"
        );
    }
}
