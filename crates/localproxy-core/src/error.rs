//! Error types for localproxy-core

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for localproxy-core
#[derive(Error, Debug)]
pub enum Error {
    /// `write` was called after `write_eof`
    #[error("write attempted after end-of-file was requested")]
    WriteAfterEof,

    /// `write_eof` was called more than once
    #[error("end-of-file was already requested on this socket")]
    EofAlreadyRequested,

    /// The socket has been closed
    #[error("socket is closed")]
    Closed,

    /// The socket could not be set up
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure while constructing a proxy socket.
///
/// The `Display` form is the message reported by `Socket::socket_error`.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("pipe: {0}")]
    Pipe(io::Error),

    #[error("fork: {0}")]
    Spawn(io::Error),

    #[error("fcntl: {0}")]
    NonBlocking(io::Error),

    #[error("/dev/null: {0}")]
    Discard(io::Error),

    #[error("{}: {source}", path.display())]
    Input { path: PathBuf, source: io::Error },
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Copy an I/O error so it can be handed out while the original stays recorded.
pub(crate) fn duplicate_io_error(err: &io::Error) -> io::Error {
    match err.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(err.kind(), err.to_string()),
    }
}

/// Unwrap the OS error carried by a `filedescriptor` error.
pub(crate) fn into_io_error(err: filedescriptor::Error) -> io::Error {
    match err {
        filedescriptor::Error::Pipe(err)
        | filedescriptor::Error::Poll(err)
        | filedescriptor::Error::FionBio(err)
        | filedescriptor::Error::Io(err) => err,
        other => io::Error::other(other),
    }
}
