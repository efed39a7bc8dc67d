//! Configuration for local proxy connections.
//!
//! Loaded from TOML; every field has a default so a partial file is fine:
//!
//! ```toml
//! mode = "command"
//! command = "ssh -W %host:%port jumphost"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Largest chunk read from a proxy descriptor in one readiness event.
pub const DEFAULT_READ_CHUNK: usize = 20480;

/// Template used in command mode when none is configured.
pub const DEFAULT_COMMAND_TEMPLATE: &str = "connect %host %port";

/// Shell used to run the proxy command.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// How the client reaches its target.
///
/// Only `Command` and `File` are implemented by this crate; the network proxy
/// types belong to the caller's direct-connection path and make the factory
/// decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    None,
    Http,
    Socks4,
    Socks5,
    Telnet,
    /// Run a local command and talk to it over pipes
    Command,
    /// Replay a file as inbound data and discard outbound data
    #[serde(alias = "fuzz")]
    File,
}

impl ProxyMode {
    /// Whether this crate builds the socket for this mode.
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Command | Self::File)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Http => "http",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
            Self::Telnet => "telnet",
            Self::Command => "command",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "http" => Ok(Self::Http),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            "telnet" => Ok(Self::Telnet),
            "command" | "cmd" => Ok(Self::Command),
            "file" | "fuzz" => Ok(Self::File),
            _ => Err(format!(
                "unknown proxy mode: {s}. Expected one of: none, http, socks4, socks5, telnet, command, file"
            )),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Settings for a local proxy connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    /// Command template (command mode) or input path template (file mode)
    pub command: String,
    /// Shell that runs the command as `<shell> -c <command>`
    pub shell: PathBuf,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub username: String,
    pub password: String,
    pub read_chunk_size: usize,
    pub logging: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::None,
            command: DEFAULT_COMMAND_TEMPLATE.to_string(),
            shell: PathBuf::from(DEFAULT_SHELL),
            proxy_host: "proxy".to_string(),
            proxy_port: 80,
            username: String::new(),
            password: String::new(),
            read_chunk_size: DEFAULT_READ_CHUNK,
            logging: LogConfig::default(),
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("mode", &self.mode)
            .field("command", &self.command)
            .field("shell", &self.shell)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("read_chunk_size", &self.read_chunk_size)
            .field("logging", &self.logging)
            .finish()
    }
}

impl ProxyConfig {
    /// Config for running `command` as a proxy command.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            mode: ProxyMode::Command,
            command: command.into(),
            ..Self::default()
        }
    }

    /// Config for replaying the file at `path`.
    pub fn replay_file(path: impl AsRef<Path>) -> Self {
        Self {
            mode: ProxyMode::File,
            command: path.as_ref().display().to_string(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode.is_local() && self.command.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "mode '{}' needs a non-empty command",
                self.mode
            )));
        }
        if self.mode == ProxyMode::Command && self.shell.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("shell must not be empty".to_string()));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
