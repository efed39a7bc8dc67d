//! ftproxy - connect stdin/stdout to a host through a local proxy.
//!
//! ```text
//! ftproxy --command 'ssh -W %host:%port bastion' db.internal 5432
//! ftproxy --mode file --command ./capture.bin replay 0
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use localproxy_core::config::LogFormat;
use localproxy_core::{ProxyConfig, ProxyMode, Target, init_logging};

mod session;

#[derive(Parser, Debug)]
#[command(name = "ftproxy", version, about = "Connect stdin/stdout to a host through a local proxy command")]
struct Cli {
    /// TOML config file
    #[arg(long, short = 'c', env = "FTPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Proxy mode (command, file); implied as `command` by --command
    #[arg(long, short = 'm')]
    mode: Option<ProxyMode>,

    /// Command template (command mode) or replay file (file mode)
    #[arg(long, short = 'e')]
    command: Option<String>,

    /// Shell used to run the command
    #[arg(long, env = "FTPROXY_SHELL")]
    shell: Option<PathBuf>,

    /// Value for %proxyhost
    #[arg(long)]
    proxy_host: Option<String>,

    /// Value for %proxyport
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Value for %user
    #[arg(long, short = 'u')]
    user: Option<String>,

    /// Value for %pass
    #[arg(long, env = "FTPROXY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins
    #[arg(long, env = "FTPROXY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Target host (%host)
    host: String,

    /// Target port (%port)
    port: u16,
}

impl Cli {
    fn build_config(&self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(command) = &self.command {
            config.command.clone_from(command);
            if !config.mode.is_local() {
                config.mode = ProxyMode::Command;
            }
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(shell) = &self.shell {
            config.shell.clone_from(shell);
        }
        if let Some(host) = &self.proxy_host {
            config.proxy_host.clone_from(host);
        }
        if let Some(port) = self.proxy_port {
            config.proxy_port = port;
        }
        if let Some(user) = &self.user {
            config.username.clone_from(user);
        }
        if let Some(password) = &self.password {
            config.password.clone_from(password);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.build_config()?;
    init_logging(&config.logging).context("initializing logging")?;
    tracing::debug!(?config, "configuration loaded");

    let target = Target::new(cli.host.clone(), cli.port);
    session::run(&config, &target)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ftproxy: {err:#}");
            ExitCode::FAILURE
        }
    }
}
