//! Connection factory: spawn the proxy command or open replay files.
//!
//! Construction never fails outright for a local mode. If the pipes, the
//! spawn or the files cannot be set up, the socket is still returned with
//! its setup error recorded (see `Socket::socket_error`), so callers report
//! proxy failures through the same path as connection failures.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{Child, Command};
use std::rc::{Rc, Weak};

use filedescriptor::{FileDescriptor, Pipe};
use tracing::{debug, info, warn};

use crate::config::{ProxyConfig, ProxyMode};
use crate::context::ProxyContext;
use crate::error::{SetupError, into_io_error};
use crate::plug::Plug;
use crate::socket::{Endpoints, LocalProxySocket};
use crate::target::{Target, format_command};

const DISCARD_PATH: &str = "/dev/null";

/// Create a proxy socket for `target`, or `None` if `config` does not ask
/// for a local proxy and the caller should connect directly.
pub fn new_connection(
    ctx: &Rc<ProxyContext>,
    target: &Target,
    config: &ProxyConfig,
    plug: Weak<dyn Plug>,
) -> Option<LocalProxySocket> {
    let command = format_command(&config.command, target, config);

    let endpoints = match config.mode {
        ProxyMode::Command => {
            let message = format!("Starting local proxy command: {command}");
            info!(destination = %target, shell = %config.shell.display(), "{message}");
            if let Some(plug) = plug.upgrade() {
                plug.log(&message);
            }
            spawn_command(&command, &config.shell)
        }
        ProxyMode::File => {
            debug!(destination = %target, path = %command, "opening proxy replay file");
            open_replay(Path::new(&command))
        }
        mode => {
            debug!(%mode, "not a local proxy mode");
            return None;
        }
    };

    let socket = LocalProxySocket::new(ctx, plug, config.read_chunk_size);
    match endpoints {
        Ok(endpoints) => socket.attach(endpoints),
        Err(err) => socket.fail_setup(err),
    }
    Some(socket)
}

fn new_pipe() -> Result<Pipe, SetupError> {
    Pipe::new().map_err(|err| SetupError::Pipe(into_io_error(err)))
}

fn child_stdio(fd: &FileDescriptor) -> Result<std::process::Stdio, SetupError> {
    fd.as_stdio()
        .map_err(|err| SetupError::Pipe(into_io_error(err)))
}

fn set_non_blocking(fds: &mut [&mut FileDescriptor]) -> Result<(), SetupError> {
    for fd in fds.iter_mut() {
        fd.set_non_blocking(true)
            .map_err(|err| SetupError::NonBlocking(into_io_error(err)))?;
    }
    Ok(())
}

fn abandon_child(mut child: Child) {
    let pid = child.id();
    if let Err(err) = child.kill() {
        debug!(pid, error = %err, "kill of abandoned proxy command failed");
    }
    if let Err(err) = child.wait() {
        warn!(pid, error = %err, "failed to reap abandoned proxy command");
    }
}

/// Whether a failed spawn never got as far as creating a process.
///
/// Anything else (missing shell, permission denied, bad interpreter) happened
/// in the child after the fork and only ever looks like end-of-file.
fn is_fork_failure(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::OutOfMemory
    )
}

/// Run `<shell> -c <command>` with its stdio on three fresh pipes.
fn spawn_command(command: &str, shell: &Path) -> Result<Endpoints, SetupError> {
    let stdin = new_pipe()?;
    let stdout = new_pipe()?;
    let stderr = new_pipe()?;

    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(child_stdio(&stdin.read)?)
        .stdout(child_stdio(&stdout.write)?)
        .stderr(child_stdio(&stderr.write)?);
    let spawned = cmd.spawn();
    // The command holds duplicates of the child ends; they must close here
    // or the parent would never see end-of-file from the child.
    drop(cmd);
    drop(stdin.read);
    drop(stdout.write);
    drop(stderr.write);

    let child = match spawned {
        Ok(child) => Some(child),
        Err(err) if is_fork_failure(&err) => return Err(SetupError::Spawn(err)),
        Err(err) => {
            warn!(shell = %shell.display(), error = %err, "proxy shell could not be executed");
            None
        }
    };
    let mut to_child = stdin.write;
    let mut from_child = stdout.read;
    let mut err_child = stderr.read;
    if let Err(err) = set_non_blocking(&mut [&mut to_child, &mut from_child, &mut err_child]) {
        if let Some(child) = child {
            abandon_child(child);
        }
        return Err(err);
    }

    if let Some(child) = &child {
        debug!(pid = child.id(), "proxy command spawned");
    }
    Ok(Endpoints {
        to_child,
        from_child,
        err_child: Some(err_child),
        child,
    })
}

/// Writes go to `/dev/null`; reads come from `path`.
fn open_replay(path: &Path) -> Result<Endpoints, SetupError> {
    let discard = OpenOptions::new()
        .write(true)
        .open(DISCARD_PATH)
        .map_err(SetupError::Discard)?;
    let input = File::open(path).map_err(|source| SetupError::Input {
        path: path.to_path_buf(),
        source,
    })?;

    let mut to_child = FileDescriptor::new(discard);
    let mut from_child = FileDescriptor::new(input);
    set_non_blocking(&mut [&mut to_child, &mut from_child])?;

    Ok(Endpoints {
        to_child,
        from_child,
        err_child: None,
        child: None,
    })
}
