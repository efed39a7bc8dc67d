//! The interactive pump: stdin → proxy socket → stdout.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

use anyhow::{Context, Result, anyhow, bail};
use filedescriptor::FileDescriptor;
use localproxy_core::{
    EventLoop, Interest, LocalProxySocket, Plug, ProxyConfig, Readiness, Ready, Socket, Target,
    new_connection,
};
use tracing::{debug, trace};

/// Stop reading stdin while this much is queued for the proxy.
const HIGH_WATER: usize = 1 << 20;
/// Resume once the queue drains below this.
const LOW_WATER: usize = HIGH_WATER / 4;

enum Outcome {
    Eof,
    Failed(String),
}

/// Plug that copies inbound data to stdout and proxy chatter to stderr.
#[derive(Default)]
struct Terminal {
    outcome: RefCell<Option<Outcome>>,
    output_error: RefCell<Option<io::Error>>,
}

impl Plug for Terminal {
    fn receive(&self, data: &[u8]) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = stdout.write_all(data).and_then(|()| stdout.flush()) {
            self.output_error.borrow_mut().get_or_insert(err);
        }
    }

    fn closing(&self, error: Option<&io::Error>) {
        let mut outcome = self.outcome.borrow_mut();
        if outcome.is_none() {
            *outcome = Some(match error {
                None => Outcome::Eof,
                Some(err) => Outcome::Failed(err.to_string()),
            });
        }
    }

    fn sent(&self, buffered: usize) {
        trace!(buffered, "proxy drained");
    }

    fn log(&self, message: &str) {
        write_message(&mut io::stderr().lock(), message);
    }
}

/// A lost status line is not worth ending the session over.
fn write_message(out: &mut impl Write, message: &str) {
    if let Err(err) = writeln!(out, "{message}").and_then(|()| out.flush()) {
        debug!(error = %err, "could not write proxy message to stderr");
    }
}

/// Local stdin, watched on the same event loop as the socket.
struct Input {
    fd: FileDescriptor,
    paused: bool,
}

impl Input {
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Run one proxied session to completion.
pub fn run(config: &ProxyConfig, target: &Target) -> Result<()> {
    let event_loop = EventLoop::new();
    let terminal = Rc::new(Terminal::default());
    let plug: Weak<dyn Plug> = Rc::downgrade(&terminal) as Weak<dyn Plug>;

    let Some(socket) = new_connection(event_loop.context(), target, config, plug) else {
        bail!(
            "proxy mode '{}' needs a direct connection to {target}, which ftproxy does not make",
            config.mode
        );
    };
    if let Some(message) = socket.socket_error() {
        bail!("local proxy setup failed: {message}");
    }

    let mut input = Some(Input {
        fd: FileDescriptor::dup(&io::stdin()).context("duplicating stdin")?,
        paused: false,
    });
    if let Some(input) = &input {
        event_loop.readiness().watch(input.raw(), Interest::Read);
    }

    loop {
        if let Some(err) = terminal.output_error.borrow_mut().take() {
            return Err(err).context("writing to stdout");
        }
        if let Some(outcome) = terminal.outcome.borrow_mut().take() {
            return match outcome {
                Outcome::Eof => {
                    debug!("proxy connection closed");
                    Ok(())
                }
                Outcome::Failed(message) => Err(anyhow!("proxy connection failed: {message}")),
            };
        }

        let unclaimed = event_loop.turn(None)?;
        for (fd, ready) in unclaimed {
            let is_input = input.as_ref().is_some_and(|input| input.raw() == fd);
            if is_input && ready == Ready::Readable {
                if !pump_stdin(&event_loop, &socket, &mut input, config.read_chunk_size)? {
                    input = None;
                }
            } else {
                trace!(fd, ?ready, "stray event");
            }
        }

        if let Some(input) = input.as_mut() {
            update_backpressure(&event_loop, &socket, input);
        }
    }
}

/// Move one chunk from stdin to the socket. Returns false once stdin ended.
fn pump_stdin(
    event_loop: &EventLoop,
    socket: &LocalProxySocket,
    input: &mut Option<Input>,
    chunk: usize,
) -> Result<bool> {
    let Some(current) = input.as_mut() else {
        return Ok(false);
    };
    let mut buf = vec![0u8; chunk];
    let n = match current.fd.read(&mut buf) {
        Ok(n) => n,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(true),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(true),
        Err(err) => return Err(err).context("reading stdin"),
    };

    if n == 0 {
        event_loop.readiness().unwatch(current.raw());
        debug!("stdin closed, sending end-of-file to proxy");
        socket.write_eof().context("half-closing proxy")?;
        return Ok(false);
    }

    socket.write(&buf[..n]).context("writing to proxy")?;
    Ok(true)
}

fn update_backpressure(event_loop: &EventLoop, socket: &LocalProxySocket, input: &mut Input) {
    let buffered = socket.buffered();
    if !input.paused && buffered >= HIGH_WATER {
        event_loop.readiness().unwatch(input.raw());
        input.paused = true;
        debug!(buffered, "proxy is slow, pausing stdin");
    } else if input.paused && buffered < LOW_WATER {
        event_loop.readiness().watch(input.raw(), Interest::Read);
        input.paused = false;
        debug!(buffered, "resuming stdin");
    }
}
