//! Shared fixtures for unit tests.

use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::{Rc, Weak};

use filedescriptor::{FileDescriptor, Pipe};

use crate::context::ProxyContext;
use crate::plug::Plug;
use crate::readiness::{PollReadiness, Readiness};
use crate::socket::{Endpoints, LocalProxySocket, Socket};

/// Plug that records every notification.
#[derive(Default)]
pub(crate) struct RecordingPlug {
    pub(crate) data: RefCell<Vec<u8>>,
    pub(crate) closings: RefCell<Vec<Option<io::ErrorKind>>>,
    pub(crate) sent: RefCell<Vec<usize>>,
    pub(crate) logs: RefCell<Vec<String>>,
    close_on_eof: Option<Weak<LocalProxySocket>>,
}

impl RecordingPlug {
    /// A recorder that closes `socket` from inside `closing`.
    pub(crate) fn closing_on_eof(socket: Weak<LocalProxySocket>) -> Self {
        Self {
            close_on_eof: Some(socket),
            ..Self::default()
        }
    }

    pub(crate) fn received(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub(crate) fn errors(&self) -> Vec<Option<io::ErrorKind>> {
        self.closings.borrow().clone()
    }
}

impl Plug for RecordingPlug {
    fn receive(&self, data: &[u8]) {
        self.data.borrow_mut().extend_from_slice(data);
    }

    fn closing(&self, error: Option<&io::Error>) {
        self.closings.borrow_mut().push(error.map(io::Error::kind));
        if let Some(socket) = self.close_on_eof.as_ref().and_then(Weak::upgrade) {
            socket.close();
        }
    }

    fn sent(&self, buffered: usize) {
        self.sent.borrow_mut().push(buffered);
    }

    fn log(&self, message: &str) {
        self.logs.borrow_mut().push(message.to_string());
    }
}

/// A socket attached to plain pipes, with the "child" ends kept by the test.
pub(crate) struct PipeFixture {
    pub(crate) socket: LocalProxySocket,
    pub(crate) ctx: Rc<ProxyContext>,
    pub(crate) readiness: Rc<PollReadiness>,
    pub(crate) plug: Rc<RecordingPlug>,
    /// Reads what the socket writes (non-blocking).
    pub(crate) child_stdin: FileDescriptor,
    /// Feeds the socket's data-in side.
    pub(crate) child_stdout: FileDescriptor,
    /// Feeds the socket's stderr side.
    pub(crate) child_stderr: FileDescriptor,
}

pub(crate) fn pipe_socket() -> PipeFixture {
    let readiness = Rc::new(PollReadiness::new());
    let ctx = ProxyContext::new(Rc::clone(&readiness) as Rc<dyn Readiness>);
    let plug = Rc::new(RecordingPlug::default());
    let weak: Weak<dyn Plug> = Rc::downgrade(&plug) as Weak<dyn Plug>;

    let mut input = Pipe::new().unwrap();
    let mut output = Pipe::new().unwrap();
    let mut errors = Pipe::new().unwrap();
    for fd in [&mut input.write, &mut output.read, &mut errors.read, &mut input.read] {
        fd.set_non_blocking(true).unwrap();
    }

    let socket = LocalProxySocket::new(&ctx, weak, crate::config::DEFAULT_READ_CHUNK);
    socket.attach(Endpoints {
        to_child: input.write,
        from_child: output.read,
        err_child: Some(errors.read),
        child: None,
    });

    PipeFixture {
        socket,
        ctx,
        readiness,
        plug,
        child_stdin: input.read,
        child_stdout: output.write,
        child_stderr: errors.write,
    }
}

/// Read everything currently available without blocking.
pub(crate) fn drain(fd: &mut FileDescriptor) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match fd.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => panic!("drain failed: {err}"),
        }
    }
    out
}
