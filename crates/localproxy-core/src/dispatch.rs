//! Readiness dispatch.
//!
//! Maps a descriptor event back to the socket that owns the descriptor and
//! performs the read or write it calls for. All state changes happen with
//! the socket borrowed; the plug is only called after the borrow is released.

use std::cell::RefCell;
use std::io::{self, Read};
use std::os::fd::RawFd;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::context::ProxyContext;
use crate::readiness::Ready;
use crate::registry::Role;
use crate::socket::SocketState;

enum ReadOutcome {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

fn read_once(desc: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match desc.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

impl ProxyContext {
    /// Deliver one readiness event.
    ///
    /// Returns `false` when no live proxy socket owns `fd`, in which case the
    /// event belongs to someone else (or is stale) and nothing was done.
    pub fn dispatch(&self, fd: RawFd, ready: Ready) -> bool {
        let Some((role, state)) = self.lookup_socket(fd) else {
            trace!(fd, ?ready, "event for unregistered descriptor");
            return false;
        };

        match (role, ready) {
            (Role::DataIn, Ready::Readable) => self.read_data(fd, &state),
            (Role::Stderr, Ready::Readable) => self.read_stderr(fd, &state),
            (Role::DataOut, Ready::Writable) => self.write_ready(&state),
            (role, ready) => trace!(fd, %role, ?ready, "ignoring event for other direction"),
        }
        true
    }

    fn read_data(&self, fd: RawFd, state: &Rc<RefCell<SocketState>>) {
        let (outcome, plug) = {
            let mut state = state.borrow_mut();
            if state.frozen {
                return;
            }
            let id = state.id;
            let mut buf = vec![0u8; state.read_chunk];
            let Some(desc) = state.descriptor_for(Role::DataIn, fd) else {
                return;
            };
            let outcome = match read_once(desc, &mut buf) {
                Ok(0) => {
                    debug!(socket = %id, "proxy end-of-file");
                    state.release(Role::DataIn, self);
                    ReadOutcome::Eof
                }
                Ok(n) => {
                    buf.truncate(n);
                    trace!(socket = %id, len = n, "proxy data");
                    ReadOutcome::Data(buf)
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    debug!(socket = %id, error = %err, "proxy read failed");
                    state.release(Role::DataIn, self);
                    ReadOutcome::Failed(err)
                }
            };
            (outcome, state.plug.upgrade())
        };

        let Some(plug) = plug else {
            return;
        };
        match outcome {
            ReadOutcome::Data(data) => plug.receive(&data),
            ReadOutcome::Eof => plug.closing(None),
            ReadOutcome::Failed(err) => plug.closing(Some(&err)),
        }
    }

    fn read_stderr(&self, fd: RawFd, state: &Rc<RefCell<SocketState>>) {
        let (lines, plug) = {
            let mut state = state.borrow_mut();
            let id = state.id;
            let mut buf = vec![0u8; state.read_chunk];
            let Some(desc) = state.descriptor_for(Role::Stderr, fd) else {
                return;
            };
            let lines: Vec<String> = match read_once(desc, &mut buf) {
                Ok(0) => {
                    state.release(Role::Stderr, self);
                    state.stderr_lines.finish().into_iter().collect()
                }
                Ok(n) => state.stderr_lines.push(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    debug!(socket = %id, error = %err, "proxy stderr read failed");
                    state.release(Role::Stderr, self);
                    let rest = state.stderr_lines.finish();
                    state.stderr_lines.clear();
                    rest.into_iter().collect()
                }
            };
            (lines, state.plug.upgrade())
        };

        let Some(plug) = plug else {
            return;
        };
        for line in lines {
            plug.log(&format!("proxy: {line}"));
        }
    }

    fn write_ready(&self, state: &Rc<RefCell<SocketState>>) {
        let (sent, buffered, plug) = {
            let mut state = state.borrow_mut();
            let sent = state.try_send(self);
            (sent, state.buffered(), state.plug.upgrade())
        };
        if sent > 0 {
            if let Some(plug) = plug {
                plug.sent(buffered);
            }
        }
    }
}
