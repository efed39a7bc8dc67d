//! Readiness multiplexing.
//!
//! Sockets express "waiting" purely by arming or disarming interest in a
//! descriptor. `Readiness` is the seam a host event loop implements;
//! `PollReadiness` is the stock implementation on top of `poll(2)` (via
//! `filedescriptor::poll`), level-triggered, one interest per descriptor.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use filedescriptor::{POLLERR, POLLHUP, POLLIN, POLLOUT, pollfd};

/// Direction a descriptor is watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
}

/// Readiness reported for a watched descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ready {
    Readable,
    Writable,
}

/// Interest registration used by proxy sockets.
///
/// Implementations must not call back into the dispatcher from these
/// methods; events are delivered later by whoever drives the loop.
pub trait Readiness {
    /// Watch `fd` for `interest`, replacing any previous interest on it.
    fn watch(&self, fd: RawFd, interest: Interest);

    /// Stop watching `fd`. Unknown descriptors are ignored.
    fn unwatch(&self, fd: RawFd);
}

/// `poll(2)`-backed interest table.
#[derive(Debug, Default)]
pub struct PollReadiness {
    interest: RefCell<BTreeMap<RawFd, Interest>>,
}

impl Readiness for PollReadiness {
    fn watch(&self, fd: RawFd, interest: Interest) {
        self.interest.borrow_mut().insert(fd, interest);
    }

    fn unwatch(&self, fd: RawFd) {
        self.interest.borrow_mut().remove(&fd);
    }
}

impl PollReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.interest.borrow().get(&fd).copied()
    }

    pub fn len(&self) -> usize {
        self.interest.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interest.borrow().is_empty()
    }

    /// Wait up to `timeout` (forever if `None`) for watched descriptors.
    ///
    /// Hang-up and error conditions are reported as the armed direction so
    /// the owner performs the read or write that surfaces them. An
    /// interrupted wait returns no events.
    pub fn poll(&self, timeout: Option<Duration>) -> filedescriptor::Result<Vec<(RawFd, Ready)>> {
        let mut fds: Vec<pollfd> = self
            .interest
            .borrow()
            .iter()
            .map(|(&fd, &interest)| pollfd {
                fd,
                events: match interest {
                    Interest::Read => POLLIN,
                    Interest::Write => POLLOUT,
                },
                revents: 0,
            })
            .collect();

        match filedescriptor::poll(&mut fds, timeout) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(filedescriptor::Error::Poll(err)) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        }

        Ok(fds
            .iter()
            .filter(|pfd| pfd.revents & (pfd.events | POLLHUP | POLLERR) != 0)
            .map(|pfd| {
                let ready = if pfd.events & POLLOUT != 0 {
                    Ready::Writable
                } else {
                    Ready::Readable
                };
                (pfd.fd, ready)
            })
            .collect())
    }
}
