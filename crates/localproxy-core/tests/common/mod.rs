//! Shared test infrastructure for localproxy-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::{Recorder, connect};
//! ```

#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;

use localproxy_core::{EventLoop, LocalProxySocket, Plug, ProxyConfig, Target, new_connection};

/// Generous upper bound for anything that waits on a child process.
pub const WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Recorder — a plug that remembers everything it was told
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Recorder {
    pub data: RefCell<Vec<u8>>,
    pub closings: RefCell<Vec<Option<io::ErrorKind>>>,
    pub sent: RefCell<Vec<usize>>,
    pub logs: RefCell<Vec<String>>,
}

impl Recorder {
    pub fn received(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn received_len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn has_closed(&self) -> bool {
        !self.closings.borrow().is_empty()
    }

    pub fn closings(&self) -> Vec<Option<io::ErrorKind>> {
        self.closings.borrow().clone()
    }

    pub fn logged(&self, line: &str) -> bool {
        self.logs.borrow().iter().any(|logged| logged == line)
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.borrow().clone()
    }
}

impl Plug for Recorder {
    fn receive(&self, data: &[u8]) {
        self.data.borrow_mut().extend_from_slice(data);
    }

    fn closing(&self, error: Option<&io::Error>) {
        self.closings.borrow_mut().push(error.map(io::Error::kind));
    }

    fn sent(&self, buffered: usize) {
        self.sent.borrow_mut().push(buffered);
    }

    fn log(&self, message: &str) {
        self.logs.borrow_mut().push(message.to_string());
    }
}

// ---------------------------------------------------------------------------
// Session — one socket on its own event loop
// ---------------------------------------------------------------------------

pub struct Session {
    pub socket: LocalProxySocket,
    pub plug: Rc<Recorder>,
    pub event_loop: EventLoop,
}

impl Session {
    /// Turn the loop until `done` holds; panics after `WAIT`.
    pub fn wait_for(&self, what: &str, mut done: impl FnMut(&Recorder) -> bool) {
        let plug = Rc::clone(&self.plug);
        let satisfied = self
            .event_loop
            .run_until(WAIT, || done(&plug))
            .expect("event loop failed");
        assert!(satisfied, "timed out waiting for {what}");
    }

    /// Turn the loop for roughly `period`, whatever happens.
    pub fn idle(&self, period: Duration) {
        self.event_loop
            .run_until(period, || false)
            .expect("event loop failed");
    }
}

pub fn connect_to(config: &ProxyConfig, target: &Target) -> Session {
    let event_loop = EventLoop::new();
    let plug = Rc::new(Recorder::default());
    let weak: Weak<dyn Plug> = Rc::downgrade(&plug) as Weak<dyn Plug>;
    let socket = new_connection(event_loop.context(), target, config, weak)
        .expect("local proxy mode should produce a socket");
    Session {
        socket,
        plug,
        event_loop,
    }
}

pub fn connect(config: &ProxyConfig) -> Session {
    connect_to(config, &Target::new("example.org", 22))
}

/// Number of descriptors this process has open.
pub fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Whether `pid` still exists (including as a zombie).
pub fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

/// Deterministic non-trivial payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
