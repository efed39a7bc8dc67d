//! Per-loop context and the event-loop driver.
//!
//! A `ProxyContext` owns everything sockets share: the descriptor registry,
//! the deferred callback queue and the readiness multiplexer they arm
//! interest on. There is no process-global state; two contexts are fully
//! independent.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::deferred::CallbackQueue;
use crate::error::{Result, into_io_error};
use crate::readiness::{Interest, PollReadiness, Readiness, Ready};
use crate::registry::{FdRegistry, Role, SocketId};
use crate::socket::SocketState;

/// Shared state for every proxy socket driven by one event loop.
pub struct ProxyContext {
    registry: RefCell<FdRegistry<RefCell<SocketState>>>,
    callbacks: CallbackQueue,
    readiness: Rc<dyn Readiness>,
    next_id: Cell<u64>,
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("registered", &self.registered_fds())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl ProxyContext {
    /// Create a context whose sockets arm interest on `readiness`.
    pub fn new(readiness: Rc<dyn Readiness>) -> Rc<Self> {
        Rc::new(Self {
            registry: RefCell::new(FdRegistry::new()),
            callbacks: CallbackQueue::new(),
            readiness,
            next_id: Cell::new(1),
        })
    }

    pub fn callbacks(&self) -> &CallbackQueue {
        &self.callbacks
    }

    pub fn readiness(&self) -> &dyn Readiness {
        self.readiness.as_ref()
    }

    pub(crate) fn allocate_id(&self) -> SocketId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        SocketId::new(id)
    }

    pub(crate) fn register(
        &self,
        fd: RawFd,
        id: SocketId,
        role: Role,
        socket: &Weak<RefCell<SocketState>>,
        interest: Option<Interest>,
    ) {
        self.registry
            .borrow_mut()
            .insert(fd, id, role, Weak::clone(socket));
        if let Some(interest) = interest {
            self.readiness.watch(fd, interest);
        }
        trace!(fd, socket = %id, role = %role, "descriptor registered");
    }

    /// Drop `fd` from the registry (if `id` owns it) and disarm it.
    pub(crate) fn unregister(&self, fd: RawFd, id: SocketId) {
        if self.registry.borrow_mut().remove(fd, id) {
            self.readiness.unwatch(fd);
        }
    }

    /// The owner and role registered for `fd`, if any.
    pub fn registration(&self, fd: RawFd) -> Option<(SocketId, Role)> {
        self.registry
            .borrow()
            .lookup(fd)
            .map(|entry| (entry.id, entry.role))
    }

    pub(crate) fn lookup_socket(&self, fd: RawFd) -> Option<(Role, Rc<RefCell<SocketState>>)> {
        let registry = self.registry.borrow();
        let entry = registry.lookup(fd)?;
        entry.socket.upgrade().map(|state| (entry.role, state))
    }

    /// Descriptors registered to `id`, sorted.
    pub fn roles_for(&self, id: SocketId) -> Vec<(RawFd, Role)> {
        self.registry.borrow().roles_for(id)
    }

    pub fn registered_fds(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Run deferred callbacks until none remain.
    pub fn run_callbacks(&self) -> usize {
        self.callbacks.run_pending()
    }
}

/// Single-threaded driver: `PollReadiness` plus a `ProxyContext`.
#[derive(Debug)]
pub struct EventLoop {
    readiness: Rc<PollReadiness>,
    ctx: Rc<ProxyContext>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let readiness = Rc::new(PollReadiness::new());
        let ctx = ProxyContext::new(Rc::clone(&readiness) as Rc<dyn Readiness>);
        Self { readiness, ctx }
    }

    pub fn context(&self) -> &Rc<ProxyContext> {
        &self.ctx
    }

    pub fn readiness(&self) -> &Rc<PollReadiness> {
        &self.readiness
    }

    /// One iteration: run deferred work, wait up to `timeout`, dispatch.
    ///
    /// Events for descriptors no proxy socket owns are returned so the
    /// caller can service its own descriptors from the same poll.
    pub fn turn(&self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Ready)>> {
        self.ctx.run_callbacks();
        let timeout = if self.ctx.callbacks().is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        let events = self.readiness.poll(timeout).map_err(into_io_error)?;
        let mut unclaimed = Vec::new();
        for (fd, ready) in events {
            if !self.ctx.dispatch(fd, ready) {
                unclaimed.push((fd, ready));
            }
        }

        self.ctx.run_callbacks();
        Ok(unclaimed)
    }

    /// Turn the loop until `done` returns true or `timeout` elapses.
    ///
    /// Returns whether `done` was satisfied. Unclaimed events are dropped.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            self.turn(Some(wait))?;
        }
    }
}
