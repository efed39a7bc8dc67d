//! The proxy socket engine.
//!
//! A `LocalProxySocket` looks like any other stream socket to its plug but
//! is backed by up to three descriptors: `to_child` (the proxy command's
//! stdin), `from_child` (its stdout) and `err_child` (its stderr). Writes are
//! queued and pushed out whenever `to_child` will take them; write
//! readiness is only armed while something is queued.
//!
//! # Half-close
//!
//! ```text
//! Open ──write_eof──► EofRequested ──outbound drained──► EofSent (to_child closed)
//! ```
//!
//! # Errors
//!
//! A failed write is never reported from inside the call that hit it: the
//! error is recorded once and a deferred callback delivers it to the plug
//! after the current event-loop turn, so a plug that reacts by closing the
//! socket cannot pull the state out from under the code that found the error.

use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::process::Child;
use std::rc::{Rc, Weak};

use filedescriptor::FileDescriptor;
use tracing::{debug, info, trace, warn};

use crate::context::ProxyContext;
use crate::error::{Error, Result, SetupError, duplicate_io_error};
use crate::plug::{Plug, StderrLines};
use crate::readiness::Interest;
use crate::registry::{Role, SocketId};

/// Write-side half-close state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfClose {
    Open,
    /// `write_eof` was called; `to_child` closes once the queue drains
    EofRequested,
    /// `to_child` has been closed
    EofSent,
}

impl HalfClose {
    fn request_eof(self) -> Result<Self> {
        match self {
            Self::Open => Ok(Self::EofRequested),
            Self::EofRequested | Self::EofSent => Err(Error::EofAlreadyRequested),
        }
    }

    fn check_writable(self) -> Result<()> {
        match self {
            Self::Open => Ok(()),
            Self::EofRequested | Self::EofSent => Err(Error::WriteAfterEof),
        }
    }
}

/// Generic stream-socket contract.
///
/// Methods take `&self` so a plug holding the socket can call them from
/// inside its own notifications.
pub trait Socket {
    /// Replace the plug, returning the previous one.
    fn set_plug(&self, plug: Weak<dyn Plug>) -> Weak<dyn Plug>;

    /// Queue `data` and try to send it; returns the bytes still buffered.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Urgent data has no out-of-band channel on a pipe; it is sent in-band.
    fn write_oob(&self, data: &[u8]) -> Result<usize> {
        self.write(data)
    }

    /// Close the write direction once everything queued has been sent.
    fn write_eof(&self) -> Result<()>;

    /// Every write already tries to send immediately.
    fn flush(&self) {}

    /// Suspend or resume delivery of inbound data.
    fn set_frozen(&self, frozen: bool);

    /// Tear the socket down. Safe to call more than once.
    fn close(&self);

    /// The construction error, if the socket could not be set up.
    fn socket_error(&self) -> Option<String>;
}

/// Descriptors (and the child, in command mode) produced by the factory.
pub(crate) struct Endpoints {
    pub(crate) to_child: FileDescriptor,
    pub(crate) from_child: FileDescriptor,
    pub(crate) err_child: Option<FileDescriptor>,
    pub(crate) child: Option<Child>,
}

pub(crate) struct SocketState {
    pub(crate) id: SocketId,
    to_child: Option<FileDescriptor>,
    pub(crate) from_child: Option<FileDescriptor>,
    pub(crate) err_child: Option<FileDescriptor>,
    outbound: VecDeque<u8>,
    pub(crate) stderr_lines: StderrLines,
    half_close: HalfClose,
    pending_error: Option<io::Error>,
    setup_error: Option<SetupError>,
    pub(crate) plug: Weak<dyn Plug>,
    child: Option<Child>,
    pub(crate) frozen: bool,
    closed: bool,
    pub(crate) read_chunk: usize,
    this: Weak<RefCell<SocketState>>,
}

impl SocketState {
    pub(crate) fn buffered(&self) -> usize {
        self.outbound.len()
    }

    /// Push queued data into `to_child`; returns the bytes written.
    pub(crate) fn try_send(&mut self, ctx: &ProxyContext) -> usize {
        let mut sent = 0;
        let mut error = None;

        if let Some(to_child) = self.to_child.as_mut() {
            while !self.outbound.is_empty() {
                let (chunk, _) = self.outbound.as_slices();
                match to_child.write(chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.outbound.drain(..n);
                        sent += n;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        error = Some(err);
                        break;
                    }
                }
            }
        }

        let failed = error.is_some();
        if let Some(err) = error {
            self.record_error(ctx, err);
        }

        if self.half_close == HalfClose::EofRequested && self.outbound.is_empty() && !failed {
            self.release(Role::DataOut, ctx);
            self.half_close = HalfClose::EofSent;
            debug!(socket = %self.id, "write side closed");
        }

        if let Some(fd) = self.to_child.as_ref().map(AsRawFd::as_raw_fd) {
            if self.outbound.is_empty() || failed {
                ctx.readiness().unwatch(fd);
            } else {
                ctx.readiness().watch(fd, Interest::Write);
            }
        }

        trace!(socket = %self.id, sent, buffered = self.outbound.len(), "try_send");
        sent
    }

    /// Remember the first runtime error and schedule its delivery.
    pub(crate) fn record_error(&mut self, ctx: &ProxyContext, err: io::Error) {
        if self.pending_error.is_some() {
            debug!(socket = %self.id, error = %err, "further error while one is pending");
            return;
        }
        warn!(socket = %self.id, error = %err, "proxy socket I/O error");
        self.pending_error = Some(err);
        let this = Weak::clone(&self.this);
        ctx.callbacks()
            .queue(self.id, move || deliver_pending_error(&this));
    }

    /// Unregister and close the descriptor playing `role`, if present.
    pub(crate) fn release(&mut self, role: Role, ctx: &ProxyContext) {
        let slot = match role {
            Role::DataOut => &mut self.to_child,
            Role::DataIn => &mut self.from_child,
            Role::Stderr => &mut self.err_child,
        };
        if let Some(fd) = slot.take() {
            let raw = fd.as_raw_fd();
            ctx.unregister(raw, self.id);
            debug!(socket = %self.id, fd = raw, role = %role, "descriptor closed");
        }
    }

    /// The live descriptor for `role`, if it is `fd`.
    pub(crate) fn descriptor_for(&mut self, role: Role, fd: RawFd) -> Option<&mut FileDescriptor> {
        let slot = match role {
            Role::DataOut => &mut self.to_child,
            Role::DataIn => &mut self.from_child,
            Role::Stderr => &mut self.err_child,
        };
        slot.as_mut().filter(|desc| desc.as_raw_fd() == fd)
    }
}

fn deliver_pending_error(this: &Weak<RefCell<SocketState>>) {
    let Some(state) = this.upgrade() else {
        return;
    };
    let (plug, err) = {
        let state = state.borrow();
        let Some(err) = state.pending_error.as_ref() else {
            return;
        };
        (state.plug.upgrade(), duplicate_io_error(err))
    };
    if let Some(plug) = plug {
        plug.closing(Some(&err));
    }
}

fn reap_child(id: SocketId, mut child: Child) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => debug!(socket = %id, pid, %status, "proxy command exited"),
        Ok(None) => {
            if let Err(err) = child.kill() {
                debug!(socket = %id, pid, error = %err, "kill of proxy command failed");
            }
            match child.wait() {
                Ok(status) => debug!(socket = %id, pid, %status, "proxy command terminated"),
                Err(err) => warn!(socket = %id, pid, error = %err, "failed to reap proxy command"),
            }
        }
        Err(err) => warn!(socket = %id, pid, error = %err, "failed to poll proxy command"),
    }
}

/// A stream socket whose far end is a local proxy command or replay file.
///
/// Dropping the socket closes it.
pub struct LocalProxySocket {
    state: Rc<RefCell<SocketState>>,
    ctx: Rc<ProxyContext>,
}

impl std::fmt::Debug for LocalProxySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LocalProxySocket")
            .field("id", &state.id)
            .field("half_close", &state.half_close)
            .field("buffered", &state.outbound.len())
            .field("frozen", &state.frozen)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl LocalProxySocket {
    pub(crate) fn new(ctx: &Rc<ProxyContext>, plug: Weak<dyn Plug>, read_chunk: usize) -> Self {
        let id = ctx.allocate_id();
        let state = Rc::new_cyclic(|this| {
            RefCell::new(SocketState {
                id,
                to_child: None,
                from_child: None,
                err_child: None,
                outbound: VecDeque::new(),
                stderr_lines: StderrLines::new(),
                half_close: HalfClose::Open,
                pending_error: None,
                setup_error: None,
                plug,
                child: None,
                frozen: false,
                closed: false,
                read_chunk: read_chunk.max(1),
                this: Weak::clone(this),
            })
        });
        Self {
            state,
            ctx: Rc::clone(ctx),
        }
    }

    pub(crate) fn fail_setup(&self, err: SetupError) {
        let mut state = self.state.borrow_mut();
        warn!(socket = %state.id, error = %err, "local proxy setup failed");
        state.setup_error = Some(err);
    }

    /// Take ownership of the endpoints and start watching the read sides.
    pub(crate) fn attach(&self, endpoints: Endpoints) {
        let Endpoints {
            to_child,
            from_child,
            err_child,
            child,
        } = endpoints;
        let weak = Rc::downgrade(&self.state);
        let mut state = self.state.borrow_mut();
        let id = state.id;

        self.ctx
            .register(to_child.as_raw_fd(), id, Role::DataOut, &weak, None);
        self.ctx.register(
            from_child.as_raw_fd(),
            id,
            Role::DataIn,
            &weak,
            Some(Interest::Read),
        );
        if let Some(err_child) = &err_child {
            self.ctx.register(
                err_child.as_raw_fd(),
                id,
                Role::Stderr,
                &weak,
                Some(Interest::Read),
            );
        }

        debug!(
            socket = %id,
            to_child = to_child.as_raw_fd(),
            from_child = from_child.as_raw_fd(),
            err_child = ?err_child.as_ref().map(AsRawFd::as_raw_fd),
            pid = ?child.as_ref().map(Child::id),
            "proxy socket attached"
        );

        state.to_child = Some(to_child);
        state.from_child = Some(from_child);
        state.err_child = err_child;
        state.child = child;
    }

    pub fn id(&self) -> SocketId {
        self.state.borrow().id
    }

    /// Bytes queued for the proxy command and not yet written.
    pub fn buffered(&self) -> usize {
        self.state.borrow().buffered()
    }

    pub fn half_close(&self) -> HalfClose {
        self.state.borrow().half_close
    }

    pub fn is_frozen(&self) -> bool {
        self.state.borrow().frozen
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Process id of the proxy command, in command mode.
    pub fn child_id(&self) -> Option<u32> {
        self.state.borrow().child.as_ref().map(Child::id)
    }

    /// The construction error, if setup failed.
    pub fn setup_error(&self) -> Option<Ref<'_, SetupError>> {
        Ref::filter_map(self.state.borrow(), |state| state.setup_error.as_ref()).ok()
    }

    /// The descriptor currently playing `role`, if any.
    pub fn descriptor(&self, role: Role) -> Option<RawFd> {
        let state = self.state.borrow();
        match role {
            Role::DataOut => state.to_child.as_ref(),
            Role::DataIn => state.from_child.as_ref(),
            Role::Stderr => state.err_child.as_ref(),
        }
        .map(AsRawFd::as_raw_fd)
    }

    fn check_open(state: &SocketState) -> Result<()> {
        if state.closed {
            warn!(socket = %state.id, "operation on closed proxy socket");
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Socket for LocalProxySocket {
    fn set_plug(&self, plug: Weak<dyn Plug>) -> Weak<dyn Plug> {
        std::mem::replace(&mut self.state.borrow_mut().plug, plug)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        Self::check_open(&state)?;
        if let Err(err) = state.half_close.check_writable() {
            warn!(socket = %state.id, len = data.len(), "write after end-of-file requested");
            return Err(err);
        }
        state.outbound.extend(data);
        state.try_send(&self.ctx);
        Ok(state.buffered())
    }

    fn write_eof(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        Self::check_open(&state)?;
        state.half_close = match state.half_close.request_eof() {
            Ok(next) => next,
            Err(err) => {
                warn!(socket = %state.id, "end-of-file requested twice");
                return Err(err);
            }
        };
        state.try_send(&self.ctx);
        Ok(())
    }

    fn set_frozen(&self, frozen: bool) {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return;
        }
        state.frozen = frozen;
        let Some(fd) = state.from_child.as_ref().map(AsRawFd::as_raw_fd) else {
            return;
        };
        if frozen {
            self.ctx.readiness().unwatch(fd);
        } else {
            self.ctx.readiness().watch(fd, Interest::Read);
        }
        trace!(socket = %state.id, frozen, "read side freeze changed");
    }

    fn close(&self) {
        let (id, child) = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            for role in [Role::DataOut, Role::DataIn, Role::Stderr] {
                state.release(role, &self.ctx);
            }
            state.outbound.clear();
            state.stderr_lines.clear();
            (state.id, state.child.take())
        };

        let cancelled = self.ctx.callbacks().cancel_owner(id);
        if let Some(child) = child {
            reap_child(id, child);
        }
        info!(socket = %id, cancelled, "proxy socket closed");
    }

    fn socket_error(&self) -> Option<String> {
        self.state
            .borrow()
            .setup_error
            .as_ref()
            .map(ToString::to_string)
    }
}

impl Drop for LocalProxySocket {
    fn drop(&mut self) {
        self.close();
    }
}
