//! Deferred callback queue.
//!
//! Work that must not run inside the stack frame that discovered it (an I/O
//! error found while a socket is mid-write, say) is queued here and run by
//! the event loop once the current turn is over. Each callback is tagged with
//! the socket it belongs to so that closing a socket can drop everything it
//! still has queued.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use crate::registry::SocketId;

pub type Callback = Box<dyn FnOnce()>;

/// Single-threaded FIFO of owner-tagged callbacks.
#[derive(Default)]
pub struct CallbackQueue {
    pending: RefCell<VecDeque<(SocketId, Callback)>>,
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, owner: SocketId, callback: impl FnOnce() + 'static) {
        self.pending
            .borrow_mut()
            .push_back((owner, Box::new(callback)));
    }

    /// Drop every queued callback belonging to `owner`.
    pub fn cancel_owner(&self, owner: SocketId) -> usize {
        let mut pending = self.pending.borrow_mut();
        let before = pending.len();
        pending.retain(|(id, _)| *id != owner);
        before - pending.len()
    }

    /// Run callbacks in FIFO order until the queue is empty.
    ///
    /// Callbacks may queue or cancel further callbacks; no internal borrow is
    /// held while one runs.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some((_, callback)) = next else {
                break;
            };
            callback();
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}
