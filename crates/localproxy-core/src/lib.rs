//! localproxy-core: local proxy transport for FrankenTerm
//!
//! Instead of opening a TCP connection, a client can ask this crate for a
//! stream socket whose far end is a local command (an OpenSSH-style
//! `ProxyCommand`) or, for deterministic replay and fuzzing, a pair of files.
//!
//! # Architecture
//!
//! ```text
//! factory::new_connection ──► pipes + child ──► LocalProxySocket
//!                                   │                  ▲
//!                          FdRegistry (fd → socket)    │ write / write_eof / freeze
//!                                   │                  │
//! PollReadiness ──► ProxyContext::dispatch ──► Plug (receive / closing / sent / log)
//!                                   │
//!                            CallbackQueue (deferred error reports)
//! ```
//!
//! # Modules
//!
//! - `socket`: the proxy socket engine and the generic `Socket` trait
//! - `dispatch`: readiness dispatch from descriptor events to sockets
//! - `factory`: spawning the proxy command or opening replay files
//! - `registry`: descriptor → socket lookup owned by a `ProxyContext`
//! - `context`: the per-loop context and the `EventLoop` driver
//! - `readiness`: readiness multiplexer trait and a `poll(2)` implementation
//! - `deferred`: owner-tagged deferred callback queue
//! - `plug`: the stream consumer trait and stderr line assembly
//! - `target`: connection targets and proxy command templates
//! - `config`: configuration (`ProxyConfig`, `ProxyMode`)
//! - `logging`: tracing subscriber setup
//! - `error`: error types
//!
//! Everything here is single-threaded: sockets, the registry and the callback
//! queue share state through `Rc`/`RefCell` and must stay on the thread that
//! drives the event loop. Unix only.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod logging;
pub mod plug;
pub mod readiness;
pub mod registry;
pub mod socket;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ProxyConfig, ProxyMode};
pub use context::{EventLoop, ProxyContext};
pub use error::{Error, Result, SetupError};
pub use factory::new_connection;
pub use logging::{LogConfig, init_logging};
pub use plug::Plug;
pub use readiness::{Interest, PollReadiness, Readiness, Ready};
pub use registry::{Role, SocketId};
pub use socket::{HalfClose, LocalProxySocket, Socket};
pub use target::{Target, format_command};
