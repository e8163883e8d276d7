//! Remote method invocation over plain TCP.
//!
//! A [`Skeleton`] listens on a socket and dispatches each incoming call to a
//! target object through the statically written method table of a
//! [`Remote`] interface. A [`Stub`] is the calling side: bound to one address
//! and one interface, it opens a connection per call, sends the call envelope
//! and waits for the reply.

use serde::{Deserialize, Serialize};
use std::{
    io,
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

pub mod codec;
pub mod interface;
pub mod skeleton;
pub mod stub;

pub use interface::{Fault, Method, Remote, Signature};
pub use skeleton::{Hooks, LogHooks, Skeleton};
pub use stub::Stub;

/// Transport-level failures, distinct from whatever the remote target raises.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RpcError {
    #[error("cannot connect to {addr}: {cause}")]
    Connect { addr: SocketAddr, cause: String },
    #[error("cannot listen on {addr}: {cause}")]
    Bind { addr: SocketAddr, cause: String },
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("malformed envelope: {0}")]
    Codec(String),
    #[error("no such method {interface}.{method}({})", .params.join(", "))]
    NoSuchMethod {
        interface: String,
        method: String,
        params: Vec<String>,
    },
    #[error("remote target failed: {0}")]
    Remote(String),
    #[error("{interface} is not a remote interface: {reason}")]
    NotRemote { interface: String, reason: String },
    #[error("endpoint is already running")]
    AlreadyRunning,
    #[error("endpoint has not been assigned an address")]
    Unbound,
    #[error("cannot resolve {0}")]
    Resolve(String),
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        RpcError::Io(err.to_string())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
