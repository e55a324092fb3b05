//! Error types reported by the reactor and its connections.
//!
//! Transient conditions (`EAGAIN`, `EWOULDBLOCK`, `EINTR`) are absorbed by
//! the I/O paths and never surface here. Everything that does surface either
//! comes back from a public operation or ends a connection, in which case it
//! is also kept on the connection as its [`last_error`].
//!
//! [`last_error`]: crate::Connection::last_error

use crate::net::ConnectionId;

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;

/// Errors returned by connection and reactor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A `host[:port]` string could not be turned into an IPv4 endpoint.
    #[error("failed to resolve `{address}`: {source}")]
    Resolution {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create socket: {0}")]
    SocketCreation(#[source] io::Error),

    #[error("failed to set socket option: {0}")]
    SocketOption(#[source] io::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {address}: {cause}")]
    Connect {
        address: SocketAddrV4,
        #[source]
        cause: ConnectError,
    },

    /// A listener hit a descriptor-level accept failure and was closed.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// The operation needs an established connection.
    #[error("connection is not established")]
    NotConnected,

    /// The id does not name a connection owned by this reactor.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Only IPv4 endpoints are supported.
    #[error("{0} is not an IPv4 address")]
    NotIpv4(SocketAddr),

    /// The platform socket library could not be initialised.
    #[error("failed to initialise the socket library: {0}")]
    Library(#[source] io::Error),

    #[error(transparent)]
    Poll(#[from] PollError),
}

/// Why an outgoing connection attempt failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No writable readiness was observed within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused")]
    Refused,

    #[error(transparent)]
    Io(io::Error),
}

impl ConnectError {
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused,
            _ => ConnectError::Io(err),
        }
    }
}

/// A receive failure that ended a connection.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("connection reset by peer")]
    PeerReset,

    #[error("connection refused by peer")]
    PeerRefused,

    #[error("receive failed: {0}")]
    Other(#[source] io::Error),
}

impl ReadError {
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => ReadError::PeerReset,
            io::ErrorKind::ConnectionRefused => ReadError::PeerRefused,
            _ => ReadError::Other(err),
        }
    }
}

/// A send failure that ended a connection.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("broken pipe")]
    BrokenPipe,

    #[error("connection reset by peer")]
    PeerReset,

    #[error("send failed: {0}")]
    Other(#[source] io::Error),
}

impl WriteError {
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe => WriteError::BrokenPipe,
            io::ErrorKind::ConnectionReset => WriteError::PeerReset,
            _ => WriteError::Other(err),
        }
    }
}

/// A failure of the readiness poll itself.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll failed: {0}")]
    Os(#[from] io::Error),

    /// `tick` was called from inside a callback of the same reactor.
    #[error("tick called re-entrantly from a callback")]
    Reentrant,
}
