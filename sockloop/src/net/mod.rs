//! TCP connections and the pieces they are built from.
//!
//! A [`Connection`] wraps one IPv4 stream socket and its state machine.
//! Connections are owned and driven by a [`Reactor`](crate::Reactor) and
//! addressed through their [`ConnectionId`].

mod address;
mod buffer;

pub(crate) mod connection;
pub(crate) mod socket;

pub use address::{ANY_ADDRESS, ANY_PORT, resolve};
pub use connection::{AcceptCallback, Callback, Connection, ConnectionId, ReadCallback, State};
