//! # sockloop
//!
//! **sockloop** is a single-threaded, tick-driven TCP connection reactor.
//!
//! A handful of sockets are multiplexed through one non-blocking readiness
//! poll per tick. Each socket is a [`Connection`] carrying its own
//! connect/accept/read/write state machine and buffered I/O, and reports
//! what happens to it through callbacks.
//!
//! There is no internal thread and no blocking wait: the application owns
//! the loop and calls [`Reactor::tick`] at its own pace.
//!
//! - **Listeners** accept one pending connection per readable event
//! - **Clients** connect without blocking, with a per-connection timeout
//! - **Sends** are queued and written as the socket accepts them, in order
//! - **Disconnects** by the peer or by an I/O error are reported once
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockloop::Reactor;
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), sockloop::Error> {
//!     let mut reactor = Reactor::new()?;
//!     let client = reactor.create();
//!
//!     if let Some(connection) = reactor.connection_mut(client) {
//!         connection.set_connect_callback(|reactor, id| {
//!             let _ = reactor.send(id, b"hello");
//!         });
//!         connection.set_read_callback(|_, _, bytes| {
//!             println!("{}", String::from_utf8_lossy(bytes));
//!         });
//!     }
//!
//!     reactor.connect(client, Ipv4Addr::LOCALHOST, 7000)?;
//!
//!     loop {
//!         reactor.tick()?;
//!         std::thread::sleep(Duration::from_millis(10));
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`]: Connections, ids and address resolution

mod error;
mod reactor;
mod utils;

pub mod net;

pub use error::{ConnectError, Error, PollError, ReadError, WriteError};
pub use net::{Connection, ConnectionId, State};
pub use reactor::{Reactor, ReactorBuilder};
