//! The reactor and its polling machinery.
//!
//! This module implements the tick-driven reactor. The reactor is
//! responsible for:
//! - owning connections and the liveness registry that decides which of
//!   them are polled,
//! - polling every live handle once per tick,
//! - dispatching readiness and advancing connect timers,
//! - firing connection callbacks.
//!
//! Registration changes made from inside a tick only take effect on the
//! next one.

mod builder;
mod core;
mod registry;

pub(crate) mod event;
pub(crate) mod poller;

pub use self::builder::ReactorBuilder;
pub use self::core::Reactor;

pub(crate) use self::builder::ConnectionConfig;
