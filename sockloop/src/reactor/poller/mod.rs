//! Platform-specific readiness polling.
//!
//! This module provides a unified interface over the operating system's
//! level-triggered readiness call, `poll(2)` on Unix and `WSAPoll` on
//! Windows, together with the socket primitives each platform needs.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::Interest;

#[cfg(unix)]
mod poll;

#[cfg(windows)]
mod wsapoll;

#[cfg(unix)]
pub(crate) type Poller = poll::PollPoller;

#[cfg(windows)]
pub(crate) type Poller = wsapoll::WSAPollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;
