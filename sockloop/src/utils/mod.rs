//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the reactor.
//! In particular, it exposes a generational [`Slab`] used as the connection
//! arena, with reuse of freed slots.

mod slab;

pub(crate) use slab::{Key, Slab};
