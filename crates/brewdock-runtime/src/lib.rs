//! Stack lifecycle for brewdock.
//!
//! - [`runtime`]: the container-runtime collaborator trait and its wire types.
//! - [`docker`] / [`memory`]: Docker-backed and in-memory runtimes.
//! - [`resolver`]: rewrites config files with literal and derived values.
//! - [`builder`]: turns a definition into a running [`stack::Stack`].
//! - [`stack`]: the live handle, lookup, snapshot, and teardown.
//! - [`supervisor`]: reload / print / quit state machine over a stack.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod docker;
pub mod extract;
pub mod memory;
pub mod removal;
pub mod resolver;
pub mod runtime;
pub mod stack;
pub mod supervisor;
mod wait;
