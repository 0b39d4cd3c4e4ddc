//! # brewdock-common
//!
//! Shared types, error definitions, tunables, and constants used across
//! the brewdock workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives every other crate builds on.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
