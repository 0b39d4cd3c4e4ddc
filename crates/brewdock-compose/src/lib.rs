//! # brewdock-compose
//!
//! Typed model of a brewdock environment document.
//!
//! Handles:
//! - **Definition**: dependencies, file injections, and config-replacement rules.
//! - **Wait**: readiness strategies decoded from a `strategy` discriminator.
//! - **Tree**: a typed config tree with dotted-path mutation and YAML/JSON codecs.
//! - **Validator**: static checks run before a build starts.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod definition;
pub mod tree;
pub mod validator;
pub mod wait;
