//! Gym membership check-ins
//!
//! Checking in consumes one credit of the user's membership and bills the visit, plus any
//! items bought at the desk, on the user's invoice. All of it happens in a single transaction.
//!
//! The crate follows a ports and adapters layout:
//!
//! - [`domain`] - records and their invariants
//! - [`ports`] - traits the commands depend on
//! - [`adapters`] - in-memory and PostgreSQL implementations of the ports
//! - [`commands`] - the check-in command, exposed as a [`tower::Service`]
//! - [`http`] - the HTTP boundary

pub mod adapters;
pub mod commands;
pub mod config;
pub mod domain;
pub mod http;
pub mod logging;
pub mod ports;
