//! Shared value types for warden
//!
//! This crate defines the data every other crate speaks:
//! - Session authority records (sessions, products, statuses)
//! - Credential pairs discovered on hosts
//! - Desktop classification
//! - Host identity, worker phase and supervisor status

mod host;
mod types;

pub use host::*;
pub use types::*;
