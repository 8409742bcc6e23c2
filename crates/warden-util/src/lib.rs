//! Shared utilities for warden
//!
//! This crate provides:
//! - ID types (HostName, ServerId, ProductId, SessionId)
//! - Time utilities (wall-clock helper)
//! - A small TTL map used by per-host caches
//! - Atomic file replacement for persisted state
//! - Default paths for config and data directories

mod fs;
mod ids;
mod paths;
mod time;
mod ttl;

pub use fs::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
pub use ttl::*;
