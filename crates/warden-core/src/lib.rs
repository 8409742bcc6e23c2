//! Session state machine, host workers and supervisors for wardend
//!
//! This crate is the heart of wardend, containing:
//! - Per-host credential and classification caching
//! - Session polling (new session -> active -> ended)
//! - The host worker cycle that fires the Before/After actions
//! - The in-process fleet supervisor and the per-process supervisor
//! - Bounded-concurrency host diagnostics

mod credentials;
mod error;
mod fleet;
mod probe;
mod session;
mod supervisor;
mod worker;

pub use credentials::*;
pub use error::*;
pub use fleet::*;
pub use probe::*;
pub use session::*;
pub use supervisor::*;
pub use worker::*;
