//! Host collaborator trait interfaces for wardend
//!
//! This crate defines the seams between the core and everything that touches
//! a managed host or the local OS: remote connections, credential discovery,
//! the Before/After actions, read-only inspection and worker process launch.
//! It contains no platform code itself.

mod mock;
mod status;
mod traits;

pub use mock::*;
pub use status::*;
pub use traits::*;
