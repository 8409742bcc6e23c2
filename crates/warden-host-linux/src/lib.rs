//! Linux host adapters for wardend
//!
//! Implements the host collaborator traits using:
//! - The system `ssh` client (optionally via `sshpass`) for remote hosts
//! - `reg query` output for credential discovery
//! - Configured command lists for the Before/After actions and diagnostics
//! - Process groups and signals for local worker processes

mod commands;
mod launcher;
mod process;
mod registry;
mod ssh;

pub use commands::*;
pub use launcher::*;
pub use process::*;
pub use registry::*;
pub use ssh::*;
