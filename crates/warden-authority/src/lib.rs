//! Session authority access for wardend
//!
//! The authority is the only source of truth for whether a host is claimed.
//! This crate defines the [`SessionAuthority`] seam, the pooled HTTP client
//! used in production and a scripted mock for tests.

mod client;
mod mock;

pub use client::*;
pub use mock::*;

use async_trait::async_trait;
use thiserror::Error;
use warden_api::{CredentialPair, ProductInfo, ProductListItem, Session};
use warden_util::ProductId;

/// Errors from authority requests
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Authority returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for AuthorityError {
    fn from(e: reqwest::Error) -> Self {
        AuthorityError::Transport(e.to_string())
    }
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Read-only view of the external session authority
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Latest session registered for a server.
    ///
    /// Rejected credentials, other non-200 answers and malformed bodies all
    /// mean "no session" and return `Ok(None)`. Only transport failures are
    /// errors.
    async fn latest_session(&self, creds: &CredentialPair) -> AuthorityResult<Option<Session>>;

    /// Product detail, including whether it uses the default desktop profile
    async fn product_info(&self, product_id: &ProductId, auth_token: &str)
    -> AuthorityResult<ProductInfo>;

    /// Full product list, or `None` when no list endpoint is configured
    async fn product_list(&self) -> AuthorityResult<Option<Vec<ProductListItem>>>;

    /// Whether the authority accepts a credential pair
    async fn check_credentials(&self, creds: &CredentialPair) -> AuthorityResult<bool>;

    /// Release pooled connections. Later calls reconnect lazily.
    async fn close(&self) {}
}
