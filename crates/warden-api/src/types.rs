//! Session authority value types
//!
//! These mirror what the external session authority reports. Sessions are
//! observed, never constructed locally outside of tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::{Uuid, uuid};
use warden_util::{ProductId, ServerId, SessionId};

/// Product id that always denotes a plain desktop session.
pub const DESKTOP_PRODUCT_ID: ProductId =
    ProductId::from_uuid(uuid!("9fd0eb43-b2bb-4ce3-93b8-9df63f209098"));

/// Session status as reported by the authority.
///
/// Transitions are monotonic: `New`/`Handshake`/`Active` end in exactly one
/// of `Aborted` or `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    New,
    Handshake,
    Active,
    Aborted,
    Finished,
}

impl SessionStatus {
    /// Session is claimed and still in progress
    pub fn is_live(&self) -> bool {
        matches!(self, Self::New | Self::Handshake | Self::Active)
    }

    /// Session reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Finished)
    }
}

/// One session record from the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "uuid")]
    pub id: SessionId,
    pub product_id: ProductId,
    pub client_id: Uuid,
    #[serde(rename = "created_on")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "finished_on", default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub creator_ip: Ipv4Addr,
    #[serde(default)]
    pub abort_comment: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub score_reason: Option<i64>,
    #[serde(default)]
    pub score_text: Option<String>,
    #[serde(default)]
    pub billing_type: Option<String>,
}

impl Session {
    /// Whether the product id alone marks this as a desktop session
    pub fn is_plain_desktop(&self) -> bool {
        self.product_id == DESKTOP_PRODUCT_ID
    }
}

/// Response body of the latest-session query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
}

/// (server id, auth token) discovered on a host
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialPair {
    pub server_id: ServerId,
    pub auth_token: String,
}

impl CredentialPair {
    pub fn new(server_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            server_id: ServerId::new(server_id),
            auth_token: auth_token.into(),
        }
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("server_id", &self.server_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// Product detail from the authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub title: String,
    pub use_default_desktop: bool,
}

/// One item of the full product list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListItem {
    #[serde(rename = "productId")]
    pub product_id: ProductId,
    pub title: String,
}

/// Desktop classification of a product.
///
/// `Unknown` means nothing has been learned yet and is distinct from
/// `Known(false)`. Persisted as `null` / `true` / `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Classification {
    #[default]
    Unknown,
    Known(bool),
}

impl Classification {
    pub fn known(&self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Known(v) => Some(*v),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<bool>> for Classification {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl From<Classification> for Option<bool> {
    fn from(value: Classification) -> Self {
        value.known()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_JSON: &str = r#"{
        "sessions": [{
            "uuid": "11111111-1111-1111-1111-111111111111",
            "product_id": "9fd0eb43-b2bb-4ce3-93b8-9df63f209098",
            "client_id": "33333333-3333-3333-3333-333333333333",
            "created_on": "2025-01-10T12:00:00Z",
            "finished_on": null,
            "status": "HANDSHAKE",
            "creator_ip": "95.173.1.1",
            "score": null
        }]
    }"#;

    #[test]
    fn parses_authority_session() {
        let resp: SessionsResponse = serde_json::from_str(SESSION_JSON).unwrap();
        let session = &resp.sessions[0];

        assert_eq!(session.status, SessionStatus::Handshake);
        assert!(session.is_plain_desktop());
        assert!(session.finished_at.is_none());
        assert_eq!(session.creator_ip, Ipv4Addr::new(95, 173, 1, 1));
    }

    #[test]
    fn status_partitions() {
        for status in [SessionStatus::New, SessionStatus::Handshake, SessionStatus::Active] {
            assert!(status.is_live());
            assert!(!status.is_terminal());
        }
        for status in [SessionStatus::Aborted, SessionStatus::Finished] {
            assert!(!status.is_live());
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn classification_persists_as_nullable_bool() {
        assert_eq!(serde_json::to_string(&Classification::Unknown).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Classification::Known(false)).unwrap(), "false");

        let parsed: Classification = serde_json::from_str("true").unwrap();
        assert_eq!(parsed, Classification::Known(true));
        let parsed: Classification = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Classification::Unknown);
    }

    #[test]
    fn credential_debug_hides_token() {
        let pair = CredentialPair::new("server-1", "secret-token");
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("server-1"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn product_list_item_uses_camel_case_id() {
        let item: ProductListItem = serde_json::from_str(
            r#"{"productId": "aaaa1111-1111-1111-1111-111111111111", "title": "Game A"}"#,
        )
        .unwrap();
        assert_eq!(item.title, "Game A");
    }
}
