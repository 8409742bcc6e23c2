//! Pooled HTTP client for the session authority

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use warden_api::{CredentialPair, ProductInfo, ProductListItem, Session, SessionsResponse};
use warden_util::ProductId;

use crate::{AuthorityError, AuthorityResult, SessionAuthority};

const AUTH_HEADER: &str = "X-Auth-Token";

/// Configuration for [`HttpAuthority`]
#[derive(Debug, Clone)]
pub struct AuthorityClientConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Full product list endpoint
    pub product_list_url: Option<String>,
    /// Total timeout of one request
    pub timeout: Duration,
}

/// Session authority reached over HTTP.
///
/// One instance is shared by every worker so connections are pooled.
pub struct HttpAuthority {
    config: AuthorityClientConfig,
    client: Mutex<Option<Client>>,
}

impl HttpAuthority {
    pub fn new(config: AuthorityClientConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn sessions_url(&self) -> String {
        format!("{}/session-manager/sessions", self.config.base_url)
    }

    pub fn product_url(&self, product_id: &ProductId) -> String {
        format!(
            "{}/server-manager/product/get/{}",
            self.config.base_url, product_id
        )
    }

    /// Pooled client, built on first use or after [`SessionAuthority::close`]
    fn client(&self) -> AuthorityResult<Client> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout)
            .build()
            .map_err(|e| AuthorityError::Client(e.to_string()))?;
        debug!(timeout = ?self.config.timeout, "Authority HTTP client created");
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn sessions_request(&self, creds: &CredentialPair) -> AuthorityResult<(StatusCode, Vec<u8>)> {
        let response = self
            .client()?
            .get(self.sessions_url())
            .form(&[("serveri_id", creds.server_id.as_str())])
            .header(AUTH_HEADER, &creds.auth_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

#[async_trait]
impl SessionAuthority for HttpAuthority {
    async fn latest_session(&self, creds: &CredentialPair) -> AuthorityResult<Option<Session>> {
        let (status, body) = self.sessions_request(creds).await?;
        Ok(interpret_sessions(creds, status, &body))
    }

    async fn product_info(
        &self,
        product_id: &ProductId,
        auth_token: &str,
    ) -> AuthorityResult<ProductInfo> {
        let url = self.product_url(product_id);
        let response = self
            .client()?
            .get(&url)
            .header(AUTH_HEADER, auth_token)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(AuthorityError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AuthorityError::Malformed(e.to_string()))
    }

    async fn product_list(&self) -> AuthorityResult<Option<Vec<ProductListItem>>> {
        let Some(url) = self.config.product_list_url.clone() else {
            return Ok(None);
        };

        let response = self.client()?.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(AuthorityError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        let items: Vec<ProductListItem> =
            serde_json::from_slice(&body).map_err(|e| AuthorityError::Malformed(e.to_string()))?;
        debug!(count = items.len(), "Product list fetched");
        Ok(Some(items))
    }

    async fn check_credentials(&self, creds: &CredentialPair) -> AuthorityResult<bool> {
        let (status, _) = self.sessions_request(creds).await?;
        Ok(status == StatusCode::OK)
    }

    async fn close(&self) {
        let dropped = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if dropped.is_some() {
            debug!("Authority HTTP client closed");
        }
    }
}

/// Turn a sessions response into the latest session, if any
fn interpret_sessions(creds: &CredentialPair, status: StatusCode, body: &[u8]) -> Option<Session> {
    if status == StatusCode::UNAUTHORIZED {
        debug!(server_id = %creds.server_id.short(), "Token rejected by authority");
        return None;
    }
    if status != StatusCode::OK {
        warn!(server_id = %creds.server_id.short(), status = status.as_u16(), "Unexpected authority status");
        return None;
    }

    match serde_json::from_slice::<SessionsResponse>(body) {
        Ok(response) => response.sessions.into_iter().next(),
        Err(e) => {
            warn!(server_id = %creds.server_id.short(), error = %e, "Malformed sessions response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_api::SessionStatus;

    fn creds() -> CredentialPair {
        CredentialPair::new("d6a1e4c2-0000-0000-0000-000000000000", "token")
    }

    const BODY: &str = r#"{
        "sessions": [
            {
                "uuid": "11111111-1111-1111-1111-111111111111",
                "product_id": "22222222-2222-2222-2222-222222222222",
                "client_id": "33333333-3333-3333-3333-333333333333",
                "created_on": "2025-01-10T12:00:00Z",
                "status": "ACTIVE",
                "creator_ip": "10.1.1.1"
            },
            {
                "uuid": "44444444-4444-4444-4444-444444444444",
                "product_id": "22222222-2222-2222-2222-222222222222",
                "client_id": "33333333-3333-3333-3333-333333333333",
                "created_on": "2025-01-09T12:00:00Z",
                "finished_on": "2025-01-09T13:00:00Z",
                "status": "FINISHED",
                "creator_ip": "10.1.1.1"
            }
        ]
    }"#;

    #[test]
    fn first_session_is_latest() {
        let session = interpret_sessions(&creds(), StatusCode::OK, BODY.as_bytes()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn empty_list_is_no_session() {
        let body = br#"{"sessions": []}"#;
        assert!(interpret_sessions(&creds(), StatusCode::OK, body).is_none());
    }

    #[test]
    fn non_success_is_no_session() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::INTERNAL_SERVER_ERROR] {
            assert!(interpret_sessions(&creds(), status, BODY.as_bytes()).is_none());
        }
    }

    #[test]
    fn malformed_body_is_no_session() {
        assert!(interpret_sessions(&creds(), StatusCode::OK, b"<html>").is_none());
    }

    #[test]
    fn urls() {
        let authority = HttpAuthority::new(AuthorityClientConfig {
            base_url: "https://authority.example".into(),
            product_list_url: None,
            timeout: Duration::from_secs(15),
        });
        let product = ProductId::parse("22222222-2222-2222-2222-222222222222").unwrap();

        assert_eq!(
            authority.sessions_url(),
            "https://authority.example/session-manager/sessions"
        );
        assert_eq!(
            authority.product_url(&product),
            "https://authority.example/server-manager/product/get/22222222-2222-2222-2222-222222222222"
        );
    }

    #[tokio::test]
    async fn no_list_url_means_no_list() {
        let authority = HttpAuthority::new(AuthorityClientConfig {
            base_url: "https://authority.example".into(),
            product_list_url: None,
            timeout: Duration::from_secs(15),
        });

        assert!(authority.product_list().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_then_reuse_rebuilds_client() {
        let authority = HttpAuthority::new(AuthorityClientConfig {
            base_url: "https://authority.example".into(),
            product_list_url: None,
            timeout: Duration::from_secs(1),
        });

        authority.client().unwrap();
        authority.close().await;
        authority.close().await;
        assert!(authority.client.lock().unwrap().is_none());
        authority.client().unwrap();
        assert!(authority.client.lock().unwrap().is_some());
    }
}
