//! Mock session authority for testing

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;
use warden_api::{CredentialPair, ProductInfo, ProductListItem, Session, SessionStatus};
use warden_util::{ProductId, ServerId, SessionId};

use crate::{AuthorityError, AuthorityResult, SessionAuthority};

/// Build a session record the way the authority would report it
pub fn mock_session(product_id: ProductId, status: SessionStatus) -> Session {
    Session {
        id: SessionId::new(),
        product_id,
        client_id: Uuid::new_v4(),
        created_at: warden_util::now(),
        finished_at: status.is_terminal().then(warden_util::now),
        status,
        creator_ip: Ipv4Addr::new(10, 0, 0, 1),
        abort_comment: None,
        score: None,
        score_reason: None,
        score_text: None,
        billing_type: None,
    }
}

/// Scripted authority.
///
/// Each server id has a queue of answers; the last answer repeats once the
/// queue is down to one entry. Every call is counted.
#[derive(Default)]
pub struct MockAuthority {
    sessions: Mutex<HashMap<ServerId, VecDeque<Option<Session>>>>,
    products: Mutex<HashMap<ProductId, ProductInfo>>,
    product_list: Mutex<Option<Vec<ProductListItem>>>,

    /// Configure every session query to fail at the transport level
    pub fail_sessions: Arc<Mutex<bool>>,

    pub session_calls: AtomicUsize,
    pub product_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for a server id, in order
    pub fn script(&self, server_id: &str, answers: impl IntoIterator<Item = Option<Session>>) {
        lock(&self.sessions)
            .entry(ServerId::new(server_id))
            .or_default()
            .extend(answers);
    }

    /// Register product detail
    pub fn add_product(&self, product_id: ProductId, title: &str, use_default_desktop: bool) {
        lock(&self.products).insert(
            product_id,
            ProductInfo {
                product_id,
                title: title.to_string(),
                use_default_desktop,
            },
        );
    }

    pub fn set_product_list(&self, items: Option<Vec<ProductListItem>>) {
        *lock(&self.product_list) = items;
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn product_calls(&self) -> usize {
        self.product_calls.load(Ordering::SeqCst)
    }

    fn next_answer(&self, server_id: &ServerId) -> Option<Session> {
        let mut sessions = lock(&self.sessions);
        let queue = sessions.get_mut(server_id)?;
        if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().cloned().flatten()
        }
    }
}

#[async_trait]
impl SessionAuthority for MockAuthority {
    async fn latest_session(&self, creds: &CredentialPair) -> AuthorityResult<Option<Session>> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail_sessions) {
            return Err(AuthorityError::Transport("Mock transport failure".into()));
        }
        Ok(self.next_answer(&creds.server_id))
    }

    async fn product_info(
        &self,
        product_id: &ProductId,
        _auth_token: &str,
    ) -> AuthorityResult<ProductInfo> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.products)
            .get(product_id)
            .cloned()
            .ok_or_else(|| AuthorityError::Status {
                status: 404,
                url: format!("mock://product/{}", product_id),
            })
    }

    async fn product_list(&self) -> AuthorityResult<Option<Vec<ProductListItem>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.product_list).clone())
    }

    async fn check_credentials(&self, creds: &CredentialPair) -> AuthorityResult<bool> {
        Ok(lock(&self.sessions).contains_key(&creds.server_id))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_api::DESKTOP_PRODUCT_ID;

    #[tokio::test]
    async fn scripted_answers_then_repeat_last() {
        let authority = MockAuthority::new();
        let creds = CredentialPair::new("server-1", "token");
        authority.script(
            "server-1",
            [
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Active)),
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Finished)),
            ],
        );

        let first = authority.latest_session(&creds).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Active);
        for _ in 0..2 {
            let next = authority.latest_session(&creds).await.unwrap().unwrap();
            assert_eq!(next.status, SessionStatus::Finished);
        }
        assert_eq!(authority.session_calls(), 3);
    }

    #[tokio::test]
    async fn unknown_server_has_no_session() {
        let authority = MockAuthority::new();
        let creds = CredentialPair::new("nobody", "token");
        assert!(authority.latest_session(&creds).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_product_is_an_error() {
        let authority = MockAuthority::new();
        let result = authority.product_info(&DESKTOP_PRODUCT_ID, "token").await;
        assert!(matches!(result, Err(AuthorityError::Status { status: 404, .. })));
        assert_eq!(authority.product_calls(), 1);
    }
}
