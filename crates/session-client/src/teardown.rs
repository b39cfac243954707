//! Session teardown hooks, run once per failed refresh cycle.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::store::CredentialStore;

/// Notified when the credential cannot be renewed.
///
/// Called exactly once per failed refresh cycle, by the refresh owner, before
/// any caller sees the session-invalid error. Implementations must not panic;
/// they typically clear stored credentials and send the user back to sign-in.
#[async_trait]
pub trait SessionTeardown: Send + Sync {
    async fn on_session_invalid(&self, reason: &str);
}

/// Teardown that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTeardown;

#[async_trait]
impl SessionTeardown for NoopTeardown {
    async fn on_session_invalid(&self, _reason: &str) {}
}

/// Teardown that erases every stored credential.
pub struct ClearCredentials {
    store: Arc<dyn CredentialStore>,
}

impl ClearCredentials {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionTeardown for ClearCredentials {
    async fn on_session_invalid(&self, reason: &str) {
        info!(%reason, "Session invalid, clearing stored credentials");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear credentials during teardown (non-fatal)");
        }
    }
}

/// Teardown backed by an async closure.
pub struct FnTeardown<F> {
    f: F,
}

/// Build a [`SessionTeardown`] from an async closure.
pub fn teardown_fn<F, Fut>(f: F) -> FnTeardown<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnTeardown { f }
}

#[async_trait]
impl<F, Fut> SessionTeardown for FnTeardown<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_session_invalid(&self, reason: &str) {
        (self.f)(reason.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialKey, MemoryCredentialStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_clear_credentials_empties_store() {
        let store = Arc::new(MemoryCredentialStore::with_session("t1", "user-1"));
        let teardown = ClearCredentials::new(store.clone());

        teardown.on_session_invalid("refresh rejected").await;

        assert!(store.get(CredentialKey::AccessToken).await.unwrap().is_none());
        assert!(store.get(CredentialKey::RefreshId).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_teardown_fn_receives_reason() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let teardown = teardown_fn(move |reason| {
            let seen = seen.clone();
            async move {
                assert_eq!(reason, "boom");
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        teardown.on_session_invalid("boom").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
