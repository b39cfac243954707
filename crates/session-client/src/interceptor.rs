//! Attaches the stored bearer credential to outbound requests.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{trace, warn};

use crate::store::{CredentialKey, CredentialStore};

/// Reads the current bearer from the credential store and writes the
/// `Authorization` header. Never fails a request: without a usable credential
/// the request simply goes out unauthenticated.
#[derive(Clone)]
pub struct RequestInterceptor {
    store: Arc<dyn CredentialStore>,
    scheme: String,
}

impl RequestInterceptor {
    pub fn new(store: Arc<dyn CredentialStore>, scheme: impl Into<String>) -> Self {
        Self {
            store,
            scheme: scheme.into(),
        }
    }

    /// Current bearer token, if any. Store errors are logged and treated as absent.
    pub async fn current_bearer(&self) -> Option<String> {
        match self.store.get(CredentialKey::AccessToken).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read bearer token, sending unauthenticated");
                None
            }
        }
    }

    /// Write (or strip) the `Authorization` header for `token`.
    pub fn authorize(&self, headers: &mut HeaderMap, token: Option<&str>) {
        headers.remove(AUTHORIZATION);
        let Some(token) = token else {
            trace!("No bearer token available");
            return;
        };

        match HeaderValue::from_str(&format!("{} {}", self.scheme, token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Stored bearer token is not a valid header value, sending unauthenticated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;

    #[tokio::test]
    async fn test_attaches_stored_bearer() {
        let store = Arc::new(MemoryCredentialStore::with_session("t1", "user-1"));
        let interceptor = RequestInterceptor::new(store, "Bearer");

        let token = interceptor.current_bearer().await;
        let mut headers = HeaderMap::new();
        interceptor.authorize(&mut headers, token.as_deref());

        assert_eq!(headers[AUTHORIZATION], "Bearer t1");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn test_missing_credential_proceeds_unauthenticated() {
        let interceptor = RequestInterceptor::new(Arc::new(MemoryCredentialStore::new()), "Bearer");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

        let token = interceptor.current_bearer().await;
        interceptor.authorize(&mut headers, token.as_deref());

        assert!(token.is_none());
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_invalid_token_is_dropped() {
        let interceptor = RequestInterceptor::new(Arc::new(MemoryCredentialStore::new()), "Bearer");
        let mut headers = HeaderMap::new();
        interceptor.authorize(&mut headers, Some("line\nbreak"));
        assert!(headers.get(AUTHORIZATION).is_none());
    }
}
