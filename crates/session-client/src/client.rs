//! Authenticated client: the single entry point for outbound requests.
//!
//! Every request goes through the same path:
//!
//! 1. the interceptor attaches the stored bearer,
//! 2. the transport sends it,
//! 3. a failed response is classified,
//! 4. a refreshable failure obtains a fresh bearer through the [`RefreshGate`]
//!    (as owner or as waiter),
//! 5. the request is retried once with that bearer.
//!
//! The retry is built from an [`Attempt`] that cannot ask for another refresh, so
//! a token that is rejected straight after being issued surfaces as
//! [`ClientError::AfterRefresh`] instead of looping.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument};

use crate::classify::{Classification, DefaultClassifier, FailedResponse, FailureClassifier};
use crate::config::ClientConfig;
use crate::error::{ClientError, RefreshError, Result};
use crate::gate::{Admission, GateStats, RefreshGate, RefreshOutcome, RefreshOwnership, RefreshState};
use crate::interceptor::RequestInterceptor;
use crate::issuer::{HttpTokenIssuer, TokenIssuer};
use crate::request::{Attempt, AuthRequest};
use crate::store::{CredentialKey, CredentialStore, MemoryCredentialStore};
use crate::teardown::{ClearCredentials, SessionTeardown};

/// A successful (non-4xx/5xx) response.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// 1 for the original dispatch, 2 if it took a refresh and a retry.
    pub attempt: u8,
}

impl AuthResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::invalid_request(format!("response is not valid JSON: {e}")))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the response came from the retry after a credential refresh.
    pub fn was_retried(&self) -> bool {
        self.attempt > 1
    }
}

/// A 4xx/5xx response together with the classifier's verdict.
struct Failure {
    status: StatusCode,
    classification: Classification,
    body: Bytes,
}

impl Failure {
    fn into_error(self) -> ClientError {
        let code = match self.classification {
            Classification::Refreshable { code } => Some(code),
            Classification::Other { code } => code,
        };
        ClientError::Status {
            status: self.status,
            code,
            body: self.body,
        }
    }
}

enum Dispatched {
    Success(AuthResponse),
    Failed(Failure),
}

/// HTTP client that keeps a bearer credential fresh.
///
/// Cheap to clone; clones share the credential store and the refresh gate, so
/// concurrent requests from any clone refresh at most once between them.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    store: Arc<dyn CredentialStore>,
    interceptor: RequestInterceptor,
    classifier: Arc<dyn FailureClassifier>,
    issuer: Arc<dyn TokenIssuer>,
    teardown: Arc<dyn SessionTeardown>,
    gate: Arc<RefreshGate>,
}

impl AuthClient {
    pub fn builder(config: ClientConfig) -> AuthClientBuilder {
        AuthClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.gate.state()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<AuthResponse> {
        self.send(AuthRequest::get(url)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: impl Into<String>,
        body: &T,
    ) -> Result<AuthResponse> {
        self.send(AuthRequest::post(url).with_json(body)?).await
    }

    pub async fn delete(&self, url: impl Into<String>) -> Result<AuthResponse> {
        self.send(AuthRequest::delete(url)).await
    }

    /// Send an authenticated request, refreshing the credential and retrying
    /// once if the server rejects it as expired.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: AuthRequest) -> Result<AuthResponse> {
        let bearer = self.interceptor.current_bearer().await;
        let attempt = Attempt::initial(Arc::new(request), bearer);

        let failure = match self.dispatch(&attempt).await? {
            Dispatched::Success(response) => return Ok(response),
            Dispatched::Failed(failure) => failure,
        };

        if !failure.classification.is_refreshable() || !attempt.may_refresh() {
            return Err(failure.into_error());
        }

        debug!(
            status = %failure.status,
            code = ?failure.classification.code(),
            "Credential rejected, obtaining a fresh one"
        );

        let token = self.fresh_token(attempt.bearer().token()).await?;
        let Some(retry) = attempt.retry(token) else {
            return Err(failure.into_error());
        };

        match self.dispatch(&retry).await {
            Ok(Dispatched::Success(response)) => Ok(response),
            Ok(Dispatched::Failed(failure)) => {
                debug!(status = %failure.status, "Retry with fresh credential failed");
                Err(ClientError::AfterRefresh(Box::new(failure.into_error())))
            }
            Err(e) => Err(ClientError::AfterRefresh(Box::new(e))),
        }
    }

    /// Send one attempt and classify the outcome.
    async fn dispatch(&self, attempt: &Attempt) -> Result<Dispatched> {
        let request = attempt.request();
        let url = self.config.resolve_url(&request.url)?;

        let mut headers = request.headers.clone();
        self.interceptor
            .authorize(&mut headers, attempt.bearer().token());

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if !(status.is_client_error() || status.is_server_error()) {
            return Ok(Dispatched::Success(AuthResponse {
                status,
                headers,
                body,
                attempt: attempt.number(),
            }));
        }

        let classification = self.classifier.classify(&FailedResponse {
            status,
            headers: &headers,
            body: &body,
        });

        Ok(Dispatched::Failed(Failure {
            status,
            classification,
            body,
        }))
    }

    /// Obtain a bearer newer than `used`, refreshing at most once across all
    /// concurrent callers.
    async fn fresh_token(&self, used: Option<&str>) -> Result<String> {
        loop {
            // A refresh may have completed while this request was in flight.
            if let Some(current) = self.interceptor.current_bearer().await
                && used != Some(current.as_str())
            {
                debug!("Bearer already replaced by another request, skipping refresh");
                return Ok(current);
            }

            match self.gate.try_become_owner() {
                Admission::Owner(ownership) => return self.refresh_as_owner(ownership).await,
                Admission::Waiter(waiter) => {
                    match waiter.wait(self.config.waiter_timeout).await? {
                        RefreshOutcome::Refreshed(token) => return Ok(token),
                        RefreshOutcome::Failed(reason) => {
                            return Err(ClientError::SessionInvalid {
                                reason: reason.to_string(),
                            });
                        }
                        RefreshOutcome::Abandoned => {
                            debug!("Refresh owner went away, re-entering gate");
                        }
                    }
                }
            }
        }
    }

    /// Owner side of a refresh cycle.
    ///
    /// Success persists the bearer before any waiter is released. Failure runs
    /// the teardown before any waiter is released, so every caller that sees
    /// `SessionInvalid` sees it after the teardown. Either way the ownership is
    /// consumed and the gate is idle again.
    async fn refresh_as_owner(&self, ownership: RefreshOwnership) -> Result<String> {
        let cycle = ownership.cycle();

        match self.run_refresh().await {
            Ok(token) => {
                let report = ownership.release(RefreshOutcome::Refreshed(token.clone()));
                info!(cycle, waiters = report.released.len(), "Credential refreshed");
                Ok(token)
            }
            Err(e) => {
                let reason = e.to_string();
                error!(cycle, error = %e, "Credential refresh failed, tearing down session");

                self.teardown.on_session_invalid(&reason).await;
                let report = ownership.release(RefreshOutcome::Failed(reason.as_str().into()));
                debug!(cycle, waiters = report.released.len(), "Rejected queued requests");

                Err(ClientError::SessionInvalid { reason })
            }
        }
    }

    async fn run_refresh(&self) -> std::result::Result<String, RefreshError> {
        let refresh_id = self
            .store
            .get(CredentialKey::RefreshId)
            .await?
            .filter(|id| !id.is_empty())
            .ok_or(RefreshError::MissingRefreshId)?;

        let token = self.issuer.issue(&refresh_id).await?;
        self.store.set(CredentialKey::AccessToken, &token).await?;
        Ok(token)
    }
}

/// Assembles an [`AuthClient`] from its collaborators.
///
/// Anything not supplied falls back to: an in-memory store, an HTTP issuer
/// posting to `config.refresh.url`, a teardown that clears the store, and the
/// status-plus-code classifier from `config.classifier`.
pub struct AuthClientBuilder {
    config: ClientConfig,
    http: Option<reqwest::Client>,
    store: Option<Arc<dyn CredentialStore>>,
    issuer: Option<Arc<dyn TokenIssuer>>,
    teardown: Option<Arc<dyn SessionTeardown>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
}

impl AuthClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: None,
            store: None,
            issuer: None,
            teardown: None,
            classifier: None,
        }
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn teardown(mut self, teardown: Arc<dyn SessionTeardown>) -> Self {
        self.teardown = Some(teardown);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Result<AuthClient> {
        let config = self.config;
        let http = match self.http {
            Some(http) => http,
            None => config.build_http_client()?,
        };

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));

        let issuer = match self.issuer {
            Some(issuer) => issuer,
            None => {
                let url = config.resolve_url(&config.refresh.url).map_err(|e| {
                    ClientError::config(format!("refresh endpoint: {e}"))
                })?;
                Arc::new(HttpTokenIssuer::new(http.clone(), url, &config.refresh))
            }
        };

        let teardown = self
            .teardown
            .unwrap_or_else(|| Arc::new(ClearCredentials::new(Arc::clone(&store))));

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(DefaultClassifier::new(config.classifier.clone())));

        let interceptor = RequestInterceptor::new(Arc::clone(&store), config.auth_scheme.clone());

        Ok(AuthClient {
            http,
            config: Arc::new(config),
            store,
            interceptor,
            classifier,
            issuer,
            teardown,
            gate: RefreshGate::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, store: Arc<MemoryCredentialStore>) -> AuthClient {
        let config = ClientConfig::with_base_url(&server.uri()).unwrap();
        AuthClient::builder(config)
            .http_client(reqwest::Client::builder().no_proxy().build().unwrap())
            .store(store)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through_with_stored_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("Authorization", "Bearer t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_session("t1", "user-1"));
        let response = client(&server, store).get("/me").await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert!(!response.was_retried());
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn test_server_error_is_not_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "code": "UNAUTHORIZED" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t2" })))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_session("t1", "user-1"));
        let err = client(&server, store).get("/boom").await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!err.is_after_refresh());
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        // Port 9 (discard) on localhost is closed in test environments.
        let config = ClientConfig::with_base_url("http://127.0.0.1:9").unwrap();
        let client = AuthClient::builder(config)
            .store(Arc::new(MemoryCredentialStore::with_session("t1", "user-1")))
            .build()
            .unwrap();

        let err = client.get("/me").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(client.gate_stats().cycles, 0);
    }
}
