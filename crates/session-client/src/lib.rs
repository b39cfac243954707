//! Authenticated HTTP client with single-flight bearer credential refresh.
//!
//! Requests go out with the bearer held in a [`CredentialStore`]. When the server
//! rejects that bearer as expired, exactly one request (the refresh owner)
//! exchanges the stored refresh identifier for a new bearer; every other request
//! that failed meanwhile waits on the [`RefreshGate`] and is then retried once
//! with the new bearer. If the refresh itself fails, the [`SessionTeardown`] hook
//! runs once and every affected request fails with
//! [`ClientError::SessionInvalid`].
//!
//! # Architecture
//!
//! - [`RequestInterceptor`]: attaches the stored bearer to each request
//! - [`FailureClassifier`]: decides whether a failure is worth a refresh
//! - [`RefreshGate`]: single-flight state machine plus FIFO waiter queue
//! - [`TokenIssuer`]: talks to the token-issuing endpoint
//! - [`AuthClient`]: the entry point; owns the retry dispatch
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_client::{AuthClient, ClientConfig, MemoryCredentialStore};
//!
//! # async fn run() -> session_client::Result<()> {
//! let config = ClientConfig::with_base_url("https://api.example.com/")?
//!     .refresh_url("/auth/refresh");
//! let store = Arc::new(MemoryCredentialStore::with_session("access", "user-42"));
//! let client = AuthClient::builder(config).store(store).build()?;
//!
//! let me = client.get("/users/me").await?;
//! println!("{}", me.text());
//! # Ok(())
//! # }
//! ```

mod classify;
mod client;
mod config;
mod error;
mod gate;
mod interceptor;
mod issuer;
mod request;
mod store;
mod teardown;

pub use classify::{Classification, DefaultClassifier, FailedResponse, FailureClassifier};
pub use client::{AuthClient, AuthClientBuilder, AuthResponse};
pub use config::{
    ClassifierConfig, ClientConfig, DEFAULT_AUTH_SCHEME, DEFAULT_USER_AGENT, RefreshEndpointConfig,
};
pub use error::{ClientError, RefreshError, Result, StoreError};
pub use gate::{
    Admission, GateStats, RefreshGate, RefreshOutcome, RefreshOwnership, RefreshState,
    ReleaseReport, Waiter, WaiterId,
};
pub use interceptor::RequestInterceptor;
pub use issuer::{HttpTokenIssuer, TokenIssuer};
pub use request::{Attempt, AuthRequest, BearerSource};
pub use store::{CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use reqwest::{Method, StatusCode};
pub use teardown::{ClearCredentials, FnTeardown, NoopTeardown, SessionTeardown, teardown_fn};
