//! Token-issuing endpoint.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::config::RefreshEndpointConfig;
use crate::error::RefreshError;

/// Exchanges a refresh identifier for a new bearer token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Request a new bearer. Any error fails the refresh cycle.
    async fn issue(&self, refresh_id: &str) -> Result<String, RefreshError>;
}

/// Issuer that POSTs `{ "<request_field>": refresh_id }` as JSON.
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    client: Client,
    url: Url,
    request_field: String,
    token_pointers: Vec<String>,
}

impl HttpTokenIssuer {
    pub fn new(client: Client, url: Url, config: &RefreshEndpointConfig) -> Self {
        Self {
            client,
            url,
            request_field: config.request_field.clone(),
            token_pointers: config.token_pointers.clone(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn extract_token(&self, body: &serde_json::Value) -> Option<String> {
        self.token_pointers
            .iter()
            .find_map(|pointer| body.pointer(pointer).and_then(|v| v.as_str()))
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    #[instrument(skip(self, refresh_id), fields(url = %self.url))]
    async fn issue(&self, refresh_id: &str) -> Result<String, RefreshError> {
        let mut payload = serde_json::Map::new();
        payload.insert(
            self.request_field.clone(),
            serde_json::Value::String(refresh_id.to_string()),
        );

        // The refresh call itself never carries a bearer.
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected { status, body });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RefreshError::Other(format!("unreadable token response: {e}")))?;

        let token = self.extract_token(&body).ok_or(RefreshError::MissingToken)?;
        debug!("Token endpoint issued a new bearer");
        Ok(token)
    }
}
