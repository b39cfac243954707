//! Request descriptors and per-dispatch attempt records.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::ClientError;

/// Immutable description of an outbound request.
///
/// The body is held as [`Bytes`] so the same request can be replayed after a
/// credential refresh.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub method: Method,
    /// Absolute URL, or a path joined against the client's base URL.
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl AuthRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a header. Invalid names or values are rejected up front.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::invalid_request(format!("header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::invalid_request(format!("header `{name}`: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ClientError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ClientError::invalid_request(format!("JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }
}

/// Where the bearer on an attempt came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerSource {
    /// Read from the credential store by the request interceptor.
    Store(Option<String>),
    /// Handed over after a refresh (or a refresh that completed in between).
    Fresh(String),
}

impl BearerSource {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Store(token) => token.as_deref(),
            Self::Fresh(token) => Some(token),
        }
    }
}

/// One dispatch of an [`AuthRequest`].
///
/// A new record is created for every dispatch; nothing on the request itself
/// is mutated. Only the initial attempt may ask for a credential refresh, and
/// only the initial attempt can produce a retry, so every request is sent at
/// most twice.
#[derive(Debug, Clone)]
pub struct Attempt {
    request: Arc<AuthRequest>,
    number: u8,
    bearer: BearerSource,
}

impl Attempt {
    /// First dispatch, carrying whatever bearer the store held.
    pub fn initial(request: Arc<AuthRequest>, bearer: Option<String>) -> Self {
        Self {
            request,
            number: 1,
            bearer: BearerSource::Store(bearer),
        }
    }

    /// The single retry allowed for this request, carrying `token`.
    ///
    /// Returns `None` when this attempt is already a retry.
    pub fn retry(&self, token: String) -> Option<Self> {
        if self.is_retry() {
            return None;
        }
        Some(Self {
            request: Arc::clone(&self.request),
            number: self.number + 1,
            bearer: BearerSource::Fresh(token),
        })
    }

    pub fn request(&self) -> &AuthRequest {
        &self.request
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn bearer(&self) -> &BearerSource {
        &self.bearer
    }

    #[inline]
    pub fn is_retry(&self) -> bool {
        self.number > 1
    }

    /// Whether an eligible auth failure on this attempt may enter the refresh gate.
    #[inline]
    pub fn may_refresh(&self) -> bool {
        !self.is_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_is_bounded_to_one() {
        let request = Arc::new(AuthRequest::get("/me"));
        let first = Attempt::initial(Arc::clone(&request), Some("t1".to_string()));
        assert!(first.may_refresh());
        assert_eq!(first.bearer().token(), Some("t1"));

        let second = first.retry("t2".to_string()).expect("first attempt can retry");
        assert_eq!(second.number(), 2);
        assert!(!second.may_refresh());
        assert_eq!(second.bearer(), &BearerSource::Fresh("t2".to_string()));

        assert!(second.retry("t3".to_string()).is_none());
        // The original record is untouched and the request is shared, not copied.
        assert_eq!(first.number(), 1);
        assert!(Arc::ptr_eq(&first.request, &second.request));
    }

    #[test]
    fn test_with_json_sets_body_and_content_type() {
        let req = AuthRequest::post("/items")
            .with_json(&serde_json::json!({ "name": "a" }))
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"{\"name\":\"a\"}"[..]));
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_with_header_rejects_invalid_value() {
        let err = AuthRequest::get("/").with_header("x-test", "bad\nvalue");
        assert!(matches!(err, Err(ClientError::InvalidRequest(_))));
    }
}
