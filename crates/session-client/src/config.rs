use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use crate::error::ClientError;

pub const DEFAULT_USER_AGENT: &str = concat!("session-client/", env!("CARGO_PKG_VERSION"));

/// Default authorization scheme placed in front of the bearer token.
pub const DEFAULT_AUTH_SCHEME: &str = "Bearer";

/// Settings for the token-issuing endpoint.
#[derive(Debug, Clone)]
pub struct RefreshEndpointConfig {
    /// Absolute URL, or a path joined against the client's base URL.
    pub url: String,

    /// JSON field that carries the refresh identifier in the request body.
    pub request_field: String,

    /// JSON pointers searched, in order, for the new bearer in a 2xx response.
    pub token_pointers: Vec<String>,
}

impl Default for RefreshEndpointConfig {
    fn default() -> Self {
        Self {
            url: "/auth/refresh".to_string(),
            request_field: "refresh_token".to_string(),
            token_pointers: vec![
                "/access_token".to_string(),
                "/accessToken".to_string(),
                "/data/access_token".to_string(),
            ],
        }
    }
}

/// Settings for the default failure classifier.
///
/// A failure is refreshable only when its status is in `statuses` AND the
/// machine-readable code found under one of `code_pointers` is in `codes`.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub statuses: Vec<StatusCode>,
    pub codes: Vec<String>,
    pub code_pointers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            statuses: vec![StatusCode::UNAUTHORIZED],
            codes: vec!["UNAUTHORIZED".to_string(), "TOKEN_EXPIRED".to_string()],
            code_pointers: vec![
                "/code".to_string(),
                "/error/code".to_string(),
                "/errorCode".to_string(),
            ],
        }
    }
}

/// Configurable options for the authenticated client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL that relative request paths are joined against
    pub base_url: Option<Url>,

    /// Overall timeout for a single HTTP exchange (zero disables it)
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Scheme written before the token in the `Authorization` header
    pub auth_scheme: String,

    /// How long a request waits on a refresh owned by another request.
    /// `None` waits until the refresh settles.
    pub waiter_timeout: Option<Duration>,

    pub refresh: RefreshEndpointConfig,

    pub classifier: ClassifierConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: ClientConfig::get_default_headers(),
            auth_scheme: DEFAULT_AUTH_SCHEME.to_owned(),
            waiter_timeout: Some(Duration::from_secs(60)),
            refresh: RefreshEndpointConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Start from defaults with a base URL.
    pub fn with_base_url(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::config(format!("invalid base URL `{base_url}`: {e}")))?;
        Ok(Self {
            base_url: Some(base_url),
            ..Self::default()
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    pub fn waiter_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.waiter_timeout = timeout;
        self
    }

    pub fn refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh.url = url.into();
        self
    }

    pub fn refresh_request_field(mut self, field: impl Into<String>) -> Self {
        self.refresh.request_field = field.into();
        self
    }

    pub fn refreshable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifier.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn refreshable_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.classifier.statuses = statuses;
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        default_headers
    }

    /// Resolve a request URL, joining relative paths against `base_url`.
    pub fn resolve_url(&self, url: &str) -> Result<Url, ClientError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    ClientError::invalid_request(format!("relative URL `{url}` without base URL"))
                })?;
                base.join(url)
                    .map_err(|e| ClientError::invalid_request(format!("URL `{url}`: {e}")))
            }
            Err(e) => Err(ClientError::invalid_request(format!("URL `{url}`: {e}"))),
        }
    }

    /// Build the underlying HTTP client from these settings.
    pub fn build_http_client(&self) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .default_headers(self.headers.clone())
            .connect_timeout(self.connect_timeout);

        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }

        builder
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {e}")))
    }
}
