//! Failure classification.
//!
//! Deciding whether a failed response should trigger a credential refresh takes
//! two signals: the HTTP status and a machine-readable error code in the body.
//! Servers commonly reuse 401 for permission failures a new token would not fix,
//! so the status alone is never enough.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::config::ClassifierConfig;

/// A completed, non-successful response as seen by the classifier.
#[derive(Debug, Clone, Copy)]
pub struct FailedResponse<'a> {
    pub status: StatusCode,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Expired or invalid credential; refresh and retry.
    Refreshable { code: String },
    /// Anything else; passed through to the caller unchanged.
    Other { code: Option<String> },
}

impl Classification {
    #[inline]
    pub fn is_refreshable(&self) -> bool {
        matches!(self, Self::Refreshable { .. })
    }

    /// Machine-readable code extracted from the body, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Refreshable { code } => Some(code),
            Self::Other { code } => code.as_deref(),
        }
    }
}

/// Decides whether a failed response is eligible for refresh-and-retry.
///
/// Implementations must be pure: no I/O, no shared state.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, response: &FailedResponse<'_>) -> Classification;
}

/// Status-plus-code classifier driven by [`ClassifierConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultClassifier {
    config: ClassifierConfig,
}

impl DefaultClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Pull the first string (or integer) found under the configured pointers.
    fn extract_code(&self, body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        self.config.code_pointers.iter().find_map(|pointer| {
            match value.pointer(pointer)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }
}

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, response: &FailedResponse<'_>) -> Classification {
        let code = self.extract_code(response.body);

        let status_matches = self.config.statuses.contains(&response.status);
        match code {
            Some(code) if status_matches && self.config.codes.iter().any(|c| *c == code) => {
                Classification::Refreshable { code }
            }
            code => Classification::Other { code },
        }
    }
}
