use thiserror::Error;

/// Fatal extraction failure. The run stops before feature building.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("bill contains no extractable text")]
    NoText,
}

/// Failure talking to the language-model extraction service.
///
/// Never fatal: the extractor degrades to the rule result.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("cannot connect to {url}")]
    Connect { url: String },
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response contained no text")]
    EmptyResponse,
    #[error("no API key configured")]
    MissingApiKey,
}

impl ExternalServiceError {
    /// Map a reqwest error onto the timeout/connect variants where possible.
    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else if err.is_connect() {
            Self::Connect {
                url: url.to_string(),
            }
        } else {
            Self::Http(err)
        }
    }

    /// Whether a second attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExternalServiceError::Timeout { secs: 30 }.is_transient());
        assert!(
            ExternalServiceError::Server {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ExternalServiceError::Server {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ExternalServiceError::Server {
                status: 401,
                body: "bad key".into()
            }
            .is_transient()
        );
        assert!(!ExternalServiceError::EmptyResponse.is_transient());
        assert!(!ExternalServiceError::MissingApiKey.is_transient());
    }
}
