#![forbid(unsafe_code)]

//! Typed failures raised at the HTTP and OAuth seams. Binaries wrap them in
//! `anyhow` with additional context.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single YouTube Data API request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },
    #[error("decoding {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{endpoint} response exceeds {limit} bytes")]
    TooLarge { endpoint: String, limit: u64 },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Failure while loading, obtaining or refreshing OAuth credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client secrets not found: {}", path.display())]
    MissingClientSecrets { path: PathBuf },
    #[error("client secrets at {} are invalid: {reason}", path.display())]
    InvalidClientSecrets { path: PathBuf, reason: String },
    #[error("authorization code {code:?} was rejected: {reason}")]
    CodeRejected { code: String, reason: String },
    #[error("no authorization code entered")]
    EmptyCode,
    #[error("refreshing access token failed: {reason}")]
    RefreshFailed { reason: String },
    #[error("stored token has expired and carries no refresh token")]
    NoRefreshToken,
    #[error("token endpoint unreachable: {reason}")]
    Transport { reason: String },
    #[error("token store at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading authorization code: {0}")]
    Prompt(#[source] std::io::Error),
}

impl ApiError {
    /// Builds the error for a non-2xx response, pulling Google's
    /// `error.message` out of the body when present.
    pub(crate) fn from_status(endpoint: &str, status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .and_then(|message| message.as_str())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| body.trim().to_string());
        ApiError::Status {
            endpoint: endpoint.to_string(),
            status,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_extracts_google_error_message() {
        let body = r#"{"error":{"code":403,"message":"quotaExceeded"}}"#;
        let err = ApiError::from_status("search", 403, body);
        assert_eq!(err.to_string(), "search returned HTTP 403: quotaExceeded");
    }

    #[test]
    fn from_status_falls_back_to_raw_body() {
        let err = ApiError::from_status("videos/rate", 500, "  backend error \n");
        assert_eq!(
            err.to_string(),
            "videos/rate returned HTTP 500: backend error"
        );
    }

    #[test]
    fn missing_client_secrets_names_the_path() {
        let err = AuthError::MissingClientSecrets {
            path: PathBuf::from("/etc/engage/client_secrets.json"),
        };
        assert!(err.to_string().contains("/etc/engage/client_secrets.json"));
    }
}
