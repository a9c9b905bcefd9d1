//! Error types for the content API client.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::{Classify, FailureType, parse_retry_after};

/// Errors returned by [`ContentApi`](super::ContentApi) operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The session was rejected or expired (HTTP 401, or a login page
    /// served where JSON was expected).
    #[error("[AUTH] session rejected (HTTP {status}) requesting {url}")]
    AuthRequired {
        /// The URL that required authentication.
        url: String,
        /// The HTTP status code (0 for a login-page response).
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// The URL whose response was malformed.
        url: String,
        /// Decoder message.
        message: String,
    },

    /// File system error while writing downloaded bytes.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configured base URL or a link from the API is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl ApiError {
    /// Creates a network error, promoting reqwest timeouts to [`ApiError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an authentication-required error.
    pub fn auth_required(url: impl Into<String>, status: u16) -> Self {
        Self::AuthRequired {
            url: url.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

impl Classify for ApiError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::Timeout { .. } => FailureType::Transient,
            Self::Network { source, .. } => {
                if is_tls_error(source) {
                    FailureType::Permanent
                } else {
                    FailureType::Transient
                }
            }
            Self::AuthRequired { .. } => FailureType::NeedsAuth,
            Self::Decode { .. } | Self::InvalidUrl { .. } => FailureType::Permanent,
            Self::Io { .. } => FailureType::Local,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}

/// Classifies an HTTP status code into a failure type.
///
/// | Status | Type |
/// |--------|------|
/// | 401 | NeedsAuth (session expired) |
/// | 403, 404, 410, other 4xx | Permanent |
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | 5xx | Transient |
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 => FailureType::NeedsAuth,
        403 => FailureType::Permanent, // permission denied on this page
        404 => FailureType::Permanent, // page or attachment deleted mid-run
        408 => FailureType::Transient,
        410 => FailureType::Permanent,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
