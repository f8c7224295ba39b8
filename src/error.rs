//! Error types for the access layer

use std::io;

use thiserror::Error;

use crate::resolver::CandidateSummary;

/// Result type alias for the access layer
pub type Result<T> = std::result::Result<T, Error>;

/// Access layer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No stored session
    #[error("Not authenticated: no stored session, start a login first")]
    NotAuthenticated,

    /// Refresh failed; the session must be re-established
    #[error("Session expired: {0}. Start a new login")]
    SessionExpired(String),

    /// A login attempt ended without producing a session
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Timeout or network failure, after the retry budget was spent
    #[error("Transport error after {attempts} attempt(s) [correlation {correlation_id}]: {message}")]
    Transport {
        /// Failure description
        message: String,
        /// Attempts made, including the first
        attempts: u32,
        /// Correlation id sent with every attempt
        correlation_id: String,
    },

    /// Non-2xx response
    #[error("HTTP {status} from {method} {url} after {attempts} attempt(s) [correlation {correlation_id}]: {body}")]
    Http {
        /// Response status
        status: u16,
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// Response body, truncated
        body: String,
        /// Attempts made, including the first
        attempts: u32,
        /// Correlation id sent with every attempt
        correlation_id: String,
    },

    /// A GraphQL document came back with `errors[]`
    #[error("GraphQL errors [correlation {correlation_id}]: {}", messages.join("; "))]
    GraphQl {
        /// Messages from the `errors` array
        messages: Vec<String>,
        /// Correlation id of the request
        correlation_id: String,
    },

    /// More than one candidate matched a name
    #[error("Ambiguous match for '{target}': {total} candidates ({})", summarize(candidates))]
    AmbiguousMatch {
        /// Trimmed input
        target: String,
        /// Bounded list of matching candidates
        candidates: Vec<CandidateSummary>,
        /// Total number of matching candidates
        total: usize,
    },

    /// No candidate matched a name
    #[error("No match for '{target}' among {pool_size} candidates (e.g. {})", summarize(sample))]
    NotFound {
        /// Trimmed input
        target: String,
        /// Bounded sample of the candidate pool
        sample: Vec<CandidateSummary>,
        /// Size of the candidate pool
        pool_size: usize,
    },

    /// Folder search stopped at its node budget without a decision
    #[error("Folder search for '{target}' stopped after scanning {scanned} folders without a decision")]
    ScanLimitExceeded {
        /// Trimmed input
        target: String,
        /// Number of nodes examined
        scanned: usize,
    },

    /// Caller-supplied argument is unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(candidates: &[CandidateSummary]) -> String {
    candidates
        .iter()
        .map(|c| format!("{} [{}]", c.name, c.id))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Whether the executor may retry after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => crate::failsafe::is_retryable_status(*status),
            _ => false,
        }
    }

    /// Stable machine-readable code for tool adapters
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::LoginFailed(_) => "LOGIN_FAILED",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Http { .. } => "HTTP_ERROR",
            Self::GraphQl { .. } => "GRAPHQL_ERROR",
            Self::AmbiguousMatch { .. } => "AMBIGUOUS_MATCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ScanLimitExceeded { .. } => "SCAN_LIMIT_EXCEEDED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
