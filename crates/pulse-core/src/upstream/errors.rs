use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a fetch was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The upstream's circuit breaker is open (or its half-open probe is taken).
    CircuitOpen,
    /// The upstream's token bucket is empty for this cycle.
    RateLimited,
    /// No local connection slot freed up in time. The upstream was never contacted.
    PoolExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("circuit breaker open"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::PoolExhausted => f.write_str("local connection pool exhausted"),
        }
    }
}

/// Errors that can occur when fetching from an upstream.
///
/// Every variant except [`FetchError::Skipped`] is reported to the circuit breaker as a
/// failure. The variants stay distinct so logs and metrics can tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Not attempted: breaker open, rate limited or no local connection slot. No network call
    /// was made.
    #[error("Skipped: {0}")]
    Skipped(SkipReason),

    /// The request exceeded the upstream's timeout.
    #[error("Request timeout")]
    Timeout,

    /// Connection, DNS or TLS failure. The message is sanitized.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx HTTP status.
    #[error("HTTP error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// 2xx response whose body does not match the expected schema.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Variant discriminant of [`FetchError`], used as a metrics label and in JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Skipped,
    Timeout,
    TransportError,
    UpstreamError,
    ParseError,
}

impl FetchErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::UpstreamError => "upstream_error",
            Self::ParseError => "parse_error",
        }
    }
}

/// Serializable summary of a [`FetchError`] for snapshots and the health table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchErrorReport {
    pub kind: FetchErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl FetchError {
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Skipped(_) => FetchErrorKind::Skipped,
            Self::Timeout => FetchErrorKind::Timeout,
            Self::Transport(_) => FetchErrorKind::TransportError,
            Self::Upstream { .. } => FetchErrorKind::UpstreamError,
            Self::Parse(_) => FetchErrorKind::ParseError,
        }
    }

    /// Returns `true` if retrying the same upstream may succeed.
    ///
    /// Transient errors:
    /// - Timeouts and transport failures
    /// - HTTP 5xx
    /// - HTTP 429 (rate limited by the upstream)
    ///
    /// Parse errors and other 4xx responses are permanent for this attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Upstream { status, .. } => (500..=599).contains(status) || *status == 429,
            Self::Skipped(_) | Self::Parse(_) => false,
        }
    }

    /// Returns `true` if the outcome must be recorded as a circuit breaker failure.
    ///
    /// A skipped fetch never reached the upstream, so it carries no signal about it.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }

    /// Returns `true` for HTTP 429 responses.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Upstream { status: 429, .. })
    }

    #[must_use]
    pub fn report(&self) -> FetchErrorReport {
        let status = match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        };
        FetchErrorReport { kind: self.kind(), message: self.to_string(), status }
    }
}

impl From<&FetchError> for FetchErrorReport {
    fn from(error: &FetchError) -> Self {
        error.report()
    }
}
