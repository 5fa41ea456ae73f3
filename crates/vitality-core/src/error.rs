//! Typed errors for the extraction pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// How an origin refused us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// HTTP 403.
    Forbidden,
    /// HTTP 429.
    RateLimited,
    /// Body matched a bot-challenge marker (interstitial, rate-limit page).
    Challenge,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Forbidden => write!(f, "403"),
            BlockKind::RateLimited => write!(f, "429"),
            BlockKind::Challenge => write!(f, "challenge"),
        }
    }
}

/// Errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The URL or its origin is on the suppression list.
    #[error("url is suppressed")]
    Suppressed,
    /// robots.txt disallows this path for our user agent.
    #[error("robots.txt disallows path")]
    RobotsDisallowed,
    /// The origin is actively refusing us.
    #[error("blocked by origin ({0})")]
    Blocked(BlockKind),
    /// HTTP 5xx from the origin.
    #[error("server error: http {0}")]
    ServerError(u16),
    /// HTTP 4xx other than 403/429.
    #[error("client error: http {0}")]
    ClientError(u16),
    /// Timeout, DNS or TLS failure before a response arrived.
    #[error("transport error: {0}")]
    TransportError(String),
    /// A named circuit breaker is open.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
    /// A bounded resource (browser pool, AI quota) could not be acquired.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Downstream output did not parse to the expected shape.
    #[error("invalid output: {0}")]
    InvalidOutput(String),
    /// Heartbeat or completion for a worker with no active row.
    #[error("unknown worker: {0}")]
    UnknownWorker(String),
    /// Postgres serialization failure on a contended coordinator row.
    #[error("serialization conflict")]
    SerializationConflict,
    /// The worker-level cancel signal fired.
    #[error("cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short tag written to the visit ledger's `error_type` column.
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::Suppressed => "suppressed",
            PipelineError::RobotsDisallowed => "robots_disallowed",
            PipelineError::Blocked(_) => "blocked",
            PipelineError::ServerError(_) => "server_error",
            PipelineError::ClientError(_) => "client_error",
            PipelineError::TransportError(_) => "transport_error",
            PipelineError::CircuitOpen(_) => "circuit_open",
            PipelineError::ResourceExhausted(_) => "resource_exhausted",
            PipelineError::InvalidOutput(_) => "invalid_output",
            PipelineError::UnknownWorker(_) => "unknown_worker",
            PipelineError::SerializationConflict => "serialization_conflict",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Database(_) => "database_error",
            PipelineError::Config(_) => "config_error",
        }
    }

    /// Whether the fetch retry loop may try this error again in-cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ServerError(_) | PipelineError::TransportError(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        // SQLSTATE 40001 (serialization_failure) and 40P01 (deadlock_detected)
        // are retried by the store's serializable-retry helper.
        if let sqlx::Error::Database(db) = &e {
            if let Some(code) = db.code() {
                if code == "40001" || code == "40P01" {
                    return PipelineError::SerializationConflict;
                }
            }
        }
        PipelineError::Database(e)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::TransportError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_maps_to_ledger_tag() {
        assert_eq!(
            PipelineError::Blocked(BlockKind::RateLimited).error_type(),
            "blocked"
        );
        assert_eq!(PipelineError::ServerError(502).error_type(), "server_error");
    }

    #[test]
    fn retryable_matches_propagation_policy() {
        assert!(PipelineError::ServerError(500).is_retryable());
        assert!(PipelineError::TransportError("timeout".into()).is_retryable());
        assert!(!PipelineError::Blocked(BlockKind::Forbidden).is_retryable());
        assert!(!PipelineError::ClientError(404).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
    }

    #[test]
    fn block_kind_display() {
        assert_eq!(BlockKind::Forbidden.to_string(), "403");
        assert_eq!(BlockKind::Challenge.to_string(), "challenge");
    }
}
