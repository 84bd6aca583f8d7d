use thiserror::Error;

/// Unified error type for the entire portfolio-valuation-core library.
/// Every public function returns `Result<T, CoreError>`.
///
/// The type is `Clone` because a coalesced price refresh hands the same
/// result to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    // ── Return computation ──────────────────────────────────────────
    #[error("Unable to compute return: {0}")]
    Convergence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── Prices / Sources ────────────────────────────────────────────
    #[error("No price available for {0}: all sources failed and nothing is cached")]
    NoPriceAvailable(String),

    #[error("Price source error ({provider}): {message}")]
    SourceFetch { provider: String, message: String },

    #[error("Price source {provider} timed out after {millis} ms")]
    Timeout { provider: String, millis: u64 },

    #[error("Network error: {0}")]
    Network(String),

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Transaction validation failed: {0}")]
    ValidationError(String),

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(String),

    #[error("Holding not found: {0}")]
    HoldingNotFound(String),

    // ── Configuration ───────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Storage ─────────────────────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),
}

impl CoreError {
    /// Shorthand for a per-source failure.
    pub fn source_fetch(provider: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::SourceFetch {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// A source call cut off after `limit`. Limits too long for `u64`
    /// milliseconds saturate.
    pub fn timeout(provider: impl Into<String>, limit: std::time::Duration) -> Self {
        CoreError::Timeout {
            provider: provider.into(),
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // Broker URLs carry access tokens in the query string.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}
