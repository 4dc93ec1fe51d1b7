use thiserror::Error;

/// Main error type for the execution core
#[derive(Error, Debug)]
pub enum PolygateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Exchange collaborator errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PolygateError
pub type Result<T> = std::result::Result<T, PolygateError>;

/// Specific error types for risk admission control
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Max exposure exceeded: limit ${limit}, projected ${projected}")]
    MaxExposureExceeded {
        limit: rust_decimal::Decimal,
        projected: rust_decimal::Decimal,
    },

    #[error("Consecutive rejects: {count} >= {threshold}")]
    ConsecutiveRejects { count: u32, threshold: u32 },

    #[error("Drawdown limit: {drawdown_pct}% >= {limit_pct}%")]
    DrawdownLimit {
        drawdown_pct: rust_decimal::Decimal,
        limit_pct: rust_decimal::Decimal,
    },

    #[error("Trading halted: {reason}")]
    TradingHalted { reason: String },
}

/// Specific error types for order submission
#[derive(Error, Debug, Clone)]
pub enum SubmitError {
    #[error("Upstream blocked until {until}")]
    UpstreamBlocked { until: chrono::DateTime<chrono::Utc> },

    #[error("Authentication cooldown until {until}")]
    AuthCooldown { until: chrono::DateTime<chrono::Utc> },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u8 },
}
