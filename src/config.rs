use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::exchange::ResponseClassifierConfig;

/// Main configuration structure.
///
/// Built once at startup and passed by value into each component's
/// constructor. Components never read configuration from anywhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub submission: SubmissionConfig,
    pub two_leg: TwoLegConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum total open exposure in USD
    pub max_exposure_usd: Decimal,
    /// Maximum exposure per market in USD
    pub max_exposure_per_market_usd: Decimal,
    /// Per-category exposure over this emits a warning, never a rejection
    pub max_exposure_per_category_usd: Decimal,
    /// Session drawdown percentage that trips the circuit breaker
    pub max_drawdown_pct: Decimal,
    /// Bankroll the drawdown percentage is computed against
    pub session_bankroll_usd: Decimal,
    /// Loss percentage above which panic liquidation bypasses all gates
    pub panic_loss_pct: Decimal,
    /// Consecutive order rejections before the circuit breaker trips
    pub max_consecutive_rejects: u32,
    /// Consecutive API errors before the circuit breaker trips
    pub max_consecutive_api_errors: u32,
    /// Sustained unhealthy-API seconds before the circuit breaker trips
    pub max_api_unhealthy_secs: u64,
    /// How long a triggered circuit breaker stays down
    pub circuit_breaker_cooldown_secs: u64,
    /// Orders below this notional are rejected
    pub min_order_usd: Decimal,
    /// Positions valued below this are reclassified as dust
    pub dust_threshold_usd: Decimal,
    /// Maximum tolerated expected slippage in cents
    pub max_slippage_cents: Decimal,
    /// A never-completed in-flight lock self-expires after this
    pub in_flight_lock_timeout_ms: u64,
    /// Cooldown after an order completes before the same key can trade again
    pub post_order_cooldown_ms: u64,
    /// PnL discrepancy percentage at which reconciliation flags a position
    pub reconciliation_threshold_pct: Decimal,
    /// Whether a flagged reconciliation also halts the market
    pub halt_on_reconciliation_failure: bool,
    /// Existence of this file halts all trading; checked on every evaluate
    pub kill_switch_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum submission attempts per order
    pub max_retries: u8,
    /// Base retry delay; attempt n waits retry_delay_ms * 2^(n-1)
    pub retry_delay_ms: u64,
    /// Audit log trims to its newest half past this size
    pub audit_max_entries: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            audit_max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    /// Orders below this notional never reach the wire
    pub min_size_usd: Decimal,
    /// Minimum gap between any two submissions
    pub min_interval_ms: u64,
    /// Maximum submissions per rolling hour
    pub max_per_hour: u32,
    /// Cooldown per market after a submission
    pub market_cooldown_ms: u64,
    /// Cooldown after an upstream block is detected
    pub block_cooldown_secs: u64,
    /// Cooldown after an authentication failure
    pub auth_cooldown_secs: u64,
    /// Cooldown after a balance/allowance rejection
    pub balance_cooldown_secs: u64,
    #[serde(default)]
    pub classifier: ResponseClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwoLegConfig {
    /// Legs priced below this are rejected up front
    pub min_leg_price: Decimal,
    /// Maximum second-leg price drift from plan before aborting
    pub slippage_tolerance: Decimal,
    /// Minimum recomputed profit to proceed with the second leg
    pub min_expected_profit_usd: Decimal,
    /// Balance/allowance checks are cached for this long
    pub allowance_cache_secs: u64,
    /// Minimum gap between allowance-increase attempts
    pub approval_cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Tick interval; a slow tick delays the next rather than overlapping it
    pub tick_interval_ms: u64,
    /// Concurrency limit for order book prefetches within one strategy pass
    pub book_prefetch_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Path of the JSON state snapshot
    pub snapshot_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/polygate_state.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("execution.max_retries", 3)?
            .set_default("execution.retry_delay_ms", 1_000)?
            .set_default("execution.audit_max_entries", 1000)?
            .set_default("persistence.snapshot_path", "data/polygate_state.json")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("POLYGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (POLYGATE_RISK__MAX_EXPOSURE_USD, etc.)
            .add_source(
                Environment::with_prefix("POLYGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load, then refuse to start on out-of-range values.
    pub fn load_and_validate<P: AsRef<Path>>(config_dir: P) -> crate::error::Result<Self> {
        let config = Self::load_from(config_dir)?;
        config
            .validate()
            .map_err(|errors| crate::error::PolygateError::Validation(errors.join("; ")))?;
        Ok(config)
    }

    /// Create a fully-populated default configuration
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            risk: RiskConfig {
                max_exposure_usd: dec!(500),
                max_exposure_per_market_usd: dec!(50),
                max_exposure_per_category_usd: dec!(150),
                max_drawdown_pct: dec!(20),
                session_bankroll_usd: dec!(500),
                panic_loss_pct: dec!(30),
                max_consecutive_rejects: 5,
                max_consecutive_api_errors: 3,
                max_api_unhealthy_secs: 120,
                circuit_breaker_cooldown_secs: 300,
                min_order_usd: dec!(1),
                dust_threshold_usd: dec!(0.5),
                max_slippage_cents: dec!(3),
                in_flight_lock_timeout_ms: 60_000,
                post_order_cooldown_ms: 5_000,
                reconciliation_threshold_pct: dec!(10),
                halt_on_reconciliation_failure: true,
                kill_switch_file: PathBuf::from("KILL_SWITCH"),
            },
            execution: ExecutionConfig::default(),
            submission: SubmissionConfig {
                min_size_usd: dec!(1),
                min_interval_ms: 1_000,
                max_per_hour: 60,
                market_cooldown_ms: 30_000,
                block_cooldown_secs: 900,
                auth_cooldown_secs: 300,
                balance_cooldown_secs: 600,
                classifier: ResponseClassifierConfig::default(),
            },
            two_leg: TwoLegConfig {
                min_leg_price: dec!(0.05),
                slippage_tolerance: dec!(0.02),
                min_expected_profit_usd: dec!(0.10),
                allowance_cache_secs: 30,
                approval_cooldown_secs: 60,
            },
            orchestrator: OrchestratorConfig {
                tick_interval_ms: 2_000,
                book_prefetch_limit: 4,
            },
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.risk.max_exposure_usd <= Decimal::ZERO {
            errors.push("risk.max_exposure_usd must be positive".to_string());
        }

        if self.risk.max_exposure_per_market_usd > self.risk.max_exposure_usd {
            errors.push(
                "risk.max_exposure_per_market_usd cannot exceed max_exposure_usd".to_string(),
            );
        }

        if self.risk.session_bankroll_usd <= Decimal::ZERO {
            errors.push("risk.session_bankroll_usd must be positive".to_string());
        }

        if self.risk.max_drawdown_pct <= Decimal::ZERO || self.risk.max_drawdown_pct > Decimal::ONE_HUNDRED {
            errors.push("risk.max_drawdown_pct must be between 0 and 100".to_string());
        }

        if self.risk.min_order_usd <= Decimal::ZERO {
            errors.push("risk.min_order_usd must be positive".to_string());
        }

        if self.risk.max_consecutive_rejects == 0 {
            errors.push("risk.max_consecutive_rejects must be at least 1".to_string());
        }

        if self.execution.max_retries == 0 {
            errors.push("execution.max_retries must be at least 1".to_string());
        }

        if self.submission.max_per_hour == 0 {
            errors.push("submission.max_per_hour must be at least 1".to_string());
        }

        if self.two_leg.min_leg_price <= Decimal::ZERO
            || self.two_leg.min_leg_price >= Decimal::ONE
        {
            errors.push("two_leg.min_leg_price must be between 0 and 1".to_string());
        }

        if self.orchestrator.tick_interval_ms == 0 {
            errors.push("orchestrator.tick_interval_ms must be positive".to_string());
        }

        if self.orchestrator.book_prefetch_limit == 0 {
            errors.push("orchestrator.book_prefetch_limit must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
