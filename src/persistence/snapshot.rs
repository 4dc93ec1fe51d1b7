use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;

/// On-demand JSON snapshot of the risk bookkeeping that is worth keeping
/// across restarts. Everything else rebuilds from the exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    #[serde(default)]
    pub exposure_by_market: HashMap<String, Decimal>,
    #[serde(default)]
    pub wallet_exposure_usd: Decimal,
    #[serde(default)]
    pub market_cooldowns: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub recent_trades: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut snapshot = self.clone();
        snapshot.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "State snapshot written");
        Ok(())
    }

    /// Best-effort load. A missing file or unparseable content falls back
    /// to the empty snapshot; startup must never die on stale state.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                info!(path = %path.display(), "No state snapshot, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "State snapshot unreadable, starting empty"
                );
                Self::default()
            }
        }
    }
}
