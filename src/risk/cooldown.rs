use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::domain::OrderSide;

/// Canonical cooldown/lock key. Always (token_id, side); never token_id
/// alone, so a sell cooldown cannot block an unrelated buy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CooldownKey {
    pub token_id: String,
    pub side: OrderSide,
}

impl CooldownKey {
    pub fn new(token_id: impl Into<String>, side: OrderSide) -> Self {
        Self {
            token_id: token_id.into(),
            side,
        }
    }
}

impl std::fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.token_id, self.side)
    }
}

/// A hard submission ban for one key, blocking strictly until `until`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub until: DateTime<Utc>,
    pub reason: String,
    pub attempts: u32,
}

/// Per-key hard cooldowns.
#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: HashMap<CooldownKey, CooldownEntry>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active cooldown for a key, if any. Expired entries are not
    /// returned (pruning removes them later).
    pub fn active(&self, key: &CooldownKey, now: DateTime<Utc>) -> Option<&CooldownEntry> {
        self.entries.get(key).filter(|e| now < e.until)
    }

    /// Arm or re-arm a cooldown. Repeated arming bumps the attempt count.
    pub fn set(&mut self, key: CooldownKey, until: DateTime<Utc>, reason: impl Into<String>) {
        let reason = reason.into();
        let attempts = self.entries.get(&key).map(|e| e.attempts + 1).unwrap_or(1);
        debug!(key = %key, until = %until, reason = %reason, attempts, "Cooldown armed");
        self.entries.insert(
            key,
            CooldownEntry {
                until,
                reason,
                attempts,
            },
        );
    }

    pub fn remove(&mut self, key: &CooldownKey) {
        self.entries.remove(key);
    }

    /// Delete expired entries. Pure cleanup of inert state.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.until);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutual-exclusion marker for one instrument+side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightLock {
    pub strategy_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-key in-flight locks.
///
/// Lifecycle: absent -> locked (acquired on approval) -> completed-cooldown
/// (result recorded, `completed_at` stamped) -> absent once the post-order
/// cooldown elapses. A lock never completed expires after the stuck-lock
/// timeout.
#[derive(Debug)]
pub struct InFlightTable {
    locks: HashMap<CooldownKey, InFlightLock>,
    lock_timeout: Duration,
    post_order_cooldown: Duration,
}

impl InFlightTable {
    pub fn new(lock_timeout_ms: u64, post_order_cooldown_ms: u64) -> Self {
        Self {
            locks: HashMap::new(),
            lock_timeout: Duration::milliseconds(lock_timeout_ms as i64),
            post_order_cooldown: Duration::milliseconds(post_order_cooldown_ms as i64),
        }
    }

    /// Whether a key is currently blocked, clearing any entry whose
    /// lifetime has run out.
    pub fn is_blocked(&mut self, key: &CooldownKey, now: DateTime<Utc>) -> bool {
        let Some(lock) = self.locks.get(key) else {
            return false;
        };

        match lock.completed_at {
            // Completed: blocks through the post-order cooldown
            Some(completed_at) => {
                if now - completed_at >= self.post_order_cooldown {
                    self.locks.remove(key);
                    false
                } else {
                    true
                }
            }
            // Still in flight: blocks until the stuck-lock timeout
            None => {
                if now - lock.started_at >= self.lock_timeout {
                    warn!(key = %key, "In-flight lock never completed, expiring it");
                    self.locks.remove(key);
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Acquire the lock. Caller must have checked `is_blocked` first.
    pub fn acquire(&mut self, key: CooldownKey, strategy_id: impl Into<String>, now: DateTime<Utc>) {
        self.locks.insert(
            key,
            InFlightLock {
                strategy_id: strategy_id.into(),
                started_at: now,
                completed_at: None,
            },
        );
    }

    /// Stamp completion, success or failure alike. The key then stays
    /// blocked for the post-order cooldown.
    pub fn complete(&mut self, key: &CooldownKey, now: DateTime<Utc>) {
        if let Some(lock) = self.locks.get_mut(key) {
            lock.completed_at = Some(now);
        }
    }

    /// Delete locks past their lifetime.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let lock_timeout = self.lock_timeout;
        let post_cooldown = self.post_order_cooldown;
        let before = self.locks.len();
        self.locks.retain(|_, lock| match lock.completed_at {
            Some(completed_at) => now - completed_at < post_cooldown,
            None => now - lock.started_at < lock_timeout,
        });
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
