pub mod breaker;
pub mod cooldown;
pub mod manager;

pub use breaker::{CircuitBreaker, CircuitBreakerState};
pub use cooldown::{CooldownEntry, CooldownKey, CooldownTable, InFlightLock, InFlightTable};
pub use manager::{
    KillSwitch, ReconciliationResult, RiskDecision, RiskManager, RiskStateSnapshot,
    PANIC_STRATEGY_ID,
};
