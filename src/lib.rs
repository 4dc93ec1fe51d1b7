pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
pub mod risk;

pub use config::AppConfig;
pub use domain::{
    OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, PositionState, RejectReason,
    TrackedPosition,
};
pub use error::{PolygateError, Result, RiskError, SubmitError};
pub use exchange::{classify_response, ExchangeClient, ExchangeOutcome, OrderBook, RawResponse};
pub use execution::{
    compute_size_usd, AuditRecord, ExecutionEngine, SizingInputs, SizingMode,
    SubmissionController, SubmitParams, TwoLegExecutor, TwoLegOutcome, TwoLegPlan,
};
pub use orchestrator::{CycleOrchestrator, Proposal, Strategy};
pub use persistence::StateSnapshot;
pub use risk::{
    CircuitBreakerState, CooldownKey, ReconciliationResult, RiskDecision, RiskManager,
    RiskStateSnapshot, PANIC_STRATEGY_ID,
};
