pub mod audit;
pub mod engine;
pub mod sizing;
pub mod submission;
pub mod two_leg;

pub use audit::{AuditLog, AuditRecord};
pub use engine::ExecutionEngine;
pub use sizing::{compute_size_usd, SizingInputs, SizingMode};
pub use submission::{SubmissionController, SubmissionOutcome, SubmitParams};
pub use two_leg::{LegPlan, TwoLegExecutor, TwoLegOutcome, TwoLegPlan};
