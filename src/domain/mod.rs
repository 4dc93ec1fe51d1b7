pub mod order;
pub mod position;

pub use order::{OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, RejectReason};
pub use position::{AllowanceInfo, AssetType, PositionState, TrackedPosition};
