pub mod response;
pub mod traits;

pub use response::{classify_response, ExchangeOutcome, ResponseClassifierConfig};
pub use traits::{
    ExchangeClient, OrderBook, PriceLevel, RawResponse, SignedOrder,
};
