pub mod adapter;
pub mod coinbase;
pub mod paper;

pub use adapter::{ExchangeAdapter, ExchangeError, OrderAck, OrderSummary, PositionSummary};
pub use coinbase::CoinbaseAdapter;
pub use paper::PaperExchange;
