pub mod csv_log;
pub mod memory_log;
pub mod order_log;

pub use csv_log::CsvOrderLog;
pub use memory_log::InMemoryOrderLog;
pub use order_log::{OrderLog, OrderLogError};
