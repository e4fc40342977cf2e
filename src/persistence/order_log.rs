use thiserror::Error;

use crate::model::OrderLogEntry;

#[derive(Error, Debug)]
pub enum OrderLogError {
    #[error("Order log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Order log CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Corrupt order log row {row}: {reason}")]
    Corrupt { row: usize, reason: String },
}

/// Append-only record of every order attempt.
///
/// The log is the only source of truth for client order id allocation:
/// the next id is always `read_last_id() + 1`. Implementations never
/// rewrite or drop rows.
pub trait OrderLog: Send + Sync {
    /// Highest client order id ever recorded, `None` for an empty or absent log.
    fn read_last_id(&self) -> Result<Option<u64>, OrderLogError>;

    fn append(&self, entry: &OrderLogEntry) -> Result<(), OrderLogError>;
}
