use parking_lot::Mutex;

use crate::model::OrderLogEntry;
use crate::persistence::order_log::{OrderLog, OrderLogError};

/// Process-local order log. Used by tests and dry runs that must not touch disk.
#[derive(Default)]
pub struct InMemoryOrderLog {
    entries: Mutex<Vec<OrderLogEntry>>,
}

impl InMemoryOrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<OrderLogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn entries(&self) -> Vec<OrderLogEntry> {
        self.entries.lock().clone()
    }
}

impl OrderLog for InMemoryOrderLog {
    fn read_last_id(&self) -> Result<Option<u64>, OrderLogError> {
        Ok(self.entries.lock().iter().map(|e| e.client_order_id).max())
    }

    fn append(&self, entry: &OrderLogEntry) -> Result<(), OrderLogError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}
