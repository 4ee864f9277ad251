//! Per-device time ordering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::WriteError;
use crate::types::HistoryRecord;

/// Last persisted time per device.
#[derive(Debug, Default, Clone)]
pub struct OrderGuard {
    last: HashMap<String, DateTime<Utc>>,
}

impl OrderGuard {
    /// Reject the batch if any device would go back in time.
    pub fn check(&self, records: &[HistoryRecord]) -> Result<(), WriteError> {
        for r in records {
            if let Some(&last) = self.last.get(&r.device) {
                if r.time < last {
                    return Err(WriteError::OutOfOrder {
                        device: r.device.clone(),
                        last,
                        attempted: r.time,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn commit(&mut self, records: &[HistoryRecord]) {
        for r in records {
            let entry = self.last.entry(r.device.clone()).or_insert(r.time);
            if r.time > *entry {
                *entry = r.time;
            }
        }
    }

    pub fn last(&self, device: &str) -> Option<DateTime<Utc>> {
        self.last.get(device).copied()
    }
}
