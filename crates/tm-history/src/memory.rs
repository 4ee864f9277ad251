//! In-memory sink for dry runs and tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tm_core::Snapshot;

use crate::order::OrderGuard;
use crate::types::HistoryRecord;
use crate::{HistorySink, WriteError};

/// Keeps records in memory. Clones share the same storage, so a test can
/// keep one clone while the sampler owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<HistoryRecord>,
    order: OrderGuard,
    appends: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.inner.lock().records.clone()
    }

    /// Number of successful `append` calls, including empty ones.
    pub fn appends(&self) -> usize {
        self.inner.lock().appends
    }
}

impl HistorySink for MemorySink {
    fn append(&mut self, snapshot: &Snapshot) -> Result<(), WriteError> {
        let records = HistoryRecord::from_snapshot(snapshot);
        let mut inner = self.inner.lock();
        inner.order.check(&records)?;
        inner.order.commit(&records);
        inner.records.extend(records);
        inner.appends += 1;
        Ok(())
    }
}
