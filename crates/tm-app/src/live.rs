//! Latest-snapshot cache.
//!
//! One publisher (the sampler) swaps in whole snapshots; any number of
//! readers load the current one without locking.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tm_core::Snapshot;

/// Create a cache holding the empty startup snapshot.
pub fn live_state() -> (LivePublisher, LiveView) {
    let cell = Arc::new(ArcSwap::from_pointee(Snapshot::empty()));
    (
        LivePublisher {
            cell: Arc::clone(&cell),
        },
        LiveView { cell },
    )
}

/// Write side. Not `Clone`: there is exactly one.
pub struct LivePublisher {
    cell: Arc<ArcSwap<Snapshot>>,
}

impl LivePublisher {
    pub fn publish(&self, snapshot: Snapshot) {
        self.cell.store(Arc::new(snapshot));
    }

    pub fn view(&self) -> LiveView {
        LiveView {
            cell: Arc::clone(&self.cell),
        }
    }
}

#[derive(Clone)]
pub struct LiveView {
    cell: Arc<ArcSwap<Snapshot>>,
}

impl LiveView {
    pub fn read(&self) -> Arc<Snapshot> {
        self.cell.load_full()
    }
}
