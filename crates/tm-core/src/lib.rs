//! tm-core: shared foundation for tempmon.
//!
//! Contains:
//! - units (uom kelvin temperature + constructors)
//! - ids (device and channel naming)
//! - snapshot (per-tick readings model)
//! - timing (tick statistics)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod snapshot;
pub mod timing;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use snapshot::*;
pub use timing::{TickStats, TickStatsSummary};
pub use units::*;
