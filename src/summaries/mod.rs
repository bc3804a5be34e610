//! Treatment-summary aggregation: deltas, streaks, the write engine and the
//! read layer.

pub mod cache;
pub mod delta;
pub mod engine;
pub mod error;
pub mod notify;
pub mod period;
pub mod query;
pub mod streak;
pub mod validation;
pub mod weight;

pub use cache::TtlCache;
pub use delta::SummaryUpdate;
pub use engine::{EventDelta, SummaryEngine};
pub use error::{SummaryError, ValidationError};
pub use notify::SummaryChanged;
pub use period::{Period, PeriodKeys};
pub use query::{SummaryPage, SummaryReader};
pub use weight::{WeightHistory, WeightPoint};
