//! "Summary changed" notifications for reactive readers.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::period::PeriodKeys;

/// Buffered notifications per receiver before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Periods touched by one committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryChanged {
    pub subject_id: Uuid,
    pub day: String,
    pub week: String,
    pub month: String,
}

impl SummaryChanged {
    pub fn new(subject_id: Uuid, keys: &PeriodKeys) -> Self {
        Self {
            subject_id,
            day: keys.day.key(),
            week: keys.week.key(),
            month: keys.month.key(),
        }
    }
}

pub struct ChangeNotifier {
    sender: broadcast::Sender<SummaryChanged>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SummaryChanged> {
        self.sender.subscribe()
    }

    /// Send to current subscribers. Having none is fine.
    pub fn notify(&self, change: SummaryChanged) {
        let receivers = self.sender.send(change).unwrap_or(0);
        tracing::trace!(receivers, "Summary change notified");
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
