use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "Renalog";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Renalog/ on all platforms, falling back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the summary database path
pub fn database_path() -> PathBuf {
    app_data_dir().join("summaries.db")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "renalog=debug,warn"
    } else {
        "renalog=info,warn"
    }
}

// ═══════════════════════════════════════════════════════════
// SummaryConfig
// ═══════════════════════════════════════════════════════════

/// Tunables for the aggregation engine and read layer.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryConfig {
    /// Most periods returned by one read; longer ranges are paginated.
    pub max_page_size: usize,
    /// How long a cached weight history stays valid.
    pub weight_cache_ttl: Duration,
    /// |% change| below which a month's weight trend is stable.
    pub weight_stable_threshold_percent: f64,
    /// Months covered by the weight history chart.
    pub weight_history_months: u32,
    /// Most later days re-scored when a back-dated entry changes a streak.
    pub streak_propagation_limit: usize,
    pub notes_max_chars: usize,
    pub symptom_score_max: u8,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            weight_cache_ttl: Duration::from_secs(300),
            weight_stable_threshold_percent: 1.0,
            weight_history_months: 12,
            streak_propagation_limit: 400,
            notes_max_chars: 500,
            symptom_score_max: 10,
        }
    }
}
