pub mod config;
pub mod db;
pub mod models;
pub mod summaries; // Delta rollups: day → week → month

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber for the host process.
///
/// Filter comes from `RUST_LOG`, falling back to the crate default. Calling
/// this again, or after the host installed its own subscriber, is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Renalog summaries v{}", config::APP_VERSION);
    }
}
