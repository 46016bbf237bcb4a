//! Backup and restore for the shop directory.
//!
//! A full backup is a `.tar.gz` holding `backup-data.json` (every shop plus
//! an index of archived images) and the images themselves under
//! `images/logos/` and `images/maps/`. Restoring re-uploads the images and
//! recreates the shops with fresh ids and rewritten image references.

pub mod core;
pub mod server;
pub mod utils;

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "shopdir_backup=info,tower_http=info";

/// Install the global tracing subscriber. Logs go to stderr so that backup
/// output written to stdout stays clean.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
