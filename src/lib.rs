pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::downloader::{Download, JobEvent, JobStatus, NetJob};
pub use crate::core::error::{FetchError, FetchResult};
pub use crate::core::library::{Library, OpSys};
pub use crate::core::state::{FetchSettings, NetContext};
pub use crate::core::update::{GameProfile, GameUpdate};

/// Structured logging, filtered by `RUST_LOG` when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,interface_fetch=debug")),
        )
        .init();
}
