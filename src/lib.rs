//! Loopcam - countdown-driven looping webcam recorder.
//!
//! This is the main library crate. It opens a camera on a background thread,
//! publishes every frame for preview, and records fixed-length clips after a
//! countdown, looping a configured number of times.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod session;
pub mod utils;

pub use config::{ConfigError, SessionConfig};
pub use session::{SessionController, SessionEvents};
pub use utils::error::{CaptureError, CaptureResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default `loopcam=debug` filter. Calling this
/// twice is harmless.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!("Starting loopcam v{}", env!("CARGO_PKG_VERSION"));
    }
}
