//! Structured logging setup.
//!
//! The client logs through `tracing`: every client operation opens a span
//! named `client.<operation>`, and notable events (insecure sessions, failed
//! foreign key cleanup, app polling) are logged inside it. These helpers
//! install a subscriber that writes to **stderr**, leaving stdout to the host
//! process.
//!
//! # Quick Start
//!
//! ```ignore
//! use observe_provider::{init_logging, Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let config = ClientConfig::from_value(&serde_json::json!({"customer": "101"}))?;
//!     tracing::info!(customer = %config.customer, "Starting");
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `observe_provider=debug`)
//!
//! ```bash
//! # Show client spans and polling at debug level
//! RUST_LOG=observe_provider=debug ./my-tool
//! ```

use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter, Layer};

const DEFAULT_LEVEL: &str = "info";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer() -> impl Layer<Registry> + Send + Sync {
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// Filtering follows `RUST_LOG`, falling back to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LEVEL);
}

/// Like [`init_logging`], with `default_level` used when `RUST_LOG` is unset.
///
/// # Example
///
/// ```ignore
/// use observe_provider::init_logging_with_default;
///
/// fn main() {
///     init_logging_with_default("observe_provider=debug");
/// }
/// ```
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(stderr_layer().with_filter(filter(default_level)))
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Useful from tests, where several cases may race to install a subscriber.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(stderr_layer().with_filter(filter(DEFAULT_LEVEL)))
        .try_init()
        .is_ok()
}
