//! Tracing subscriber setup for embedding binaries and tests.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `filter` nor `RUST_LOG` is given
#[cfg(not(feature = "verbose-logging"))]
pub const DEFAULT_FILTER: &str = "storyboard_persist=info";

/// Filter used when neither `filter` nor `RUST_LOG` is given
#[cfg(feature = "verbose-logging")]
pub const DEFAULT_FILTER: &str = "storyboard_persist=debug";

/// Install a fmt subscriber
///
/// `filter` wins over `RUST_LOG`, which wins over [`DEFAULT_FILTER`].
/// Returns `false` if a global subscriber was already installed.
pub fn init(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
