//! Tracing subscriber setup

use crate::config::{LogFormat, LogLevel};
use crate::{Error, Result};
use tracing::{info_span, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` overrides `level` when set.
pub fn init(level: LogLevel, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::from(level).as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(false)).try_init(),
    };

    installed.map_err(|e| Error::config(format!("Failed to install log subscriber: {}", e)))
}

/// Span wrapping the lifetime of one peer connection
pub fn peer_span(peer: &crate::peer::PeerId) -> Span {
    info_span!("peer", id = %peer)
}
