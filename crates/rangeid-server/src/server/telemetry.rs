//! Log output for the server and the `rangeid` library.
//!
//! The library emits spans and events through `tracing` (its `tracing`
//! feature is always enabled here). This module installs the subscriber that
//! prints them:
//!
//! - `RUST_LOG` selects what is printed (default `info`). Retry cycles are at
//!   `debug`, e.g. `RUST_LOG=info,rangeid=debug`.
//! - `LOG_FORMAT` selects human-readable `text` or one JSON object per event.

use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::server::config::LogFormat;

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_file(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_timer(ChronoLocal::rfc_3339()),
            )
            .try_init()?,
    }

    Ok(())
}
