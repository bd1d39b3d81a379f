//! Tracing initialization.
//!
//! JSON output for log aggregation, pretty output for local runs. Both honor
//! `RUST_LOG` (default `info`).

use anyhow::{anyhow, Result};
use std::fmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already set.
pub fn init_tracing(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(MillisTimer)
            .with_target(true)
            .with_current_span(false);
        registry.with(json_layer).try_init()
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .with_timer(MillisTimer)
            .with_target(false);
        registry.with(pretty_layer).try_init()
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}

/// UTC timestamps with millisecond precision, matching tick timestamps.
#[derive(Debug, Clone, Copy)]
struct MillisTimer;

impl FormatTime for MillisTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}
