//! Tracing setup for the desktop app

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// App-specific filter variable, checked before `RUST_LOG`
pub const LOG_ENV_VAR: &str = "VIDEO_CATALOG_LOG";

/// Used when neither the environment nor the settings give a filter.
/// The GPU stack is very chatty at `info`.
const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn,iced_wgpu=warn";

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(configured: Option<&str>) {
    let filter = build_filter(std::env::var(LOG_ENV_VAR).ok().as_deref(), configured);

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init();
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// `VIDEO_CATALOG_LOG` > `RUST_LOG` > settings > default.
/// Unparseable directives fall through to the next source.
fn build_filter(app_env: Option<&str>, configured: Option<&str>) -> EnvFilter {
    if let Some(filter) = app_env.and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if let Some(filter) = configured.and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    EnvFilter::new(DEFAULT_FILTER)
}
