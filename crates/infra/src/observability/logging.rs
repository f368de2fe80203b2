use cloudlink_domain::{CloudLinkError, LoggingConfig, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Resolve the active filter: `RUST_LOG` wins, then the configured directive.
///
/// # Errors
/// Returns `CloudLinkError::Config` for a directive `EnvFilter` cannot parse.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter)
        .map_err(|e| CloudLinkError::Config(format!("invalid log filter {:?}: {e}", config.filter)))
}

/// Install the global tracing subscriber.
///
/// Human-readable output goes to stderr; `json = true` switches to one JSON
/// object per line.
///
/// # Errors
/// Returns `CloudLinkError::Config` for an invalid filter or when a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).try_init()
    };

    installed.map_err(|e| CloudLinkError::Config(format!("tracing already initialised: {e}")))
}
