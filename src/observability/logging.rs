//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Apply `observability.log_level` from the configuration, live
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configuration when set
//! - The filter sits behind a reload layer so a committed configuration
//!   change takes effect without a restart

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, util::TryInitError, EnvFilter,
    Registry,
};

/// Handle for changing the log filter after initialization.
#[derive(Clone)]
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) -> Result<LoggingHandle, TryInitError> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(directives(default_level)), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()?;

    Ok(LoggingHandle { filter: handle, from_env })
}

impl LoggingHandle {
    /// Switch to `level` (trace, debug, info, warn, error). Ignored when
    /// `RUST_LOG` is set.
    pub fn set_level(&self, level: &str) {
        if self.from_env {
            return;
        }
        let filter = EnvFilter::new(directives(level));
        match self.filter.reload(filter) {
            Ok(()) => tracing::info!(level, "Log level changed"),
            Err(e) => tracing::warn!(error = %e, "Failed to change log level"),
        }
    }
}

fn directives(level: &str) -> String {
    format!("live_listener={level},tower_http={level}")
}
