//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the configuration file (created from defaults when missing)
//! - Initialize subsystems in dependency order: logging level, refresh
//!   schedule, metrics, listener
//! - Keep the log level and refresh schedule in step with committed changes
//! - Run until the listener terminates or shutdown is requested
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::config::handler::ConfigHandler;
use crate::config::loader::ConfigError;
use crate::config::schema::ServiceConfig;
use crate::config::watcher::{ChangeNotifier, FileWatcher, ManualNotifier, NotifierError};
use crate::http;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::{ListenerBuilder, ListenerError};
use crate::observability::logging::LoggingHandle;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot watch configuration file: {0}")]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("metrics endpoint {address}: {reason}")]
    Metrics { address: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// Watch the file for changes. Without it, only SIGHUP re-reads it.
    pub watch: bool,
}

/// Run the service until the listener terminates or `shutdown` fires.
pub async fn run(
    options: StartupOptions,
    shutdown: Shutdown,
    logging: Option<LoggingHandle>,
) -> Result<(), StartupError> {
    let (notifier, on_reload) = reload_source(&options)?;
    let handler = ConfigHandler::load(
        &options.config_path,
        ServiceConfig::default(),
        notifier.as_ref(),
    )?;
    let config = handler.get_config();

    tracing::info!(
        path = %options.config_path.display(),
        listener = %config.listener.name,
        bind_address = %config.listener.bind_address,
        watch = options.watch,
        "Configuration loaded"
    );

    if let Some(logging) = &logging {
        logging.set_level(&config.observability.log_level);
    }
    if config.refresh.enabled {
        handler.set_refresh_time(config.refresh.period);
    }
    follow_ambient_settings(&handler, logging);

    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr = address.parse::<SocketAddr>().map_err(|e| StartupError::Metrics {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        metrics::init_metrics(addr).map_err(|e| StartupError::Metrics {
            address: address.clone(),
            reason: e.to_string(),
        })?;
    }

    let listener = ListenerBuilder::new(Arc::clone(&handler))
        .bootstrapper(http::bootstrap)
        .protocol_definitions(http::rpc::definitions)
        .build()?;

    let signals = signals::spawn_signal_handlers(shutdown.clone(), on_reload);
    let mut completion = listener.start().await?;

    let result = tokio::select! {
        outcome = &mut completion => outcome.map_err(StartupError::from),
        _ = shutdown.wait() => listener.stop().await.map_err(StartupError::from),
    };

    signals.abort();
    handler.cancel_refresh_time();
    drop(notifier);
    result
}

type ReloadTrigger = Box<dyn Fn() + Send + Sync>;

/// The change notifier for the configuration file and the SIGHUP action.
fn reload_source(
    options: &StartupOptions,
) -> Result<(Arc<dyn ChangeNotifier>, ReloadTrigger), StartupError> {
    if options.watch {
        let watcher = Arc::new(FileWatcher::new(&options.config_path)?);
        let notifier: Arc<dyn ChangeNotifier> = watcher.clone();
        let trigger: ReloadTrigger = Box::new(move || watcher.trigger());
        Ok((notifier, trigger))
    } else {
        let manual = Arc::new(ManualNotifier::new());
        let notifier: Arc<dyn ChangeNotifier> = manual.clone();
        // notify() re-reads the file on the calling thread.
        let trigger: ReloadTrigger = Box::new(move || {
            let manual = Arc::clone(&manual);
            tokio::task::spawn_blocking(move || manual.notify());
        });
        Ok((notifier, trigger))
    }
}

/// Apply log level and refresh schedule changes as they are committed or
/// rolled back.
fn follow_ambient_settings(handler: &Arc<ConfigHandler<ServiceConfig>>, logging: Option<LoggingHandle>) {
    let weak: Weak<ConfigHandler<ServiceConfig>> = Arc::downgrade(handler);
    let ambient = Arc::new(Ambient { handler: weak, logging });

    let on_modified = Arc::clone(&ambient);
    handler
        .events()
        .on_modified(move |event| on_modified.apply(&event.previous, &event.current));
    handler
        .events()
        .on_restored(move |event| ambient.apply(&event.discarded, &event.restored));
}

struct Ambient {
    handler: Weak<ConfigHandler<ServiceConfig>>,
    logging: Option<LoggingHandle>,
}

impl Ambient {
    fn apply(&self, previous: &ServiceConfig, current: &ServiceConfig) {
        if previous.observability.log_level != current.observability.log_level {
            if let Some(logging) = &self.logging {
                logging.set_level(&current.observability.log_level);
            }
        }

        if previous.refresh != current.refresh {
            if let Some(handler) = self.handler.upgrade() {
                if current.refresh.enabled {
                    handler.set_refresh_time(current.refresh.period);
                } else {
                    handler.cancel_refresh_time();
                    tracing::info!("Configuration refresh schedule cancelled");
                }
            }
        }
    }
}
