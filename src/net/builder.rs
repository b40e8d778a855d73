//! Listener construction.
//!
//! `build()` runs the bootstrap function once against the current
//! configuration with logging muted, so a listener that could never start is
//! rejected before it exists.

use std::sync::Arc;

use axum::Router;
use tracing::subscriber::NoSubscriber;

use crate::config::handler::{ConfigHandler, Configuration};
use crate::config::loader::BoxError;
use crate::net::listener::{Listener, ListenerError};
use crate::net::setter::{Bootstrapper, ProtocolDefinitions, ServerSetter};

pub struct ListenerBuilder<T: Configuration> {
    config: Arc<ConfigHandler<T>>,
    bootstrapper: Option<Bootstrapper<T>>,
    definitions: Option<ProtocolDefinitions>,
}

impl<T: Configuration> ListenerBuilder<T> {
    pub fn new(config: Arc<ConfigHandler<T>>) -> Self {
        Self {
            config,
            bootstrapper: None,
            definitions: None,
        }
    }

    /// Required. Called with a configuration snapshot before every start.
    pub fn bootstrapper<F>(mut self, bootstrap: F) -> Self
    where
        F: Fn(&T, &mut ServerSetter) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.bootstrapper = Some(Arc::new(bootstrap));
        self
    }

    /// Required when the bootstrapper selects the RPC protocol.
    pub fn protocol_definitions<F>(mut self, definitions: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.definitions = Some(Arc::new(definitions));
        self
    }

    pub fn build(self) -> Result<Listener<T>, ListenerError> {
        let bootstrapper = self
            .bootstrapper
            .ok_or_else(|| ListenerError::Misconfigured("no bootstrap function set".into()))?;

        let snapshot = self.config.get_config();
        let mut setter = ServerSetter::new();
        tracing::subscriber::with_default(NoSubscriber::default(), || {
            bootstrapper(&snapshot, &mut setter)
        })
        .map_err(|err| ListenerError::Misconfigured(format!("bootstrap dry run failed: {err}")))?;
        setter.check(self.definitions.is_some())?;

        let name = setter.display_name();
        tracing::debug!(listener = %name, address = %setter.address, "Listener dry run passed");
        Ok(Listener::new(name, self.config, bootstrapper, self.definitions))
    }
}
