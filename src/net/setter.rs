//! Server descriptor filled in by a bootstrap function.
//!
//! A fresh [`ServerSetter`] is handed to the bootstrapper before every start
//! attempt and thrown away once the server built from it is torn down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::loader::BoxError;
use crate::config::schema::TlsConfig;
use crate::net::listener::ListenerError;

/// Name used when the bootstrapper does not set one.
pub const DEFAULT_NAME: &str = "listener";

/// Populates a [`ServerSetter`] from a configuration snapshot.
pub type Bootstrapper<T> = Arc<dyn Fn(&T, &mut ServerSetter) -> Result<(), BoxError> + Send + Sync>;

/// Mounts RPC services onto the router handed to it.
pub type ProtocolDefinitions = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Wire protocol served by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Serve `ServerSetter::handler` as is.
    #[default]
    Http,
    /// Serve the router produced by the protocol definitions.
    Rpc,
}

#[derive(Default)]
pub struct ServerSetter {
    /// Human-readable name for diagnostics.
    pub name: String,
    /// `host:port`, or `:port` for all interfaces.
    pub address: String,
    pub protocol: Protocol,
    pub handler: Option<Router>,
    pub tls: Option<TlsConfig>,
}

impl ServerSetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_name(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name.to_string()
        }
    }

    /// Shape checks shared by the builder's dry run and every start.
    pub fn check(&self, has_definitions: bool) -> Result<(), ListenerError> {
        let name = self.display_name();
        if self.address.trim().is_empty() {
            return Err(ListenerError::AddressNotConfigured { name });
        }
        match self.protocol {
            Protocol::Rpc if !has_definitions => Err(ListenerError::Misconfigured(format!(
                "listener {name}: rpc protocol requested without protocol definitions"
            ))),
            Protocol::Http if self.handler.is_none() => Err(ListenerError::Misconfigured(format!(
                "listener {name}: http protocol requested without a handler"
            ))),
            _ => Ok(()),
        }
    }

    /// Resolve the configured address. `:port` binds every interface.
    pub async fn socket_addr(&self) -> Result<SocketAddr, ListenerError> {
        let raw = self.address.trim();
        if raw.is_empty() {
            return Err(ListenerError::AddressNotConfigured { name: self.display_name() });
        }
        let target = if raw.starts_with(':') {
            format!("0.0.0.0{raw}")
        } else {
            raw.to_string()
        };

        let serve_error = |source: io::Error| ListenerError::Serve {
            name: self.display_name(),
            source,
        };
        let mut addrs = tokio::net::lookup_host(target.as_str()).await.map_err(serve_error)?;
        addrs.next().ok_or_else(|| {
            serve_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{raw} resolved to no addresses"),
            ))
        })
    }
}

impl std::fmt::Debug for ServerSetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSetter")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("protocol", &self.protocol)
            .field("handler", &self.handler.is_some())
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_setter(address: &str) -> ServerSetter {
        ServerSetter {
            address: address.into(),
            handler: Some(Router::new()),
            ..ServerSetter::new()
        }
    }

    #[test]
    fn empty_address_is_reported_first() {
        let err = ServerSetter::new().check(false).unwrap_err();
        assert!(matches!(err, ListenerError::AddressNotConfigured { ref name } if name == DEFAULT_NAME));
    }

    #[test]
    fn rpc_requires_definitions() {
        let setter = ServerSetter {
            address: ":1".into(),
            protocol: Protocol::Rpc,
            ..ServerSetter::new()
        };
        assert!(matches!(setter.check(false), Err(ListenerError::Misconfigured(_))));
        assert!(setter.check(true).is_ok());
    }

    #[test]
    fn http_requires_handler() {
        let mut setter = http_setter(":1");
        assert!(setter.check(false).is_ok());
        setter.handler = None;
        assert!(matches!(setter.check(false), Err(ListenerError::Misconfigured(_))));
    }

    #[tokio::test]
    async fn port_shorthand_binds_all_interfaces() {
        let addr = http_setter(":9999").socket_addr().await.unwrap();
        assert_eq!(addr, "0.0.0.0:9999".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn malformed_address_is_a_serve_error() {
        let err = http_setter("invalid::addr").socket_addr().await.unwrap_err();
        assert!(matches!(err, ListenerError::Serve { .. }), "{err}");
    }
}
