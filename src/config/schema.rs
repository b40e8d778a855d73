//! Configuration schema for the `live-listener` service.
//!
//! This is the document the binary keeps in its configuration file. Library
//! users bring their own type; anything implementing
//! [`Configuration`](crate::config::Configuration) works.

use serde::{Deserialize, Serialize};

use crate::config::period::Period;
use crate::net::setter::Protocol;

/// Root configuration for the service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, protocol, TLS).
    pub listener: ListenerConfig,

    /// Scheduled application of changes held while frozen.
    pub refresh: RefreshConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Body returned by `GET /`.
    pub greeting: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            refresh: RefreshConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            greeting: "hello from live-listener".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Name used in logs and metrics.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8080" or ":8080").
    pub bind_address: String,

    /// `http` serves the application router, `rpc` the RPC definitions.
    pub protocol: Protocol,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            protocol: Protocol::Http,
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RefreshConfig {
    pub enabled: bool,
    pub period: Period,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
