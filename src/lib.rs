//! Live configuration and self-healing network listeners.
//!
//! A [`ConfigHandler`] keeps a typed configuration in step with a JSON file:
//! it re-reads the file when it changes, quarantines unreadable content,
//! lets subscribers veto changes, holds changes while frozen, and can undo
//! the last commit. A [`Listener`] bootstraps a server from the handler's
//! current value, restarts it whenever the value changes, and rolls the
//! configuration back when the new value cannot be served.
//!
//! ```text
//! config file ──▶ ConfigHandler ──Modified/Restored──▶ Listener ──▶ RunningServer
//!                      ▲                                   │
//!                      └────────── restore() on failure ◀──┘
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{ConfigError, ConfigHandler, Configuration, ServiceConfig};
pub use lifecycle::Shutdown;
pub use net::{Listener, ListenerBuilder, ListenerError, ListenerState, ServerSetter};
