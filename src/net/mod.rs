//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigHandler snapshot
//!     → bootstrapper fills a ServerSetter (setter.rs)
//!     → server.rs binds (optional TLS via tls.rs) and serves the router
//!     → listener.rs supervises: restart on Modified/Restored, rollback on failure
//!
//! Listener States:
//!     Idle → Starting → Running → Stopping → Idle | Terminated
//! ```
//!
//! # Design Decisions
//! - A server instance never outlives the setter it was built from
//! - The builder dry-runs the bootstrapper so misconfiguration fails early
//! - TLS is optional and handled transparently

pub mod builder;
pub mod listener;
pub mod server;
pub mod setter;
pub mod tls;

pub use builder::ListenerBuilder;
pub use listener::{Completion, Listener, ListenerError, ListenerState};
pub use setter::{Bootstrapper, Protocol, ProtocolDefinitions, ServerSetter};
