//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → watcher.rs (filesystem events, debounced) or a manual trigger
//!     → handler.rs reload(): loader.rs parse, quarantine on corruption
//!     → commit: current → previous, new → current (one critical section)
//!     → events.rs Modified / Restored
//!     → listeners restart with the new values
//! ```
//!
//! # Design Decisions
//! - The file is the source of truth; every successful read is reconciled
//!   with the in-memory value
//! - One commit can be undone with `restore()`
//! - Freezing holds file changes until an explicit or scheduled refresh

pub mod events;
pub mod handler;
pub mod loader;
pub mod period;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use events::{ChangeSource, ModificationCanceled, Modified, Modifying, Restored, SubscriptionId};
pub use handler::{ConfigHandler, Configuration, ReloadOutcome};
pub use loader::ConfigError;
pub use period::Period;
pub use schema::{ListenerConfig, ServiceConfig, TlsConfig};
pub use watcher::{ChangeNotifier, FileWatcher, ManualNotifier};
