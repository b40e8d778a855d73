//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging level, refresh schedule, metrics → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop listener → Release address → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Re-read the configuration file
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then ambient subsystems, then the listener
//! - A listener that terminates on its own ends the process with its error

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError, StartupOptions};
