//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! config + net subsystems produce:
//!     → logging.rs (structured log events, live log level)
//!     → metrics.rs (commit, rollback and restart counters)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed
//! - Log level follows the configuration file unless `RUST_LOG` is set

pub mod logging;
pub mod metrics;
