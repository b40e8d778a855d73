//! HTTP application subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceConfig snapshot
//!     → server.rs bootstrap(): validate, build router, fill ServerSetter
//!     → rpc.rs definitions(): mount /rpc when the protocol is `rpc`
//!     → net::listener serves the result
//! ```

pub mod rpc;
pub mod server;

pub use server::{bootstrap, build_router, AppState};
