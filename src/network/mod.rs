//! Network layer for Pipehook
//!
//! Provides the accept loop with bounded concurrency, routing, response
//! helpers and the two live-view transports.

mod connection_pool;
pub mod http;
pub mod router;
mod server;
mod shutdown;
pub mod sse;
pub mod websocket;

pub use connection_pool::{ConnectionGuard, ConnectionLimiter};
pub use http::ResponseBody;
pub use router::{route, Route};
pub use server::Server;
pub use shutdown::{Shutdown, ShutdownListener};

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
