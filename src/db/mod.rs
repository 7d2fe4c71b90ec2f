//! Routing and connection layer.
//!
//! - Provider contracts and the bundled sqlx-backed provider
//! - Per-unit-of-work routing context
//! - The process-wide router with master/replica topology
//! - Checked-out connection handles with drain-aware bookkeeping

pub mod context;
pub mod handle;
pub mod pool;
pub mod provider;
pub mod router;

pub use context::{DEFAULT_KEY, RoutingContext};
pub use handle::{ConnectionHandle, ProviderWrapper};
pub use pool::{DbPool, SqlxProvider, build_router};
pub use provider::{Connection, ConnectionProvider};
pub use router::{DataSourceRouter, RouterBuilder};
