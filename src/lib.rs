//! db-router
//!
//! A data-access layer that maps typed records to relational tables through
//! per-type compiled descriptors and routes every operation across named
//! connection providers: master/replica split, sticky replica reads, and
//! graceful provider retirement.
//!
//! Read-your-writes is NOT guaranteed across the master/replica boundary;
//! sticky selection only pins all reads of one unit of work to the same
//! replica. That weak-consistency tradeoff is deliberate.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod schema;

pub use config::{DatabaseKind, PoolOptions, ProviderSpec, RouterConfig};
pub use db::{
    Connection, ConnectionProvider, DEFAULT_KEY, DataSourceRouter, RoutingContext, SqlxProvider,
    build_router,
};
pub use error::{DalError, DalResult};
pub use models::{Row, Value};
pub use query::{Query, UpdateOutcome};
pub use schema::{ColumnSpec, Entity, EntityMeta, InsertMode, TableDescriptor};
