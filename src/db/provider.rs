//! Connection provider contracts.
//!
//! Providers are opaque factories for live connections; pooling internals
//! (timeouts, physical reconnects, health checks) stay behind the trait.
//! This layer wraps whatever provider it is given and never retries on its
//! behalf: provider failures propagate unchanged, with routing context
//! attached by the handle layer.

use async_trait::async_trait;

use crate::error::DalResult;
use crate::models::{Row, Value};

/// A live database connection checked out from a provider.
///
/// Dropping a connection returns it to its provider; there is no explicit
/// close call. Batch calls run all parameter sets on this one connection and
/// their partial-failure semantics are provider-defined.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement, returning the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DalResult<u64>;

    /// Execute an insert, returning the provider-generated key. Zero or
    /// negative means "no key generated".
    async fn execute_returning_key(&mut self, sql: &str, params: &[Value]) -> DalResult<i64>;

    /// Execute one statement once per parameter set, returning per-set
    /// affected-row counts.
    async fn execute_batch(&mut self, sql: &str, param_sets: &[Vec<Value>]) -> DalResult<Vec<u64>>;

    /// Batch insert returning the generated keys in input order. Providers
    /// that cannot report keys may return fewer (or zero) entries.
    async fn execute_batch_returning_keys(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> DalResult<Vec<i64>>;

    /// Run a select, returning raw rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> DalResult<Vec<Row>>;
}

/// An opaque source of connections, usually a pool.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Check out a live connection.
    async fn acquire(&self) -> DalResult<Box<dyn Connection>>;

    /// Tear down the underlying pool. Called once a retiring provider has
    /// drained; default is a no-op for providers with nothing to release.
    async fn shutdown(&self) {}
}
