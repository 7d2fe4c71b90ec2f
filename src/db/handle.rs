//! Provider wrappers and checked-out connection handles.
//!
//! Every named provider is held behind a [`ProviderWrapper`] that tracks the
//! number of outstanding handles and a retiring flag. Marking a wrapper
//! retiring refuses new checkouts but leaves live handles alone: they keep
//! operating until released individually, and once the counter reaches zero
//! the wrapped provider is torn down. That is the hot-swap path for
//! replacing a physical pool without interrupting in-flight work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use crate::db::provider::{Connection, ConnectionProvider};
use crate::error::{DalError, DalResult};
use crate::models::{Row, Value};

/// A named provider plus its outstanding-handle bookkeeping.
pub struct ProviderWrapper {
    key: String,
    provider: Box<dyn ConnectionProvider>,
    /// Count of live handles. Retirement teardown waits for zero.
    live_handles: AtomicUsize,
    retiring: AtomicBool,
}

impl ProviderWrapper {
    pub fn new(key: impl Into<String>, provider: impl ConnectionProvider) -> Self {
        Self {
            key: key.into(),
            provider: Box::new(provider),
            live_handles: AtomicUsize::new(0),
            retiring: AtomicBool::new(false),
        }
    }

    /// Routing key this wrapper is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current count of outstanding handles.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::Acquire)
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::Acquire)
    }

    /// Refuse new checkouts; existing handles drain normally.
    pub fn mark_retiring(&self) {
        self.retiring.store(true, Ordering::Release);
        info!(routing_key = %self.key, "Provider marked retiring");
    }

    /// Check out a connection, incrementing the live-handle counter.
    pub async fn checkout(self: &Arc<Self>) -> DalResult<ConnectionHandle> {
        if self.is_retiring() {
            return Err(DalError::configuration(format!(
                "provider '{}' is retiring and accepts no new checkouts",
                self.key
            )));
        }
        let conn = self.provider.acquire().await?;
        self.live_handles.fetch_add(1, Ordering::AcqRel);
        debug!(
            routing_key = %self.key,
            live_handles = self.live_handles(),
            "Checked out connection"
        );
        Ok(ConnectionHandle {
            conn: Some(conn),
            owner: Arc::clone(self),
        })
    }

    /// Decrement the counter on handle release. Saturates at 0; an
    /// underflow attempt means an extra release and is logged.
    fn release(self: &Arc<Self>) {
        let result = self
            .live_handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        if let Ok(prev) = result {
            if prev == 0 {
                warn!(routing_key = %self.key, "Live-handle underflow - extra release call");
            }
        }
        if self.is_retiring() && self.live_handles() == 0 {
            // Drained: tear the pool down off the release path. Outside a
            // runtime (process teardown) the provider drops with the wrapper.
            let owner = Arc::clone(self);
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    owner.provider.shutdown().await;
                    info!(routing_key = %owner.key, "Retired provider drained and shut down");
                });
            }
        }
    }
}

impl std::fmt::Debug for ProviderWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderWrapper")
            .field("key", &self.key)
            .field("live_handles", &self.live_handles())
            .field("retiring", &self.is_retiring())
            .finish()
    }
}

/// RAII handle for one checked-out connection.
///
/// Releases the owner's counter on drop. All statement execution funnels
/// through here so provider failures are re-raised with the statement shape
/// and the routing key that was in effect.
pub struct ConnectionHandle {
    conn: Option<Box<dyn Connection>>,
    owner: Arc<ProviderWrapper>,
}

impl ConnectionHandle {
    /// Routing key of the owning provider.
    pub fn routing_key(&self) -> &str {
        self.owner.key()
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> DalResult<u64> {
        match self.conn.as_mut() {
            Some(conn) => conn
                .execute(sql, params)
                .await
                .map_err(|e| contextualize(e, sql, self.owner.key())),
            None => Err(released()),
        }
    }

    pub async fn execute_returning_key(&mut self, sql: &str, params: &[Value]) -> DalResult<i64> {
        match self.conn.as_mut() {
            Some(conn) => conn
                .execute_returning_key(sql, params)
                .await
                .map_err(|e| contextualize(e, sql, self.owner.key())),
            None => Err(released()),
        }
    }

    pub async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> DalResult<Vec<u64>> {
        match self.conn.as_mut() {
            Some(conn) => conn
                .execute_batch(sql, param_sets)
                .await
                .map_err(|e| contextualize(e, sql, self.owner.key())),
            None => Err(released()),
        }
    }

    pub async fn execute_batch_returning_keys(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> DalResult<Vec<i64>> {
        match self.conn.as_mut() {
            Some(conn) => conn
                .execute_batch_returning_keys(sql, param_sets)
                .await
                .map_err(|e| contextualize(e, sql, self.owner.key())),
            None => Err(released()),
        }
    }

    pub async fn query(&mut self, sql: &str, params: &[Value]) -> DalResult<Vec<Row>> {
        match self.conn.as_mut() {
            Some(conn) => conn
                .query(sql, params)
                .await
                .map_err(|e| contextualize(e, sql, self.owner.key())),
            None => Err(released()),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        // Return the connection to its provider before the counter drops.
        self.conn = None;
        self.owner.release();
    }
}

/// Attach statement shape and routing key to a provider-side failure.
fn contextualize(err: DalError, sql: &str, routing_key: &str) -> DalError {
    match err {
        DalError::Provider { message, .. } => DalError::provider(message, sql, routing_key),
        other => DalError::provider(other.to_string(), sql, routing_key),
    }
}

fn released() -> DalError {
    DalError::connection("connection handle already released")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopConnection;

    #[async_trait]
    impl Connection for NoopConnection {
        async fn execute(&mut self, _sql: &str, _params: &[Value]) -> DalResult<u64> {
            Ok(1)
        }
        async fn execute_returning_key(&mut self, _sql: &str, _params: &[Value]) -> DalResult<i64> {
            Ok(0)
        }
        async fn execute_batch(
            &mut self,
            _sql: &str,
            param_sets: &[Vec<Value>],
        ) -> DalResult<Vec<u64>> {
            Ok(vec![1; param_sets.len()])
        }
        async fn execute_batch_returning_keys(
            &mut self,
            _sql: &str,
            _param_sets: &[Vec<Value>],
        ) -> DalResult<Vec<i64>> {
            Ok(vec![])
        }
        async fn query(&mut self, _sql: &str, _params: &[Value]) -> DalResult<Vec<Row>> {
            Ok(vec![])
        }
    }

    struct NoopProvider;

    #[async_trait]
    impl ConnectionProvider for NoopProvider {
        async fn acquire(&self) -> DalResult<Box<dyn Connection>> {
            Ok(Box::new(NoopConnection))
        }
    }

    #[tokio::test]
    async fn test_counter_tracks_checkout_and_release() {
        let wrapper = Arc::new(ProviderWrapper::new("default", NoopProvider));
        assert_eq!(wrapper.live_handles(), 0);

        let first = wrapper.checkout().await.unwrap();
        let second = wrapper.checkout().await.unwrap();
        assert_eq!(wrapper.live_handles(), 2);

        drop(first);
        assert_eq!(wrapper.live_handles(), 1);
        drop(second);
        assert_eq!(wrapper.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_retiring_refuses_new_checkouts_but_drains_existing() {
        let wrapper = Arc::new(ProviderWrapper::new("default", NoopProvider));
        let mut held = wrapper.checkout().await.unwrap();

        wrapper.mark_retiring();
        assert!(matches!(
            wrapper.checkout().await,
            Err(DalError::Configuration { .. })
        ));

        // The outstanding handle still works.
        assert_eq!(held.execute("update t set a=?", &[]).await.unwrap(), 1);
        drop(held);
        assert_eq!(wrapper.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_gains_statement_and_key() {
        struct FailingConnection;

        #[async_trait]
        impl Connection for FailingConnection {
            async fn execute(&mut self, _sql: &str, _params: &[Value]) -> DalResult<u64> {
                Err(DalError::provider("duplicate key", "", ""))
            }
            async fn execute_returning_key(
                &mut self,
                _sql: &str,
                _params: &[Value],
            ) -> DalResult<i64> {
                unreachable!()
            }
            async fn execute_batch(
                &mut self,
                _sql: &str,
                _param_sets: &[Vec<Value>],
            ) -> DalResult<Vec<u64>> {
                unreachable!()
            }
            async fn execute_batch_returning_keys(
                &mut self,
                _sql: &str,
                _param_sets: &[Vec<Value>],
            ) -> DalResult<Vec<i64>> {
                unreachable!()
            }
            async fn query(&mut self, _sql: &str, _params: &[Value]) -> DalResult<Vec<Row>> {
                unreachable!()
            }
        }

        struct FailingProvider;

        #[async_trait]
        impl ConnectionProvider for FailingProvider {
            async fn acquire(&self) -> DalResult<Box<dyn Connection>> {
                Ok(Box::new(FailingConnection))
            }
        }

        let wrapper = Arc::new(ProviderWrapper::new("shard-1", FailingProvider));
        let mut handle = wrapper.checkout().await.unwrap();
        let err = handle.execute("insert into t(a) values(?)", &[]).await;
        match err {
            Err(DalError::Provider {
                statement,
                routing_key,
                ..
            }) => {
                assert_eq!(statement, "insert into t(a) values(?)");
                assert_eq!(routing_key, "shard-1");
            }
            other => panic!("expected provider error, got {:?}", other.err()),
        }
    }
}
