//! Routing of operations to named connection providers.
//!
//! The router holds the registry of provider wrappers and the
//! master-to-replicas topology. Both maps are built once at startup and
//! never mutated, so lookups are lock-free. Per-call resolution consults the
//! unit of work's [`RoutingContext`]: writes always target the master key,
//! reads may fan out to a replica with the choice cached ("sticky") for the
//! remainder of the unit of work. Retiring wrappers are treated as absent
//! from selection.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::db::context::{DEFAULT_KEY, RoutingContext};
use crate::db::handle::{ConnectionHandle, ProviderWrapper};
use crate::db::provider::ConnectionProvider;
use crate::error::{DalError, DalResult};

/// Process-wide provider registry and master/replica topology.
#[derive(Debug)]
pub struct DataSourceRouter {
    wrappers: HashMap<String, Arc<ProviderWrapper>>,
    replicas: HashMap<String, Vec<String>>,
}

impl DataSourceRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder {
            wrappers: HashMap::new(),
            replicas: HashMap::new(),
            default_key: None,
        }
    }

    /// Resolve a read to a provider wrapper.
    ///
    /// Slave mode off: the master. Slave mode on: the context's sticky
    /// replica if it is still selectable, otherwise a uniform-random pick
    /// from the master's non-retiring replicas, cached in the context for
    /// the rest of the unit of work. Masters without replicas fall back to
    /// the master itself.
    pub fn resolve_read(&self, cx: &mut RoutingContext) -> DalResult<Arc<ProviderWrapper>> {
        let master = cx.master_key().to_string();
        if !cx.slave_mode() {
            return self.selectable(&master);
        }
        if let Some(sticky) = cx.sticky_slave() {
            match self.wrappers.get(sticky) {
                Some(wrapper) if !wrapper.is_retiring() => return Ok(Arc::clone(wrapper)),
                _ => cx.drop_sticky_slave(),
            }
        }
        match self.pick_slave(&master) {
            Some(slave_key) => {
                debug!(
                    unit_of_work = %cx.id(),
                    master = %master,
                    slave = %slave_key,
                    "Sticky replica selected"
                );
                let wrapper = self.selectable(&slave_key)?;
                cx.set_sticky_slave(slave_key);
                Ok(wrapper)
            }
            None => self.selectable(&master),
        }
    }

    /// Resolve a write: always the master key, slave mode notwithstanding.
    pub fn resolve_write(&self, cx: &RoutingContext) -> DalResult<Arc<ProviderWrapper>> {
        self.selectable(cx.master_key())
    }

    /// Resolve a read and check a connection out of the chosen provider.
    pub async fn checkout_read(&self, cx: &mut RoutingContext) -> DalResult<ConnectionHandle> {
        self.resolve_read(cx)?.checkout().await
    }

    /// Resolve a write and check a connection out of the master.
    pub async fn checkout_write(&self, cx: &RoutingContext) -> DalResult<ConnectionHandle> {
        self.resolve_write(cx)?.checkout().await
    }

    /// Mark a provider retiring: no new checkouts are routed to it, live
    /// handles drain normally, and the wrapped pool is torn down once the
    /// last handle releases.
    pub fn retire(&self, key: &str) -> DalResult<()> {
        match self.wrappers.get(key) {
            Some(wrapper) => {
                wrapper.mark_retiring();
                Ok(())
            }
            None => Err(unknown_key(key)),
        }
    }

    /// Wrapper registered under `key`, for drain observation.
    pub fn wrapper(&self, key: &str) -> Option<&Arc<ProviderWrapper>> {
        self.wrappers.get(key)
    }

    /// Replica keys configured for a master.
    pub fn replica_keys(&self, master: &str) -> &[String] {
        self.replicas.get(master).map(Vec::as_slice).unwrap_or(&[])
    }

    fn selectable(&self, key: &str) -> DalResult<Arc<ProviderWrapper>> {
        let wrapper = self.wrappers.get(key).ok_or_else(|| unknown_key(key))?;
        if wrapper.is_retiring() {
            return Err(DalError::configuration(format!(
                "provider '{}' is retiring and accepts no new checkouts",
                key
            )));
        }
        Ok(Arc::clone(wrapper))
    }

    /// Uniform-random pick among the master's non-retiring replicas. Keys
    /// without a registered provider stay in the candidate set so a
    /// misconfigured topology fails loudly at resolution.
    fn pick_slave(&self, master: &str) -> Option<String> {
        let configured = self.replicas.get(master)?;
        let candidates: Vec<&String> = configured
            .iter()
            .filter(|key| {
                self.wrappers
                    .get(*key)
                    .map(|w| !w.is_retiring())
                    .unwrap_or(true)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }
}

fn unknown_key(key: &str) -> DalError {
    DalError::configuration(format!("no provider for routing key '{}'", key))
}

/// One-shot builder for the immutable router. Any runtime topology change
/// is modeled as building a new router and swapping the `Arc` atomically.
pub struct RouterBuilder {
    wrappers: HashMap<String, Arc<ProviderWrapper>>,
    replicas: HashMap<String, Vec<String>>,
    default_key: Option<String>,
}

impl RouterBuilder {
    /// Register a provider under a routing key.
    pub fn provider(mut self, key: impl Into<String>, provider: impl ConnectionProvider) -> Self {
        let key = key.into();
        let wrapper = Arc::new(ProviderWrapper::new(key.clone(), provider));
        self.wrappers.insert(key, wrapper);
        self
    }

    /// Declare the replicas serving a master's reads.
    pub fn replicas(
        mut self,
        master: impl Into<String>,
        slave_keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.replicas.insert(
            master.into(),
            slave_keys.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Name the provider the well-known default key resolves to. Without
    /// this, a provider must be registered under the default key itself.
    pub fn default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = Some(key.into());
        self
    }

    /// Validate and freeze the topology. The default key must resolve after
    /// initialization; starting silently degraded is not an option.
    pub fn build(self) -> DalResult<DataSourceRouter> {
        let Self {
            mut wrappers,
            mut replicas,
            default_key,
        } = self;
        if wrappers.is_empty() {
            return Err(DalError::configuration("no providers configured"));
        }
        if let Some(default) = default_key {
            let wrapper = wrappers
                .get(&default)
                .ok_or_else(|| {
                    DalError::configuration(format!(
                        "default routing key '{}' has no registered provider",
                        default
                    ))
                })?
                .clone();
            wrappers.entry(DEFAULT_KEY.to_string()).or_insert(wrapper);
            if let Some(slaves) = replicas.get(&default).cloned() {
                replicas.entry(DEFAULT_KEY.to_string()).or_insert(slaves);
            }
        }
        if !wrappers.contains_key(DEFAULT_KEY) {
            return Err(DalError::configuration(format!(
                "no provider resolves the default key '{}'",
                DEFAULT_KEY
            )));
        }
        Ok(DataSourceRouter { wrappers, replicas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::provider::Connection;
    use crate::models::{Row, Value};
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

    #[test]
    fn test_build_requires_a_provider() {
        assert!(matches!(
            DataSourceRouter::builder().build(),
            Err(DalError::Configuration { .. })
        ));
    }

    #[test]
    fn test_build_requires_default_resolution() {
        let result = DataSourceRouter::builder()
            .provider("main", NoopProvider)
            .build();
        assert!(matches!(result, Err(DalError::Configuration { .. })));

        let router = DataSourceRouter::builder()
            .provider("main", NoopProvider)
            .default_key("main")
            .build()
            .unwrap();
        assert!(router.wrapper(DEFAULT_KEY).is_some());
    }

    #[test]
    fn test_default_alias_carries_replicas() {
        let router = DataSourceRouter::builder()
            .provider("main", NoopProvider)
            .provider("main-r0", NoopProvider)
            .replicas("main", ["main-r0"])
            .default_key("main")
            .build()
            .unwrap();
        assert_eq!(router.replica_keys(DEFAULT_KEY), ["main-r0"]);
    }

    #[test]
    fn test_write_targets_master_even_in_slave_mode() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .provider("default-r0", NoopProvider)
            .replicas("default", ["default-r0"])
            .build()
            .unwrap();
        let mut cx = RoutingContext::new();
        cx.enable_slave_mode();
        let wrapper = router.resolve_write(&cx).unwrap();
        assert_eq!(wrapper.key(), "default");
        // The slave-mode flag only steers reads.
        let read = router.resolve_read(&mut cx).unwrap();
        assert_eq!(read.key(), "default-r0");
    }

    #[test]
    fn test_read_without_slave_mode_stays_on_master() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .provider("default-r0", NoopProvider)
            .replicas("default", ["default-r0"])
            .build()
            .unwrap();
        let mut cx = RoutingContext::new();
        assert_eq!(router.resolve_read(&mut cx).unwrap().key(), "default");
        assert!(cx.sticky_slave().is_none());
    }

    #[test]
    fn test_masterless_replica_list_falls_back_to_master() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .build()
            .unwrap();
        let mut cx = RoutingContext::new();
        cx.enable_slave_mode();
        assert_eq!(router.resolve_read(&mut cx).unwrap().key(), "default");
    }

    #[test]
    fn test_unknown_key_is_fatal_at_call_time() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .build()
            .unwrap();
        let cx = RoutingContext::with_master("nowhere");
        assert!(matches!(
            router.resolve_write(&cx),
            Err(DalError::Configuration { .. })
        ));
    }

    #[test]
    fn test_retiring_replica_is_absent_from_selection() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .provider("r0", NoopProvider)
            .provider("r1", NoopProvider)
            .replicas("default", ["r0", "r1"])
            .build()
            .unwrap();
        router.retire("r0").unwrap();
        for _ in 0..20 {
            let mut cx = RoutingContext::new();
            cx.enable_slave_mode();
            assert_eq!(router.resolve_read(&mut cx).unwrap().key(), "r1");
        }
    }

    #[test]
    fn test_sticky_choice_repicks_when_replica_retires() {
        let router = DataSourceRouter::builder()
            .provider("default", NoopProvider)
            .provider("r0", NoopProvider)
            .provider("r1", NoopProvider)
            .replicas("default", ["r0", "r1"])
            .build()
            .unwrap();
        let mut cx = RoutingContext::new();
        cx.enable_slave_mode();
        let first = router.resolve_read(&mut cx).unwrap().key().to_string();
        router.retire(&first).unwrap();
        let second = router.resolve_read(&mut cx).unwrap().key().to_string();
        assert_ne!(first, second);
    }
}
