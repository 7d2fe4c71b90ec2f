//! Unit-of-work routing state.
//!
//! One `RoutingContext` per logical unit of work (a request, a batch job),
//! created at the start and cleared by the caller's lifecycle hook at the
//! end. The context is never shared between concurrent units of work; every
//! routed call borrows it mutably, so accidental sharing fails to compile.
//! Platforms that reuse worker tasks across units of work must call
//! [`RoutingContext::clear`] at the boundary or routing state leaks into the
//! next unit of work.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::Value;

/// Well-known key the context targets until told otherwise.
pub const DEFAULT_KEY: &str = "default";

/// Mutable routing state scoped to one unit of work.
#[derive(Debug)]
pub struct RoutingContext {
    master_key: String,
    slave_mode: bool,
    sticky_slave: Option<String>,
    params: HashMap<String, Value>,
    id: Uuid,
}

impl RoutingContext {
    /// Fresh context with INIT defaults: default master, slave mode off.
    pub fn new() -> Self {
        Self {
            master_key: DEFAULT_KEY.to_string(),
            slave_mode: false,
            sticky_slave: None,
            params: HashMap::new(),
            id: Uuid::new_v4(),
        }
    }

    /// Fresh context targeting a named master.
    pub fn with_master(master_key: impl Into<String>) -> Self {
        let mut cx = Self::new();
        cx.set_master(master_key);
        cx
    }

    /// Unit-of-work id, carried into tracing output.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    /// Retarget the master. Clears any sticky replica choice made under the
    /// previous master.
    pub fn set_master(&mut self, master_key: impl Into<String>) {
        self.master_key = master_key.into();
        self.sticky_slave = None;
    }

    pub fn slave_mode(&self) -> bool {
        self.slave_mode
    }

    /// Route subsequent reads in this unit of work to a replica.
    pub fn enable_slave_mode(&mut self) {
        self.slave_mode = true;
    }

    pub(crate) fn sticky_slave(&self) -> Option<&str> {
        self.sticky_slave.as_deref()
    }

    pub(crate) fn set_sticky_slave(&mut self, key: String) {
        self.sticky_slave = Some(key);
    }

    pub(crate) fn drop_sticky_slave(&mut self) {
        self.sticky_slave = None;
    }

    /// Attach an opaque routing hint (e.g. a shard id).
    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    /// Read back a routing hint.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Unit-of-work boundary hook: discard all state and revert to INIT
    /// defaults under a fresh unit-of-work id.
    pub fn clear(&mut self) {
        self.master_key = DEFAULT_KEY.to_string();
        self.slave_mode = false;
        self.sticky_slave = None;
        self.params.clear();
        self.id = Uuid::new_v4();
    }
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_defaults() {
        let cx = RoutingContext::new();
        assert_eq!(cx.master_key(), DEFAULT_KEY);
        assert!(!cx.slave_mode());
        assert!(cx.sticky_slave().is_none());
    }

    #[test]
    fn test_clear_reverts_to_init() {
        let mut cx = RoutingContext::with_master("shard-3");
        cx.enable_slave_mode();
        cx.set_sticky_slave("shard-3-replica-1".to_string());
        cx.set_param("tenant", 42i64);
        let old_id = cx.id();

        cx.clear();
        assert_eq!(cx.master_key(), DEFAULT_KEY);
        assert!(!cx.slave_mode());
        assert!(cx.sticky_slave().is_none());
        assert!(cx.param("tenant").is_none());
        assert_ne!(cx.id(), old_id);
    }

    #[test]
    fn test_retargeting_master_drops_sticky_choice() {
        let mut cx = RoutingContext::new();
        cx.enable_slave_mode();
        cx.set_sticky_slave("default-replica-0".to_string());
        cx.set_master("shard-1");
        assert!(cx.sticky_slave().is_none());
    }
}
