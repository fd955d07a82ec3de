//! Node registry
//!
//! Holds registered nodes and everything derived from them:
//! - Late binding of declared inner calls, by exact key then short name
//! - Cached case sets, invalidated on every registration
//! - Named strategy factories and per-node strategy overrides
//! - Tracers notified for every experiment and branch span
//!
//! Registries are cheap to clone and share state. [`Registry::global`] is
//! a process-wide instance; tests should create their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;

use crate::enumerate::{enumerate_cases, CaseSet};
use crate::error::ExperimentError;
use crate::node::{Node, NodeSpec};
use crate::runner::{self, Runner};
use crate::strategy::{BranchStrategy, StrategyKind, StrategyRegistry};
use crate::trace::{Tracer, TracerSet};
use crate::types::{Args, NodeKey};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

struct RegistryInner {
    nodes: DashMap<NodeKey, Arc<Node>>,
    order: RwLock<Vec<NodeKey>>,
    cases: DashMap<NodeKey, Arc<CaseSet>>,
    strategies: RwLock<StrategyRegistry>,
    overrides: DashMap<(NodeKey, StrategyKind), Arc<dyn BranchStrategy>>,
    tracers: TracerSet,
}

/// Registered nodes and their shared state
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &*self.inner.order.read())
            .field("strategies", &self.inner.strategies.read().names())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create registry with the built-in strategies
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                nodes: DashMap::new(),
                order: RwLock::new(Vec::new()),
                cases: DashMap::new(),
                strategies: RwLock::new(StrategyRegistry::with_defaults()),
                overrides: DashMap::new(),
                tracers: TracerSet::default(),
            }),
        }
    }

    /// Process-wide registry
    #[must_use]
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Register a node
    ///
    /// Expands its configuration, validates bindings, then resolves any
    /// pending inner calls across the registry.
    ///
    /// # Errors
    /// Returns a configuration error for duplicate keys, invalid specs,
    /// unresolved bind paths or unknown strategy names.
    pub fn register(&self, spec: NodeSpec) -> Result<NodeHandle, ExperimentError> {
        let key = spec.key();
        if self.inner.nodes.contains_key(&key) {
            return Err(ExperimentError::configuration(format!(
                "node '{key}' is already registered"
            )));
        }
        let node = spec.build(&self.inner.strategies.read())?;
        let variants = node.variants().len();

        self.inner.nodes.insert(key.clone(), Arc::new(node));
        self.inner.order.write().push(key.clone());
        self.link_all();
        self.inner.cases.clear();

        tracing::info!(node = %key, variants, "registered experiment node");
        Ok(NodeHandle {
            key,
            registry: self.clone(),
        })
    }

    fn link_all(&self) {
        let order = self.inner.order.read().clone();
        for key in &order {
            let Some(node) = self.node(key) else { continue };
            for name in node.unresolved_calls() {
                if let Some(target) = self.resolve_name(&order, &name) {
                    tracing::debug!(from = %key, to = %target, "resolved inner call");
                    node.link(&name, target);
                }
            }
        }
    }

    fn resolve_name(&self, order: &[NodeKey], name: &str) -> Option<NodeKey> {
        let exact = NodeKey::from(name);
        if self.inner.nodes.contains_key(&exact) {
            return Some(exact);
        }
        order.iter().find(|k| k.short_name() == name).cloned()
    }

    /// Registered node by key
    #[must_use]
    pub fn node(&self, key: &NodeKey) -> Option<Arc<Node>> {
        self.inner.nodes.get(key).map(|n| Arc::clone(n.value()))
    }

    /// Registered node by key or short name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<Node>> {
        let order = self.inner.order.read();
        self.resolve_name(&order, name).and_then(|key| self.node(&key))
    }

    /// Handle for a registered node by key or short name
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<NodeHandle> {
        self.lookup(name).map(|node| NodeHandle {
            key: node.key().clone(),
            registry: self.clone(),
        })
    }

    /// Case set for `key`, enumerated on first use
    ///
    /// # Errors
    /// Returns a configuration error for unknown nodes or an empty product.
    pub fn cases(&self, key: &NodeKey) -> Result<Arc<CaseSet>, ExperimentError> {
        if let Some(cached) = self.inner.cases.get(key) {
            return Ok(Arc::clone(cached.value()));
        }
        let cases = Arc::new(enumerate_cases(key, |k| self.node(k))?);
        self.inner.cases.insert(key.clone(), Arc::clone(&cases));
        Ok(cases)
    }

    /// Add a tracer notified for every span
    pub fn add_tracer(&self, tracer: Arc<dyn Tracer>) {
        self.inner.tracers.add(tracer);
    }

    pub(crate) fn tracers(&self) -> &TracerSet {
        &self.inner.tracers
    }

    /// Register a named strategy factory for later registrations
    pub fn register_strategy<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn BranchStrategy> + Send + Sync + 'static,
    {
        self.inner.strategies.write().register(name, factory);
    }

    /// Registered strategy names, sorted
    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        self.inner
            .strategies
            .read()
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Strategy instance used when a run overrides `key`'s strategy
    ///
    /// One instance per node and kind, so rotation state survives calls.
    pub(crate) fn strategy_for(&self, key: &NodeKey, kind: StrategyKind) -> Arc<dyn BranchStrategy> {
        let node_strategy = self.node(key).map(|n| Arc::clone(n.strategy()));
        if let Some(strategy) = node_strategy.filter(|s| s.kind() == Some(kind)) {
            return strategy;
        }
        Arc::clone(
            self.inner
                .overrides
                .entry((key.clone(), kind))
                .or_insert_with(|| kind.build())
                .value(),
        )
    }

    /// Directed graph of resolved inner calls
    #[must_use]
    pub fn call_graph(&self) -> DiGraph<NodeKey, ()> {
        let order = self.inner.order.read().clone();
        let mut graph = DiGraph::new();
        let indices: HashMap<NodeKey, NodeIndex> = order
            .iter()
            .map(|key| (key.clone(), graph.add_node(key.clone())))
            .collect();
        for key in &order {
            let Some(node) = self.node(key) else { continue };
            for callee in node.resolved_calls() {
                if let (Some(&from), Some(&to)) = (indices.get(key), indices.get(&callee)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        graph
    }

    /// Check if any resolved inner calls form a cycle
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.call_graph())
    }

    /// Registered keys, in registration order
    #[must_use]
    pub fn keys(&self) -> Vec<NodeKey> {
        self.inner.order.read().clone()
    }

    /// Number of registered nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Check if no node is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }
}

/// Callable handle to a registered node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    key: NodeKey,
    registry: Registry,
}

impl NodeHandle {
    /// Node key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Owning registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registered node
    ///
    /// # Errors
    /// Returns a configuration error if the node is gone.
    pub fn node(&self) -> Result<Arc<Node>, ExperimentError> {
        self.registry
            .node(&self.key)
            .ok_or_else(|| ExperimentError::configuration(format!("unknown node '{}'", self.key)))
    }

    /// Runner with default options
    #[must_use]
    pub fn runner(&self) -> Runner {
        runner::run(self)
    }

    /// Top-level call with default options, returning the main output
    ///
    /// # Errors
    /// See [`Runner::start`].
    pub async fn invoke(&self, args: Args) -> Result<Value, ExperimentError> {
        self.runner().start(args).await.map(|outcome| outcome.main_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{node_fn, Invocation};
    use trellis_config::{ConfigSpec, Dynamic};

    fn spec(name: &str, calls: &[&str]) -> NodeSpec {
        let mut spec = NodeSpec::new(
            name,
            node_fn(|_: Invocation| async { anyhow::Ok(Value::Null) }),
        )
        .with_config(ConfigSpec::new().dynamic("config_id", Dynamic::of(["x", "y"])));
        for call in calls {
            spec = spec.calls(*call);
        }
        spec
    }

    #[test]
    fn global_is_shared() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
        assert!(Arc::ptr_eq(&Registry::global().inner, &Registry::global().clone().inner));
    }

    #[test]
    fn duplicate_key_rejected() {
        let registry = Registry::new();
        registry.register(spec("a", &[])).unwrap();
        let err = registry.register(spec("a", &[])).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn late_binding_invalidates_cached_cases() {
        let registry = Registry::new();
        let outer = registry.register(spec("outer", &["inner"])).unwrap();
        assert_eq!(registry.cases(outer.key()).unwrap().len(), 2);

        registry.register(spec("inner", &[])).unwrap();
        assert_eq!(registry.cases(outer.key()).unwrap().len(), 4);
        assert_eq!(
            registry.node(outer.key()).unwrap().resolved_calls(),
            vec![NodeKey::from("inner")]
        );
    }

    #[test]
    fn short_name_lookup_with_namespace() {
        let registry = Registry::new();
        registry
            .register(spec("score", &[]).with_namespace("eval"))
            .unwrap();
        let node = registry.lookup("score").unwrap();
        assert_eq!(node.key().as_str(), "eval::score");
        assert!(registry.lookup("eval::score").is_some());
        assert!(registry.handle("missing").is_none());
    }

    #[test]
    fn call_graph_and_cycles() {
        let registry = Registry::new();
        registry.register(spec("a", &["b"])).unwrap();
        registry.register(spec("b", &["c"])).unwrap();
        registry.register(spec("c", &[])).unwrap();
        let graph = registry.call_graph();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(!registry.has_cycles());

        registry.register(spec("d", &["e"])).unwrap();
        registry.register(spec("e", &["d"])).unwrap();
        assert!(registry.has_cycles());
    }

    #[test]
    fn override_strategy_is_cached_per_node() {
        let registry = Registry::new();
        let handle = registry.register(spec("a", &[])).unwrap();
        let first = registry.strategy_for(handle.key(), StrategyKind::RoundRobin);
        let second = registry.strategy_for(handle.key(), StrategyKind::RoundRobin);
        assert!(Arc::ptr_eq(&first, &second));
        let own = registry.strategy_for(handle.key(), StrategyKind::Single);
        assert!(Arc::ptr_eq(&own, registry.node(handle.key()).unwrap().strategy()));
    }

    #[test]
    fn custom_strategy_names() {
        let registry = Registry::new();
        registry.register_strategy("always_single", || StrategyKind::Single.build());
        assert!(registry.strategy_names().contains(&"always_single".to_string()));
        registry
            .register(spec("a", &[]).with_strategy_named("always_single"))
            .unwrap();
    }
}
