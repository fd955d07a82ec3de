//! Experiment node definitions
//!
//! A node binds a work unit to its configuration variants:
//! - [`ExperimentFn`]: the work unit, async or off-loaded blocking
//! - [`NodeSpec`]: builder describing name, configs, bindings and calls
//! - [`Node`]: the registered, read-only form
//!
//! Bindings map a parameter to a dotted path into a variant. They are
//! checked against every variant at registration so a typo fails before
//! anything runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use trellis_config::{expand_all, BindPath, ConfigError, ConfigSource, ConfigSpec, Variant};

use crate::context::ExperimentContext;
use crate::error::ExperimentError;
use crate::strategy::{BranchStrategy, StrategyKind, StrategyRegistry};
use crate::types::{Args, BindTarget, Failure, NodeKey, PANIC_KIND};

/// Future returned by a work unit
pub type WorkFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Input of one work-unit call
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Caller args with bound configuration filled in
    pub args: Args,
    /// Context for nested calls
    pub ctx: ExperimentContext,
}

/// A callable unit of work
pub trait ExperimentFn: Send + Sync {
    /// Run once
    fn call(&self, invocation: Invocation) -> WorkFuture;
}

struct AsyncFn<F>(F);

impl<F, Fut> ExperimentFn for AsyncFn<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, invocation: Invocation) -> WorkFuture {
        (self.0)(invocation).boxed()
    }
}

struct BlockingFn<F>(Arc<F>);

impl<F> ExperimentFn for BlockingFn<F>
where
    F: Fn(Invocation) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn call(&self, invocation: Invocation) -> WorkFuture {
        let f = Arc::clone(&self.0);
        async move {
            match tokio::task::spawn_blocking(move || f(invocation)).await {
                Ok(result) => result,
                Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                Err(join) => Err(Failure::new(PANIC_KIND, join.to_string()).into()),
            }
        }
        .boxed()
    }
}

/// Wrap an async closure as a work unit
pub fn node_fn<F, Fut>(f: F) -> Arc<dyn ExperimentFn>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(AsyncFn(f))
}

/// Wrap a synchronous closure as a work unit run on the blocking pool
///
/// Nested nodes are reached through [`ExperimentContext::call_blocking`].
pub fn blocking_fn<F>(f: F) -> Arc<dyn ExperimentFn>
where
    F: Fn(Invocation) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(BlockingFn(Arc::new(f)))
}

#[derive(Clone)]
enum StrategyChoice {
    Kind(StrategyKind),
    Named(String),
    Custom(Arc<dyn BranchStrategy>),
}

/// Builder for a node registration
pub struct NodeSpec {
    name: String,
    namespace: Option<String>,
    func: Arc<dyn ExperimentFn>,
    specs: Vec<ConfigSpec>,
    sources: Vec<Box<dyn ConfigSource>>,
    variants: Vec<Variant>,
    bindings: Vec<(BindTarget, BindPath)>,
    calls: Vec<String>,
    strategy: StrategyChoice,
    require_configs: bool,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("specs", &self.specs.len())
            .field("variants", &self.variants.len())
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl NodeSpec {
    /// Create spec for a work unit
    #[must_use]
    pub fn new(name: impl Into<String>, func: Arc<dyn ExperimentFn>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            func,
            specs: Vec::new(),
            sources: Vec::new(),
            variants: Vec::new(),
            bindings: Vec::new(),
            calls: Vec::new(),
            strategy: StrategyChoice::Kind(StrategyKind::default()),
            require_configs: false,
        }
    }

    /// Set namespace, making the key `namespace::name`
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a configuration spec to expand
    #[inline]
    #[must_use]
    pub fn with_config(mut self, spec: ConfigSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Add several configuration specs
    #[inline]
    #[must_use]
    pub fn with_configs(mut self, specs: impl IntoIterator<Item = ConfigSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Add a configuration source, loaded at registration
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Add already-concrete variants
    #[inline]
    #[must_use]
    pub fn with_variants(mut self, variants: impl IntoIterator<Item = Variant>) -> Self {
        self.variants.extend(variants);
        self
    }

    /// Bind a named parameter to a config path (`""` for the whole variant)
    #[inline]
    #[must_use]
    pub fn bind(mut self, param: impl Into<String>, path: &str) -> Self {
        self.bindings
            .push((BindTarget::Name(param.into()), BindPath::from(path)));
        self
    }

    /// Bind a positional parameter to a config path
    #[inline]
    #[must_use]
    pub fn bind_position(mut self, index: usize, path: &str) -> Self {
        self.bindings
            .push((BindTarget::Position(index), BindPath::from(path)));
        self
    }

    /// Declare a node this work unit may call, by short name or key
    #[inline]
    #[must_use]
    pub fn calls(mut self, name: impl Into<String>) -> Self {
        self.calls.push(name.into());
        self
    }

    /// Use a built-in strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = StrategyChoice::Kind(kind);
        self
    }

    /// Use a strategy registered under `name`
    #[inline]
    #[must_use]
    pub fn with_strategy_named(mut self, name: impl Into<String>) -> Self {
        self.strategy = StrategyChoice::Named(name.into());
        self
    }

    /// Use a custom strategy instance
    #[inline]
    #[must_use]
    pub fn with_strategy_impl(mut self, strategy: Arc<dyn BranchStrategy>) -> Self {
        self.strategy = StrategyChoice::Custom(strategy);
        self
    }

    /// Disable the synthetic `default` variant for an unconfigured node
    #[inline]
    #[must_use]
    pub fn require_configs(mut self) -> Self {
        self.require_configs = true;
        self
    }

    /// Node key this spec registers under
    #[must_use]
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.namespace.as_deref(), &self.name)
    }

    /// Expand, validate and freeze
    pub(crate) fn build(self, strategies: &StrategyRegistry) -> Result<Node, ExperimentError> {
        let key = self.key();

        let mut variants = expand_all(&self.specs)?;
        for source in &self.sources {
            variants.extend(source.variants()?);
        }
        variants.extend(self.variants);

        if !self.bindings.is_empty() && variants.is_empty() {
            return Err(ConfigError::EmptyExpansion(format!(
                "node '{key}' declares bindings but has no configuration variants"
            ))
            .into());
        }
        for variant in &variants {
            for (target, path) in &self.bindings {
                variant.resolve(path).map_err(|err| {
                    tracing::warn!(node = %key, config_id = %variant.config_id(), %target, "bind path does not resolve");
                    err
                })?;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for variant in &variants {
            if !seen.insert(variant.config_id().clone()) {
                tracing::warn!(node = %key, config_id = %variant.config_id(), "duplicate config_id");
            }
        }

        let strategy = match self.strategy {
            StrategyChoice::Kind(kind) => kind.build(),
            StrategyChoice::Named(name) => strategies.build(&name)?,
            StrategyChoice::Custom(strategy) => strategy,
        };

        let mut bindings = self.bindings;
        bindings.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Node {
            key,
            func: self.func,
            variants: variants.into_iter().map(Arc::new).collect(),
            bindings,
            calls: self.calls,
            resolved: RwLock::new(IndexMap::new()),
            strategy,
            require_configs: self.require_configs,
        })
    }
}

/// A registered node
pub struct Node {
    key: NodeKey,
    func: Arc<dyn ExperimentFn>,
    variants: Vec<Arc<Variant>>,
    bindings: Vec<(BindTarget, BindPath)>,
    calls: Vec<String>,
    resolved: RwLock<IndexMap<String, NodeKey>>,
    strategy: Arc<dyn BranchStrategy>,
    require_configs: bool,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("variants", &self.variants.len())
            .field("calls", &self.calls)
            .field("strategy", &self.strategy.name())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Get node key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Registered variants
    #[inline]
    #[must_use]
    pub fn variants(&self) -> &[Arc<Variant>] {
        &self.variants
    }

    /// Variants this node contributes to the case product
    ///
    /// An unconfigured node contributes the synthetic `default` variant
    /// unless it was registered with `require_configs`.
    #[must_use]
    pub fn axis(&self) -> Vec<Arc<Variant>> {
        if self.variants.is_empty() && !self.require_configs {
            vec![Arc::new(Variant::synthetic_default())]
        } else {
            self.variants.clone()
        }
    }

    /// Declared inner-call names
    #[inline]
    #[must_use]
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Resolved inner calls, in declaration order
    #[must_use]
    pub fn resolved_calls(&self) -> Vec<NodeKey> {
        let resolved = self.resolved.read();
        self.calls
            .iter()
            .filter_map(|name| resolved.get(name).cloned())
            .collect()
    }

    /// Resolved target of a declared call name
    #[must_use]
    pub fn resolve_call(&self, name: &str) -> Option<NodeKey> {
        self.resolved.read().get(name).cloned()
    }

    /// Declared names not yet resolved
    pub(crate) fn unresolved_calls(&self) -> Vec<String> {
        let resolved = self.resolved.read();
        self.calls
            .iter()
            .filter(|name| !resolved.contains_key(*name))
            .cloned()
            .collect()
    }

    pub(crate) fn link(&self, name: &str, target: NodeKey) {
        self.resolved.write().insert(name.to_string(), target);
    }

    /// Default strategy of this node
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> &Arc<dyn BranchStrategy> {
        &self.strategy
    }

    /// Fill bound parameters from `variant` into `args`
    ///
    /// # Errors
    /// Returns [`ConfigError::UnresolvedBindPath`] if a path does not resolve.
    pub fn bind(&self, variant: &Variant, mut args: Args) -> Result<Args, ConfigError> {
        for (target, path) in &self.bindings {
            args.bind(target, variant.resolve(path)?);
        }
        Ok(args)
    }

    pub(crate) fn call(&self, invocation: Invocation) -> WorkFuture {
        self.func.call(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_config::Dynamic;

    fn echo() -> Arc<dyn ExperimentFn> {
        node_fn(|inv: Invocation| async move { anyhow::Ok(inv.args.snapshot()) })
    }

    #[test]
    fn build_expands_configs() {
        let node = NodeSpec::new("n", echo())
            .with_config(ConfigSpec::new().dynamic("model", Dynamic::of(["a", "b"])))
            .with_variants([Variant::with_id("extra", serde_json::Map::new())])
            .build(&StrategyRegistry::with_defaults())
            .unwrap();
        assert_eq!(node.variants().len(), 3);
        assert_eq!(node.variants()[2].config_id(), &"extra");
        assert_eq!(node.strategy().kind(), Some(StrategyKind::Single));
    }

    #[test]
    fn unconfigured_node_gets_default_variant() {
        let node = NodeSpec::new("n", echo())
            .build(&StrategyRegistry::with_defaults())
            .unwrap();
        let axis = node.axis();
        assert_eq!(axis.len(), 1);
        assert_eq!(axis[0].config_id(), &"default");

        let strict = NodeSpec::new("n", echo())
            .require_configs()
            .build(&StrategyRegistry::with_defaults())
            .unwrap();
        assert!(strict.axis().is_empty());
    }

    #[test]
    fn bad_bind_path_fails_registration() {
        let err = NodeSpec::new("n", echo())
            .with_config(ConfigSpec::new().nested("llm", ConfigSpec::new().literal("model", "m")))
            .bind("model", "llm.modle")
            .build(&StrategyRegistry::with_defaults())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("modle"));
    }

    #[test]
    fn bindings_without_variants_rejected() {
        let err = NodeSpec::new("n", echo())
            .bind("cfg", "")
            .build(&StrategyRegistry::with_defaults())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn bind_fills_missing_params_only() {
        let node = NodeSpec::new("n", echo())
            .with_config(
                ConfigSpec::new()
                    .literal("config_id", "c")
                    .nested("llm", ConfigSpec::new().literal("model", "m")),
            )
            .bind("model", "llm.model")
            .bind_position(1, "")
            .build(&StrategyRegistry::with_defaults())
            .unwrap();
        let variant = Arc::clone(&node.variants()[0]);

        let args = node.bind(&variant, Args::of(["input"])).unwrap();
        assert_eq!(args.get("model"), Some(&json!("m")));
        assert_eq!(args.arg(1), Some(&json!({"llm": {"model": "m"}, "config_id": "c"})));

        let args = node
            .bind(&variant, Args::of(["input"]).with_named("model", "override"))
            .unwrap();
        assert_eq!(args.get("model"), Some(&json!("override")));
    }

    #[test]
    fn unknown_strategy_name_rejected() {
        let err = NodeSpec::new("n", echo())
            .with_strategy_named("does_not_exist")
            .build(&StrategyRegistry::with_defaults())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
