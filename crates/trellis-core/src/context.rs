//! Per-invocation experiment context
//!
//! Every work unit receives an [`ExperimentContext`]. It carries the case
//! the unit runs under, the scope its branch lives in, and the run-wide
//! background set and options. Nested nodes are reached through it:
//! - A callee assigned by the active case runs directly under that case
//! - Any other callee starts its own experiment with its own strategy

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::{execute, main_failure, run_strategy, Background, CaseRun};
use crate::enumerate::ExperimentCase;
use crate::error::ExperimentError;
use crate::registry::{NodeHandle, Registry};
use crate::scope::Scope;
use crate::trace::SpanId;
use crate::types::{Args, NodeKey, RunConfig};

/// Context handed to a running work unit
#[derive(Clone)]
pub struct ExperimentContext {
    registry: Registry,
    scope: Scope,
    case: Option<Arc<ExperimentCase>>,
    node: Option<NodeKey>,
    span: Option<SpanId>,
    on_default_path: bool,
    background: Background,
    config: Arc<RunConfig>,
}

impl fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("node", &self.node)
            .field("case", &self.case.as_ref().map(|c| c.index()))
            .field("default", &self.on_default_path)
            .finish_non_exhaustive()
    }
}

impl ExperimentContext {
    pub(crate) fn root(
        registry: Registry,
        scope: Scope,
        background: Background,
        config: RunConfig,
    ) -> Self {
        Self {
            registry,
            scope,
            case: None,
            node: None,
            span: None,
            on_default_path: true,
            background,
            config: Arc::new(config),
        }
    }

    pub(crate) fn enter(
        &self,
        node: NodeKey,
        case: Arc<ExperimentCase>,
        scope: Scope,
        span: SpanId,
        is_default: bool,
    ) -> Self {
        Self {
            registry: self.registry.clone(),
            scope,
            case: Some(case),
            node: Some(node),
            span: Some(span),
            on_default_path: is_default,
            background: self.background.clone(),
            config: Arc::clone(&self.config),
        }
    }

    pub(crate) fn with_span(&self, span: SpanId) -> Self {
        Self {
            span: Some(span),
            ..self.clone()
        }
    }

    /// Registry the run belongs to
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Scope new branches are attached under
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Active case, `None` outside any branch
    #[inline]
    #[must_use]
    pub fn case(&self) -> Option<&Arc<ExperimentCase>> {
        self.case.as_ref()
    }

    /// Node currently running
    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<&NodeKey> {
        self.node.as_ref()
    }

    /// Enclosing span
    #[inline]
    #[must_use]
    pub fn span(&self) -> Option<SpanId> {
        self.span
    }

    /// Check if every enclosing branch is a default branch
    #[inline]
    #[must_use]
    pub fn is_default_path(&self) -> bool {
        self.on_default_path
    }

    /// Background cases of this run
    #[inline]
    #[must_use]
    pub fn background(&self) -> &Background {
        &self.background
    }

    /// Run options
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Call a nested node by declared name, key or short name
    ///
    /// # Errors
    /// Returns a configuration error for unknown names and
    /// [`ExperimentError::MainExecution`] if the callee fails.
    pub async fn call(&self, name: &str, args: Args) -> Result<Value, ExperimentError> {
        let key = self
            .node
            .as_ref()
            .and_then(|current| self.registry.node(current))
            .and_then(|current| current.resolve_call(name));
        let handle = match key {
            Some(key) => self.registry.handle(key.as_str()),
            None => self.registry.handle(name),
        }
        .ok_or_else(|| ExperimentError::configuration(format!("unknown node '{name}'")))?;
        self.invoke(&handle, args).await
    }

    /// Call a nested node
    ///
    /// # Errors
    /// Same as [`ExperimentContext::call`].
    pub async fn invoke(&self, handle: &NodeHandle, args: Args) -> Result<Value, ExperimentError> {
        let node = handle.node()?;
        let assigned = self
            .case
            .as_ref()
            .filter(|case| case.get(node.key()).is_some());

        if let Some(case) = assigned {
            let executed = execute(
                CaseRun {
                    node,
                    case: Arc::clone(case),
                    args,
                    is_default: self.on_default_path,
                },
                self,
            )
            .await?;
            return executed
                .output
                .map_err(|info| main_failure(&executed.result, info));
        }

        let strategy = Arc::clone(node.strategy());
        let outcome = run_strategy(node, strategy, args, self).await?;
        Ok(outcome.output)
    }

    /// Blocking form of [`ExperimentContext::call`] for work units on the
    /// blocking pool
    ///
    /// # Errors
    /// Returns a programmer error when called outside a Tokio runtime, and
    /// otherwise the same errors as [`ExperimentContext::call`].
    pub fn call_blocking(&self, name: &str, args: Args) -> Result<Value, ExperimentError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|err| {
            ExperimentError::Programmer(format!("call_blocking needs a runtime: {err}"))
        })?;
        handle.block_on(self.call(name, args))
    }

    #[cfg(test)]
    pub(crate) fn detached(registry: Registry) -> Self {
        use crate::scope::ScopeData;
        Self::root(
            registry,
            Scope::root(ScopeData {
                function: String::from("test"),
                args: Value::Null,
            }),
            Background::new(None),
            RunConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{node_fn, Invocation, NodeSpec};
    use serde_json::json;
    use trellis_config::{ConfigSpec, Dynamic};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register(
                NodeSpec::new(
                    "inner",
                    node_fn(|inv: Invocation| async move {
                        anyhow::Ok(inv.args.get("model").cloned().unwrap_or(Value::Null))
                    }),
                )
                .with_config(ConfigSpec::new().dynamic("model", Dynamic::of(["m1", "m2"])))
                .bind("model", "model"),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn call_outside_case_runs_callee_strategy() {
        let ctx = ExperimentContext::detached(registry());
        let out = ctx.call("inner", Args::new()).await.unwrap();
        assert_eq!(out, json!("m1"));
        assert_eq!(ctx.scope().children().len(), 1);
    }

    #[tokio::test]
    async fn unknown_callee_is_configuration_error() {
        let ctx = ExperimentContext::detached(registry());
        let err = ctx.call("nowhere", Args::new()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn call_blocking_needs_runtime() {
        let ctx = ExperimentContext::detached(registry());
        let err = std::thread::spawn(move || ctx.call_blocking("inner", Args::new()))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(err.is_programmer());
    }
}
