//! Top-level experiment runs
//!
//! A [`Runner`] starts one experiment from outside any branch. It owns the
//! root scope and the background set for everything the run spawns, and
//! collects the results the caller asked for in [`RunConfig`].

use std::sync::Arc;

use serde_json::Value;

use crate::branch::{BranchResult, BranchSet};
use crate::context::ExperimentContext;
use crate::dispatch::{run_strategy, Background};
use crate::error::ExperimentError;
use crate::registry::NodeHandle;
use crate::scope::{format_branch_results, get_default_output, PathRecord, Scope, ScopeData};
use crate::types::{Args, RunConfig};

/// Runner for `handle` with default options
#[must_use]
pub fn run(handle: &NodeHandle) -> Runner {
    Runner::new(handle.clone())
}

/// Builder for one top-level call
#[derive(Debug, Clone)]
pub struct Runner {
    handle: NodeHandle,
    config: RunConfig,
}

impl Runner {
    /// Create runner with default options
    #[must_use]
    pub fn new(handle: NodeHandle) -> Self {
        Self {
            handle,
            config: RunConfig::default(),
        }
    }

    /// Replace all options
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Produce the formatted result tree
    #[inline]
    #[must_use]
    pub fn with_return_all(mut self, return_all: bool) -> Self {
        self.config.return_all = return_all;
        self
    }

    /// Block until background cases finish
    #[inline]
    #[must_use]
    pub fn with_wait_for_background(mut self, wait: bool) -> Self {
        self.config.wait_for_background = wait;
        self
    }

    /// Options in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the experiment
    ///
    /// # Errors
    /// Returns configuration errors before any branch runs and
    /// [`ExperimentError::MainExecution`] if the foreground case fails.
    /// Variant failures never surface here.
    pub async fn start(self, args: Args) -> Result<RunOutcome, ExperimentError> {
        let Self { handle, config } = self;
        let registry = handle.registry().clone();
        let node = handle.node()?;
        let strategy = match config.strategy {
            Some(kind) => registry.strategy_for(node.key(), kind),
            None => Arc::clone(node.strategy()),
        };

        let root = Scope::root(ScopeData {
            function: node.key().to_string(),
            args: args.snapshot(),
        });
        let background = Background::new(config.max_concurrent_variants);
        let wait = config.wait_for_background;
        let return_all = config.return_all;
        let ctx = ExperimentContext::root(registry, root.clone(), background.clone(), config);

        tracing::info!(node = %node.key(), strategy = strategy.name(), "experiment run started");
        let outcome = run_strategy(node, strategy, args, &ctx).await?;

        let mut variant_results: BranchSet = outcome.branches.into_iter().collect();
        if wait {
            variant_results.extend(background.gather().await);
        }
        let tree = return_all.then(|| format_branch_results(&root));

        tracing::info!(
            node = %handle.key(),
            variants = variant_results.len(),
            pending = background.pending(),
            "experiment run finished"
        );
        Ok(RunOutcome {
            main_result: outcome.output,
            main_branch: outcome.main,
            variant_results,
            tree,
            background,
            root,
        })
    }
}

/// Result of a top-level call
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Output returned to the caller
    pub main_result: Value,
    /// Foreground branch, if the strategy ran one
    pub main_branch: Option<BranchResult>,
    /// Variant branches settled before returning
    pub variant_results: BranchSet,
    /// One record per root-to-leaf path, with `return_all`
    pub tree: Option<Vec<PathRecord>>,
    /// Background cases still owned by this run
    pub background: Background,
    root: Scope,
}

impl RunOutcome {
    /// Root scope of the run
    #[inline]
    #[must_use]
    pub fn root_scope(&self) -> &Scope {
        &self.root
    }

    /// Output of the deepest default branch
    #[must_use]
    pub fn default_output(&self) -> Option<Value> {
        get_default_output(&self.root)
    }

    /// Current result tree, including background cases finished so far
    #[must_use]
    pub fn results(&self) -> Vec<PathRecord> {
        format_branch_results(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{node_fn, Invocation, NodeSpec};
    use crate::registry::Registry;
    use crate::strategy::StrategyKind;
    use serde_json::json;
    use trellis_config::{ConfigSpec, Dynamic};

    fn handle(strategy: StrategyKind) -> NodeHandle {
        Registry::new()
            .register(
                NodeSpec::new(
                    "pick",
                    node_fn(|inv: Invocation| async move {
                        anyhow::Ok(inv.args.get("config_id").cloned().unwrap_or(Value::Null))
                    }),
                )
                .with_config(ConfigSpec::new().dynamic("config_id", Dynamic::of(["a", "b"])))
                .bind("config_id", "config_id")
                .with_strategy(strategy),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn single_runs_main_only() {
        let outcome = handle(StrategyKind::Single)
            .runner()
            .with_return_all(true)
            .start(Args::new())
            .await
            .unwrap();
        assert_eq!(outcome.main_result, json!("a"));
        assert!(outcome.variant_results.is_empty());
        assert_eq!(outcome.tree.as_ref().map(Vec::len), Some(1));
        assert_eq!(outcome.default_output(), Some(json!("a")));
    }

    #[tokio::test]
    async fn override_replaces_node_strategy() {
        let h = handle(StrategyKind::Single);
        let config = RunConfig::new()
            .with_strategy(StrategyKind::Shadow)
            .with_wait_for_background(true);
        let outcome = run(&h).with_config(config).start(Args::new()).await.unwrap();
        assert_eq!(outcome.main_result, json!("a"));
        assert_eq!(outcome.variant_results.len(), 1);
        assert_eq!(outcome.results().len(), 2);
    }

    #[tokio::test]
    async fn tree_absent_without_return_all() {
        let outcome = handle(StrategyKind::Single)
            .runner()
            .start(Args::new())
            .await
            .unwrap();
        assert!(outcome.tree.is_none());
        assert!(outcome.main_branch.unwrap().default);
    }
}
