//! Trellis Core - configuration-driven experiment execution
//!
//! Registers work units ("nodes") with configuration variants and runs them
//! as experiments:
//! - Enumerates every combination of variants across nested nodes
//! - Runs the main case in the foreground and schedules the others
//!   according to a pluggable [`BranchStrategy`]
//! - Records every attempt as a [`BranchResult`] in a scope tree that can
//!   be flattened into per-path records
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use trellis_config::{ConfigSpec, Dynamic};
//! use trellis_core::{node_fn, Args, Invocation, NodeSpec, Registry, RunConfig, StrategyKind};
//!
//! # async fn example() -> Result<(), trellis_core::ExperimentError> {
//! let registry = Registry::new();
//! let handle = registry.register(
//!     NodeSpec::new(
//!         "answer",
//!         node_fn(|inv: Invocation| async move {
//!             anyhow::Ok(json!({ "model": inv.args.get("model").cloned() }))
//!         }),
//!     )
//!     .with_config(ConfigSpec::new().dynamic("model", Dynamic::of(["small", "large"])))
//!     .bind("model", "model")
//!     .with_strategy(StrategyKind::Shadow),
//! )?;
//!
//! let outcome = handle
//!     .runner()
//!     .with_config(RunConfig::new().with_wait_for_background(true))
//!     .start(Args::new())
//!     .await?;
//! assert_eq!(outcome.variant_results.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod branch;
pub mod context;
mod dispatch;
pub mod enumerate;
pub mod error;
pub mod node;
pub mod registry;
pub mod runner;
pub mod scope;
pub mod strategy;
pub mod trace;
pub mod types;

// Re-exports for convenience
pub use branch::{Branch, BranchId, BranchResult, BranchSet};
pub use context::ExperimentContext;
pub use dispatch::{Background, Executed, StrategyCall};
pub use enumerate::{enumerate_cases, CaseSet, ExperimentCase};
pub use error::{BranchError, ExperimentError};
pub use node::{blocking_fn, node_fn, ExperimentFn, Invocation, Node, NodeSpec, WorkFuture};
pub use registry::{NodeHandle, Registry};
pub use runner::{run, RunOutcome, Runner};
pub use scope::{
    format_branch_results, get_default_output, ChainOutput, PathRecord, Scope, ScopeData,
};
pub use strategy::{
    BranchStrategy, MultiBranch, Random, RoundRobin, Shadow, Single, StrategyFactory,
    StrategyKind, StrategyOutcome, StrategyRegistry,
};
pub use trace::{
    InMemoryTracer, NoopTracer, Span, SpanId, SpanRecord, Tracer, BRANCH_SPAN, EXPERIMENT_SPAN,
};
pub use types::{
    Args, BindTarget, ExceptionInfo, Failure, NodeKey, RunConfig, Status, GENERIC_KIND,
    PANIC_KIND,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for defining and running experiments
    pub use crate::{
        node_fn, Args, BranchResult, ExperimentContext, ExperimentError, Failure, Invocation,
        NodeHandle, NodeSpec, Registry, RunConfig, RunOutcome, StrategyKind,
    };
    pub use trellis_config::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
