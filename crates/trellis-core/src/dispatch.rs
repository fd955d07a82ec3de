//! Case execution
//!
//! Runs one node under one case and records the attempt as a branch:
//! - [`StrategyCall`]: everything a strategy needs, plus helpers to run a
//!   case inline, run several concurrently, fire one into the background,
//!   or record one as skipped
//! - [`Background`]: handles of fire-and-forget cases for one run
//!
//! Errors and panics of the work unit are caught at the branch boundary
//! and recorded on the branch. Only the caller of a main case sees them
//! again, as [`ExperimentError::MainExecution`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use trellis_config::Variant;

use crate::branch::{Branch, BranchResult, BranchSet};
use crate::context::ExperimentContext;
use crate::enumerate::{CaseSet, ExperimentCase};
use crate::error::ExperimentError;
use crate::node::{Invocation, Node};
use crate::scope::ScopeData;
use crate::strategy::{BranchStrategy, StrategyOutcome};
use crate::trace::{Span, BRANCH_SPAN, EXPERIMENT_SPAN};
use crate::types::{Args, ExceptionInfo, Status};

/// Outcome of one executed case
#[derive(Debug, Clone)]
pub struct Executed {
    /// Branch record
    pub result: BranchResult,
    /// Output or captured error
    pub output: Result<Value, ExceptionInfo>,
}

/// Input of one strategy run
#[derive(Debug, Clone)]
pub struct StrategyCall {
    /// Node being run
    pub node: Arc<Node>,
    /// Its enumerated cases
    pub cases: Arc<CaseSet>,
    /// Caller args, before binding
    pub args: Args,
    /// Context the run happens in
    pub ctx: ExperimentContext,
}

impl StrategyCall {
    /// Variant of this node under `case`
    #[must_use]
    pub fn variant_for(&self, case: &ExperimentCase) -> Arc<Variant> {
        case.get(self.node.key())
            .cloned()
            .unwrap_or_else(|| Arc::new(Variant::synthetic_default()))
    }

    /// Run one case on the current task
    ///
    /// # Errors
    /// Returns configuration or programmer errors; work-unit failures are
    /// reported in [`Executed::output`].
    pub async fn run_case(
        &self,
        case: &Arc<ExperimentCase>,
        is_default: bool,
    ) -> Result<Executed, ExperimentError> {
        execute(
            CaseRun {
                node: Arc::clone(&self.node),
                case: Arc::clone(case),
                args: self.args.clone(),
                is_default,
            },
            &self.ctx,
        )
        .await
    }

    /// Run the foreground case and re-raise its failure
    ///
    /// # Errors
    /// Returns [`ExperimentError::MainExecution`] if the work unit failed.
    pub async fn run_main(
        &self,
        case: &Arc<ExperimentCase>,
    ) -> Result<(Value, BranchResult), ExperimentError> {
        let executed = self.run_case(case, self.ctx.is_default_path()).await?;
        match executed.output {
            Ok(value) => Ok((value, executed.result)),
            Err(info) => Err(main_failure(&executed.result, info)),
        }
    }

    /// Run cases concurrently on the current task and wait for all
    ///
    /// Results keep the order of `cases`. At most `max_concurrent_variants`
    /// run at once. With `mark_main`, the main case is on the default path.
    ///
    /// # Errors
    /// Returns the first configuration or programmer error.
    pub async fn run_all(
        &self,
        cases: &[Arc<ExperimentCase>],
        mark_main: bool,
    ) -> Result<Vec<Executed>, ExperimentError> {
        let limit = self
            .ctx
            .config()
            .max_concurrent_variants
            .unwrap_or(cases.len())
            .max(1);
        let default_path = self.ctx.is_default_path();
        futures::stream::iter(cases.to_vec())
            .map(|case| async move {
                let is_default = mark_main && default_path && case.is_main();
                self.run_case(&case, is_default).await
            })
            .buffered(limit)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }

    /// Fire a case into the background of the current run
    pub fn spawn_case(&self, case: &Arc<ExperimentCase>) {
        self.ctx.background().spawn(
            CaseRun {
                node: Arc::clone(&self.node),
                case: Arc::clone(case),
                args: self.args.clone(),
                is_default: false,
            },
            self.ctx.clone(),
        );
    }

    /// Record a case as not run for this call
    ///
    /// # Errors
    /// Returns a programmer error if the branch cannot be finalized.
    pub fn skip_case(
        &self,
        case: &Arc<ExperimentCase>,
        reason: &str,
    ) -> Result<BranchResult, ExperimentError> {
        let branch = Branch::start(self.node.key().clone(), self.variant_for(case))
            .with_assignments(case.summary());
        let scope = self.ctx.scope().child(
            ScopeData {
                function: self.node.key().to_string(),
                args: self.args.snapshot(),
            },
            branch,
        );
        Ok(scope.finalize(|b| b.mark_skipped(reason))?)
    }
}

pub(crate) struct CaseRun {
    pub(crate) node: Arc<Node>,
    pub(crate) case: Arc<ExperimentCase>,
    pub(crate) args: Args,
    pub(crate) is_default: bool,
}

/// Convert a failed foreground branch into the caller-facing error
pub(crate) fn main_failure(result: &BranchResult, info: ExceptionInfo) -> ExperimentError {
    ExperimentError::MainExecution {
        node: result.node.to_string(),
        config_id: result.config_id.to_string(),
        kind: info.kind,
        message: info.message,
    }
}

fn variant_failure(result: &BranchResult) -> ExperimentError {
    let (kind, message) = result
        .error
        .as_ref()
        .map(|e| (e.kind.clone(), e.message.clone()))
        .unwrap_or_default();
    ExperimentError::VariantExecution {
        node: result.node.to_string(),
        config_id: result.config_id.to_string(),
        kind,
        message,
    }
}

/// Run one node under one case as a child of the current scope
pub(crate) async fn execute(
    run: CaseRun,
    parent: &ExperimentContext,
) -> Result<Executed, ExperimentError> {
    let CaseRun {
        node,
        case,
        args,
        is_default,
    } = run;
    let variant = case
        .get(node.key())
        .cloned()
        .unwrap_or_else(|| Arc::new(Variant::synthetic_default()));
    let args = node.bind(&variant, args)?;

    let branch = Branch::start(node.key().clone(), Arc::clone(&variant))
        .as_default(is_default)
        .with_assignments(case.summary());
    let scope = parent.scope().child(
        ScopeData {
            function: node.key().to_string(),
            args: args.snapshot(),
        },
        branch,
    );

    let span = Span::new(BRANCH_SPAN, parent.span())
        .with_attribute("node", node.key().as_str())
        .with_attribute("config_id", variant.config_id().as_str())
        .with_attribute("default", is_default);
    let tracers = parent.registry().tracers();
    tracers.start(&span);
    tracing::debug!(node = %node.key(), config_id = %variant.config_id(), default = is_default, "branch started");

    let ctx = parent.enter(node.key().clone(), Arc::clone(&case), scope.clone(), span.id, is_default);
    let outcome = AssertUnwindSafe(node.call(Invocation { args, ctx }))
        .catch_unwind()
        .await;

    let output = match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ExceptionInfo::from_error(&err)),
        Err(payload) => Err(ExceptionInfo::from_panic(payload.as_ref())),
    };
    let result = match &output {
        Ok(value) => scope.finalize(|b| b.mark_success(value.clone()))?,
        Err(info) => scope.finalize(|b| b.mark_failed(info.clone()))?,
    };
    tracers.end(&span, output.as_ref().err());

    match &output {
        Ok(_) => tracing::debug!(
            node = %result.node,
            config_id = %result.config_id,
            duration_ms = ?result.duration_ms,
            "branch succeeded"
        ),
        Err(info) if is_default => tracing::debug!(
            node = %result.node,
            config_id = %result.config_id,
            kind = %info.kind,
            "main branch failed"
        ),
        Err(info) => tracing::error!(
            node = %result.node,
            config_id = %result.config_id,
            kind = %info.kind,
            message = %info.message,
            "variant branch failed"
        ),
    }

    Ok(Executed { result, output })
}

/// Start an experiment for `node` and let `strategy` schedule its cases
pub(crate) async fn run_strategy(
    node: Arc<Node>,
    strategy: Arc<dyn BranchStrategy>,
    args: Args,
    ctx: &ExperimentContext,
) -> Result<StrategyOutcome, ExperimentError> {
    let cases = ctx.registry().cases(node.key())?;
    let span = Span::new(EXPERIMENT_SPAN, ctx.span())
        .with_attribute("node", node.key().as_str())
        .with_attribute("strategy", strategy.name())
        .with_attribute("cases", cases.len());
    let tracers = ctx.registry().tracers();
    tracers.start(&span);
    tracing::debug!(node = %node.key(), strategy = strategy.name(), cases = cases.len(), "experiment started");

    let outcome = strategy
        .run(StrategyCall {
            node,
            cases,
            args,
            ctx: ctx.with_span(span.id),
        })
        .await;

    match &outcome {
        Ok(_) => tracers.end(&span, None),
        Err(err) => tracers.end(&span, Some(&ExceptionInfo::from(err))),
    }
    outcome
}

/// Background cases of one run
///
/// Cloning shares the same task list. Dropping it detaches the tasks; they
/// keep running and their failures are still logged.
#[derive(Debug, Clone, Default)]
pub struct Background {
    tasks: Arc<Mutex<Vec<JoinHandle<Result<BranchResult, ExperimentError>>>>>,
    limit: Option<Arc<Semaphore>>,
}

impl Background {
    /// Create with an optional bound on concurrently running cases
    #[must_use]
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            tasks: Arc::default(),
            limit: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub(crate) fn spawn(&self, run: CaseRun, ctx: ExperimentContext) {
        let limit = self.limit.clone();
        let handle = tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let node = run.node.key().clone();
            execute(run, &ctx).await.map(|executed| executed.result).map_err(|err| {
                tracing::error!(node = %node, error = %err, "background case could not start");
                err
            })
        });
        self.tasks.lock().push(handle);
    }

    /// Number of background cases not yet finished
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every background case, including ones spawned meanwhile
    ///
    /// Never raises: failed cases come back as failed branch results.
    pub async fn gather(&self) -> BranchSet {
        let mut results = BranchSet::new();
        for outcome in self.drain().await {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => tracing::warn!(error = %err, "background case dropped from results"),
            }
        }
        results
    }

    /// Wait for every background case and raise the first failure
    ///
    /// # Errors
    /// Returns [`ExperimentError::VariantExecution`] for the first failed
    /// branch, or the error that kept a case from starting.
    pub async fn try_gather(&self) -> Result<BranchSet, ExperimentError> {
        let mut results = BranchSet::new();
        for outcome in self.drain().await {
            let result = outcome?;
            if result.status == Status::Failed {
                return Err(variant_failure(&result));
            }
            results.push(result);
        }
        Ok(results)
    }

    async fn drain(&self) -> Vec<Result<BranchResult, ExperimentError>> {
        let mut out = Vec::new();
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                match handle.await {
                    Ok(outcome) => out.push(outcome),
                    Err(join) => {
                        tracing::error!(error = %join, "background task aborted");
                        out.push(Err(ExperimentError::Programmer(format!(
                            "background task aborted: {join}"
                        ))));
                    }
                }
            }
        }
        out
    }
}
