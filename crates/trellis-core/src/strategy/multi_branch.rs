use async_trait::async_trait;

use super::{BranchStrategy, StrategyCall, StrategyKind, StrategyOutcome};
use crate::error::ExperimentError;

/// Run every case and return all branch results
///
/// The output is a JSON array of branch results in case order. Work-unit
/// failures are reported inside it and never raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiBranch;

#[async_trait]
impl BranchStrategy for MultiBranch {
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError> {
        let executed = call.run_all(call.cases.all(), true).await?;
        let branches: Vec<_> = executed.into_iter().map(|e| e.result).collect();
        let output = serde_json::to_value(&branches)
            .map_err(|err| ExperimentError::Programmer(format!("unserializable result: {err}")))?;
        Ok(StrategyOutcome {
            output,
            main: None,
            branches,
        })
    }

    fn name(&self) -> &'static str {
        "multi_branch"
    }

    fn kind(&self) -> Option<StrategyKind> {
        Some(StrategyKind::MultiBranch)
    }
}
