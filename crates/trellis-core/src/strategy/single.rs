use async_trait::async_trait;

use super::{BranchStrategy, StrategyCall, StrategyKind, StrategyOutcome};
use crate::error::ExperimentError;

/// Run the main case only
#[derive(Debug, Clone, Copy, Default)]
pub struct Single;

#[async_trait]
impl BranchStrategy for Single {
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError> {
        let (output, main) = call.run_main(call.cases.main()).await?;
        Ok(StrategyOutcome {
            output,
            main: Some(main),
            branches: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "single"
    }

    fn kind(&self) -> Option<StrategyKind> {
        Some(StrategyKind::Single)
    }
}
