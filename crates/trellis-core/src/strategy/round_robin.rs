use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BranchStrategy, StrategyCall, StrategyKind, StrategyOutcome};
use crate::error::ExperimentError;

/// Run one case per call, cycling through all cases in order
///
/// The first call runs the main case. Unselected cases are recorded as
/// skipped so the result tree shows the whole rotation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: Mutex<usize>,
}

impl RoundRobin {
    /// Create strategy starting at the main case
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&self, len: usize) -> usize {
        let mut next = self.next.lock();
        let selected = *next % len;
        *next = (selected + 1) % len;
        selected
    }
}

#[async_trait]
impl BranchStrategy for RoundRobin {
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError> {
        let cases = call.cases.all();
        let selected = self.advance(cases.len());
        tracing::debug!(node = %call.node.key(), selected, total = cases.len(), "round robin selection");

        let mut branches = Vec::with_capacity(cases.len().saturating_sub(1));
        let mut ran = None;
        for (i, case) in cases.iter().enumerate() {
            if i == selected {
                ran = Some(call.run_main(case).await?);
            } else {
                branches.push(call.skip_case(case, "not selected in this rotation")?);
            }
        }
        let (output, main) = ran.ok_or_else(|| {
            ExperimentError::Programmer(format!("case {selected} out of range"))
        })?;
        Ok(StrategyOutcome {
            output,
            main: Some(main),
            branches,
        })
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn kind(&self) -> Option<StrategyKind> {
        Some(StrategyKind::RoundRobin)
    }
}
