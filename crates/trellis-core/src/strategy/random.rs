use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{BranchStrategy, StrategyCall, StrategyKind, StrategyOutcome};
use crate::error::ExperimentError;

/// Run one uniformly chosen case per call
#[derive(Debug)]
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl Random {
    /// Create strategy seeded from the OS
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Create strategy with a fixed seed
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, len: usize) -> usize {
        self.rng.lock().random_range(0..len)
    }
}

#[async_trait]
impl BranchStrategy for Random {
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError> {
        let cases = call.cases.all();
        let selected = self.pick(cases.len());
        tracing::debug!(node = %call.node.key(), selected, total = cases.len(), "random selection");

        let mut branches = Vec::with_capacity(cases.len().saturating_sub(1));
        let mut ran = None;
        for (i, case) in cases.iter().enumerate() {
            if i == selected {
                ran = Some(call.run_main(case).await?);
            } else {
                branches.push(call.skip_case(case, "not selected by random draw")?);
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
        "random"
    }

    fn kind(&self) -> Option<StrategyKind> {
        Some(StrategyKind::Random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_draws_repeat() {
        let a = Random::seeded(7);
        let b = Random::seeded(7);
        let first: Vec<usize> = (0..16).map(|_| a.pick(5)).collect();
        let second: Vec<usize> = (0..16).map(|_| b.pick(5)).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|&i| i < 5));
    }
}
