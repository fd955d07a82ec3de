use std::sync::Arc;

use async_trait::async_trait;

use super::{BranchStrategy, StrategyCall, StrategyKind, StrategyOutcome};
use crate::error::ExperimentError;

/// Run the primary case in the foreground and every other case as a
/// shadow
///
/// The primary is picked by `shadow_primary_index` and defaults to the main
/// case. Its output is returned and its failure is re-raised. Shadow cases
/// never affect the caller: [`Shadow::new`] fires them into the background,
/// [`Shadow::parallel`] awaits them before returning.
#[derive(Debug, Clone, Copy)]
pub struct Shadow {
    await_variants: bool,
}

impl Default for Shadow {
    fn default() -> Self {
        Self::new()
    }
}

impl Shadow {
    /// Background shadows
    #[must_use]
    pub fn new() -> Self {
        Self {
            await_variants: false,
        }
    }

    /// Awaited shadows
    #[must_use]
    pub fn parallel() -> Self {
        Self {
            await_variants: true,
        }
    }
}

#[async_trait]
impl BranchStrategy for Shadow {
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError> {
        let cases = call.cases.all();
        let primary = call.ctx.config().shadow_primary_index % cases.len();
        let shadows: Vec<_> = cases
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != primary)
            .map(|(_, case)| Arc::clone(case))
            .collect();

        let (output, main) = call.run_main(&cases[primary]).await?;
        if !self.await_variants {
            for case in &shadows {
                call.spawn_case(case);
            }
            tracing::debug!(node = %call.node.key(), shadows = shadows.len(), "shadow cases scheduled");
            return Ok(StrategyOutcome {
                output,
                main: Some(main),
                branches: Vec::new(),
            });
        }

        let branches = call
            .run_all(&shadows, false)
            .await?
            .into_iter()
            .map(|e| e.result)
            .collect();
        Ok(StrategyOutcome {
            output,
            main: Some(main),
            branches,
        })
    }

    fn name(&self) -> &'static str {
        if self.await_variants {
            "parallel"
        } else {
            "shadow"
        }
    }

    fn kind(&self) -> Option<StrategyKind> {
        Some(if self.await_variants {
            StrategyKind::Parallel
        } else {
            StrategyKind::Shadow
        })
    }
}
