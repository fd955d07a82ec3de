//! Branch-execution strategies
//!
//! A strategy decides which cases of an experiment run, where they run, and
//! what the caller gets back. Built-in strategies:
//! - `single`: main case only
//! - `round_robin`: one case per call, rotating
//! - `shadow`: main case in the foreground, the rest in the background
//! - `parallel`: main case in the foreground, the rest awaited alongside
//! - `multi_branch`: every case, all results returned
//! - `random`: one uniformly chosen case per call

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::branch::BranchResult;
use crate::error::ExperimentError;

pub use crate::dispatch::{Executed, StrategyCall};

mod multi_branch;
mod random;
mod round_robin;
mod shadow;
mod single;

pub use multi_branch::MultiBranch;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use shadow::Shadow;
pub use single::Single;

/// What a strategy hands back to the caller
#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    /// Value returned to the caller
    pub output: Value,
    /// Foreground branch, if one ran
    pub main: Option<BranchResult>,
    /// Other branches settled before returning
    pub branches: Vec<BranchResult>,
}

/// Schedules the cases of one experiment
#[async_trait]
pub trait BranchStrategy: Send + Sync + fmt::Debug {
    /// Run the experiment
    ///
    /// # Errors
    /// Returns configuration and programmer errors, and
    /// [`ExperimentError::MainExecution`] when the foreground case fails.
    async fn run(&self, call: StrategyCall) -> Result<StrategyOutcome, ExperimentError>;

    /// Strategy name
    fn name(&self) -> &'static str;

    /// Built-in kind, `None` for custom strategies
    fn kind(&self) -> Option<StrategyKind> {
        None
    }
}

/// Built-in strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Main case only
    #[default]
    Single,
    /// Rotate through cases
    RoundRobin,
    /// Main in foreground, variants in background
    Shadow,
    /// Main in foreground, variants awaited
    Parallel,
    /// All cases, all results
    MultiBranch,
    /// One random case
    Random,
}

impl StrategyKind {
    /// Every built-in kind
    pub const ALL: [Self; 6] = [
        Self::Single,
        Self::RoundRobin,
        Self::Shadow,
        Self::Parallel,
        Self::MultiBranch,
        Self::Random,
    ];

    /// Registered name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::RoundRobin => "round_robin",
            Self::Shadow => "shadow",
            Self::Parallel => "parallel",
            Self::MultiBranch => "multi_branch",
            Self::Random => "random",
        }
    }

    /// Fresh strategy instance
    #[must_use]
    pub fn build(self) -> Arc<dyn BranchStrategy> {
        match self {
            Self::Single => Arc::new(Single),
            Self::RoundRobin => Arc::new(RoundRobin::new()),
            Self::Shadow => Arc::new(Shadow::new()),
            Self::Parallel => Arc::new(Shadow::parallel()),
            Self::MultiBranch => Arc::new(MultiBranch),
            Self::Random => Arc::new(Random::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ExperimentError::configuration(format!("unknown strategy '{s}'")))
    }
}

/// Factory producing a strategy instance
pub type StrategyFactory = Arc<dyn Fn() -> Arc<dyn BranchStrategy> + Send + Sync>;

/// Named strategy factories
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry with every built-in strategy
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in StrategyKind::ALL {
            registry.register(kind.as_str(), move || kind.build());
        }
        registry
    }

    /// Register a factory, replacing any previous one under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn BranchStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Remove a factory
    pub fn remove(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    /// Check if a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiate the strategy registered under `name`
    ///
    /// # Errors
    /// Returns a configuration error for unknown names.
    pub fn build(&self, name: &str) -> Result<Arc<dyn BranchStrategy>, ExperimentError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ExperimentError::configuration(format!("unknown strategy '{name}'")))
    }

    /// Number of registered strategies
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if no strategy is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kind() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.len(), StrategyKind::ALL.len());
        for kind in StrategyKind::ALL {
            let strategy = registry.build(kind.as_str()).unwrap();
            assert_eq!(strategy.kind(), Some(kind));
            assert_eq!(strategy.name(), kind.as_str());
        }
    }

    #[test]
    fn parse_kind() {
        assert_eq!("round_robin".parse::<StrategyKind>().unwrap(), StrategyKind::RoundRobin);
        assert!("roundrobin".parse::<StrategyKind>().is_err());
        assert_eq!(
            serde_json::from_str::<StrategyKind>("\"multi_branch\"").unwrap(),
            StrategyKind::MultiBranch
        );
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let mut registry = StrategyRegistry::with_defaults();
        assert!(registry.remove("random"));
        assert!(!registry.contains("random"));
        let err = registry.build("random").unwrap_err();
        assert!(err.is_configuration());
    }
}
