//! Core types for trellis
//!
//! Defines the fundamental data structures for:
//! - Node identity ([`NodeKey`])
//! - Call arguments and parameter binding ([`Args`], [`BindTarget`])
//! - Branch outcome ([`Status`], [`ExceptionInfo`], [`Failure`])
//! - Run configuration ([`RunConfig`])

use std::any::Any;
use std::fmt::{self, Display, Formatter};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_config::ConfigError;

use crate::error::ExperimentError;
use crate::strategy::StrategyKind;

/// Unique node identity
///
/// `namespace::name` when registered with a namespace, else `name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    /// Create key from optional namespace and name
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{ns}::{name}")),
            _ => Self(name.to_string()),
        }
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name without namespace
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Arguments of one call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    positional: Vec<Value>,
    named: IndexMap<String, Value>,
}

impl Args {
    /// Create empty args
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from positional values
    #[must_use]
    pub fn of<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: IndexMap::new(),
        }
    }

    /// Append a positional value
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value
    #[inline]
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Positional value at `index`
    #[inline]
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Named value
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// All positional values
    #[inline]
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// All named values
    #[inline]
    #[must_use]
    pub fn named(&self) -> &IndexMap<String, Value> {
        &self.named
    }

    /// JSON snapshot for scope data and span attributes
    #[must_use]
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "args": self.positional,
            "kwargs": self.named,
        })
    }

    /// Supply `value` for `target` unless the caller already did
    pub(crate) fn bind(&mut self, target: &BindTarget, value: Value) {
        match target {
            BindTarget::Name(name) => {
                if !self.named.contains_key(name) {
                    self.named.insert(name.clone(), value);
                }
            }
            BindTarget::Position(index) => {
                if *index >= self.positional.len() {
                    self.positional.resize(*index, Value::Null);
                    self.positional.push(value);
                }
            }
        }
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: IndexMap::new(),
        }
    }
}

/// Parameter that receives a bound configuration slice
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindTarget {
    /// Positional parameter
    Position(usize),
    /// Named parameter
    Name(String),
}

impl Display for BindTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(i) => write!(f, "#{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Branch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Started, not finalized
    #[default]
    Pending,
    /// Finished with an output
    Success,
    /// Finished with an error
    Failed,
    /// Not run for this call
    Skipped,
}

impl Status {
    /// Check if status is terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// Kind of a panic captured at a branch boundary
pub const PANIC_KIND: &str = "Panic";

/// Kind used when a work unit's error carries none
pub const GENERIC_KIND: &str = "Error";

/// Typed failure a work unit can raise to report its error kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    /// Error kind
    pub kind: String,
    /// Error message
    pub message: String,
}

impl Failure {
    /// Create failure
    #[inline]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Captured error of a failed branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error kind
    pub kind: String,
    /// Error message
    pub message: String,
    /// Full cause chain
    pub trace: String,
}

impl ExceptionInfo {
    /// Capture an error returned by a work unit
    ///
    /// The kind comes from a [`Failure`] or a nested [`ExperimentError`]
    /// anywhere in the chain, else [`GENERIC_KIND`].
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        let (kind, message) = err
            .chain()
            .find_map(|cause| {
                if let Some(failure) = cause.downcast_ref::<Failure>() {
                    return Some((failure.kind.clone(), failure.message.clone()));
                }
                cause
                    .downcast_ref::<ExperimentError>()
                    .map(|nested| (nested.kind().to_string(), nested.message()))
            })
            .unwrap_or_else(|| (GENERIC_KIND.to_string(), err.to_string()));

        Self {
            kind,
            message,
            trace: format!("{err:?}"),
        }
    }

    /// Capture a panic payload
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Self {
            kind: PANIC_KIND.to_string(),
            trace: format!("panicked: {message}"),
            message,
        }
    }
}

impl From<&ExperimentError> for ExceptionInfo {
    fn from(err: &ExperimentError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.message(),
            trace: err.to_string(),
        }
    }
}

/// Run-time options for one top-level call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Strategy overriding the node's own, when set
    pub strategy: Option<StrategyKind>,
    /// Block until background cases finish
    pub wait_for_background: bool,
    /// Produce the formatted result tree
    pub return_all: bool,
    /// Bound on concurrently running variant cases
    pub max_concurrent_variants: Option<usize>,
    /// Case index used as primary by shadow-style strategies
    pub shadow_primary_index: usize,
}

impl RunConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from YAML
    ///
    /// # Errors
    /// Returns error on invalid YAML or unknown strategy names.
    pub fn from_yaml(text: &str) -> Result<Self, ExperimentError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::from(e).into())
    }

    /// Parse from JSON
    ///
    /// # Errors
    /// Returns error on invalid JSON or unknown strategy names.
    pub fn from_json(text: &str) -> Result<Self, ExperimentError> {
        serde_json::from_str(text).map_err(|e| ConfigError::from(e).into())
    }

    /// Set strategy override
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set wait-for-background flag
    #[inline]
    #[must_use]
    pub fn with_wait_for_background(mut self, wait: bool) -> Self {
        self.wait_for_background = wait;
        self
    }

    /// Set return-all flag
    #[inline]
    #[must_use]
    pub fn with_return_all(mut self, return_all: bool) -> Self {
        self.return_all = return_all;
        self
    }

    /// Set variant concurrency bound
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_variants(mut self, max: usize) -> Self {
        self.max_concurrent_variants = Some(max.max(1));
        self
    }

    /// Set primary case index for shadow-style strategies
    #[inline]
    #[must_use]
    pub fn with_shadow_primary_index(mut self, index: usize) -> Self {
        self.shadow_primary_index = index;
        self
    }
}
