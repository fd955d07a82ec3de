//! Error types for experiment execution
//!
//! Provides error handling for:
//! - Configuration problems found at registration or before a run starts
//! - Failures of the main case, re-raised to the caller
//! - Failures of variant cases, surfaced only through gather
//! - Usage bugs such as finalizing a branch twice

use trellis_config::ConfigError;

use crate::types::Status;

/// Main experiment error type
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// Malformed spec, unresolved bind path, unknown node or empty case set
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The work unit raised under the main case
    #[error("node '{node}' failed under config '{config_id}': {kind}: {message}")]
    MainExecution {
        /// Node key
        node: String,
        /// Config of the failing node
        config_id: String,
        /// Error kind of the underlying failure
        kind: String,
        /// Error message of the underlying failure
        message: String,
    },

    /// The work unit raised under a variant case
    #[error("variant of node '{node}' failed under config '{config_id}': {kind}: {message}")]
    VariantExecution {
        /// Node key
        node: String,
        /// Config of the failing node
        config_id: String,
        /// Error kind of the underlying failure
        kind: String,
        /// Error message of the underlying failure
        message: String,
    },

    /// Usage bug
    #[error("programmer error: {0}")]
    Programmer(String),
}

impl ExperimentError {
    /// Create configuration error from a message
    #[inline]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(ConfigError::invalid(message))
    }

    /// Check if error was raised before any branch was created
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if error comes from the main case
    #[inline]
    #[must_use]
    pub fn is_main_failure(&self) -> bool {
        matches!(self, Self::MainExecution { .. })
    }

    /// Check if error comes from a variant case
    #[inline]
    #[must_use]
    pub fn is_variant_failure(&self) -> bool {
        matches!(self, Self::VariantExecution { .. })
    }

    /// Check if error is a usage bug
    #[inline]
    #[must_use]
    pub fn is_programmer(&self) -> bool {
        matches!(self, Self::Programmer(_))
    }

    /// Kind of the underlying failure
    ///
    /// Execution errors report the kind of the work unit's failure, the
    /// other variants report their own class name.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::MainExecution { kind, .. } | Self::VariantExecution { kind, .. } => kind,
            Self::Programmer(_) => "ProgrammerError",
        }
    }

    /// Message of the underlying failure
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::MainExecution { message, .. } | Self::VariantExecution { message, .. } => {
                message.clone()
            }
            Self::Configuration(err) => err.to_string(),
            Self::Programmer(msg) => msg.clone(),
        }
    }
}

/// Branch lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BranchError {
    /// Terminal transition on a branch that is already terminal
    #[error("branch for config '{config_id}' already finalized as {status}")]
    AlreadyFinalized {
        /// Config of the branch
        config_id: String,
        /// Status it was finalized with
        status: Status,
    },

    /// Scope carries no branch (root scope)
    #[error("scope has no branch to finalize")]
    MissingBranch,
}

impl From<BranchError> for ExperimentError {
    fn from(err: BranchError) -> Self {
        Self::Programmer(err.to_string())
    }
}
