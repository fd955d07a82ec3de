//! Error types for configuration handling
//!
//! Covers:
//! - Malformed configuration specs and source documents
//! - Bind paths that do not resolve against a variant
//! - Dynamic-leaf markers with invalid arguments

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Spec or document shape is not usable
    #[error("invalid configuration spec: {0}")]
    InvalidSpec(String),

    /// A dotted bind path failed at one of its segments
    #[error("bind path '{path}' does not resolve: key '{segment}' not found")]
    UnresolvedBindPath {
        /// Full dotted path
        path: String,
        /// Segment that was missing
        segment: String,
    },

    /// Expansion produced no variants where at least one is required
    #[error("configuration expanded to zero variants: {0}")]
    EmptyExpansion(String),

    /// Number of combinations does not fit in `usize`
    #[error("configuration product over {axes} axes is too large to enumerate")]
    ProductOverflow {
        /// Number of axes multiplied
        axes: usize,
    },

    /// `$dynamic` / `$range` marker with bad arguments
    #[error("invalid dynamic marker '{marker}': {reason}")]
    InvalidMarker {
        /// Marker key
        marker: String,
        /// What was wrong
        reason: String,
    },

    /// Unknown merge mode name
    #[error("unknown merge mode '{0}', expected 'extend' or 'override'")]
    UnknownMergeMode(String),

    /// YAML parse failure
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse failure
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Source could not be read
    #[error("failed to read configuration source: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create invalid spec error
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSpec(message.into())
    }

    /// Check if the error comes from a bind path
    #[inline]
    #[must_use]
    pub fn is_bind_error(&self) -> bool {
        matches!(self, Self::UnresolvedBindPath { .. })
    }
}
