//! Dotted bind paths into configuration variants
//!
//! Provides [`BindPath`] for addressing a sub-tree of a variant, used to
//! bind a slice of configuration to a work-unit parameter.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_json::Value;

use crate::error::ConfigError;

/// Path into a configuration tree
///
/// Segments are map keys. The empty path addresses the whole variant.
///
/// # Examples
/// - `""` → whole variant
/// - `"llm.model"` → `variant["llm"]["model"]`
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindPath(Vec<String>);

impl BindPath {
    /// Create new path from segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Empty path (whole variant)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(segment.into());
        new
    }

    /// Walk the path through `value`
    ///
    /// # Errors
    /// Returns [`ConfigError::UnresolvedBindPath`] naming the first segment
    /// that is missing or that hits a non-map value.
    pub fn resolve<'a>(&self, value: &'a Value) -> Result<&'a Value, ConfigError> {
        let mut current = value;
        for segment in &self.0 {
            current = current
                .as_object()
                .and_then(|map| map.get(segment))
                .ok_or_else(|| ConfigError::UnresolvedBindPath {
                    path: self.to_string(),
                    segment: segment.clone(),
                })?;
        }
        Ok(current)
    }
}

impl Display for BindPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for BindPath {
    type Err = ConfigError;

    /// Parse a dotted path; empty segments are skipped so `""` and `"."`
    /// both mean root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('.')
            .filter(|seg| !seg.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self(segments))
    }
}

impl From<&str> for BindPath {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}
