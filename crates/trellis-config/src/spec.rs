//! Declarative configuration specs
//!
//! A [`ConfigSpec`] is an ordered map whose entries are literals, nested
//! specs, or [`Dynamic`] leaves holding a finite list of alternatives. The
//! expander turns one spec into the Cartesian product over its dynamic
//! leaves.
//!
//! Specs can be built in code or parsed from a JSON value where a dynamic
//! leaf is written with a marker:
//!
//! ```text
//! {"model": {"$dynamic": ["a", "b"]},
//!  "temp":  {"$range": {"start": 0, "end": 3, "step": 1}}}
//! ```

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Marker key for a list of alternatives
pub const DYNAMIC_MARKER: &str = "$dynamic";

/// Marker key for an integer range of alternatives
pub const RANGE_MARKER: &str = "$range";

/// A leaf with several alternative values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dynamic {
    values: Vec<Value>,
}

impl Dynamic {
    /// Create from any iterable of JSON-convertible values
    #[must_use]
    pub fn of<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Half-open integer range `start..end` stepping by `step`
    ///
    /// A negative step counts down. An empty range is allowed and makes the
    /// whole spec expand to nothing.
    ///
    /// # Errors
    /// Returns error if `step` is zero.
    pub fn range(start: i64, end: i64, step: i64) -> Result<Self, ConfigError> {
        if step == 0 {
            return Err(ConfigError::InvalidMarker {
                marker: RANGE_MARKER.to_string(),
                reason: "step must not be zero".to_string(),
            });
        }
        let mut values = Vec::new();
        let mut current = start;
        while (step > 0 && current < end) || (step < 0 && current > end) {
            values.push(Value::from(current));
            match current.checked_add(step) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Self { values })
    }

    /// Alternatives in declaration order
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of alternatives
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no alternatives
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One entry of a spec
#[derive(Debug, Clone, PartialEq)]
pub enum SpecEntry {
    /// Fixed value, copied into every variant
    Literal(Value),
    /// Alternatives, one axis of the product
    Dynamic(Dynamic),
    /// Nested map that may itself hold dynamic leaves
    Nested(ConfigSpec),
}

/// Declarative configuration spec
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSpec {
    entries: IndexMap<String, SpecEntry>,
}

impl ConfigSpec {
    /// Create empty spec
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal entry
    #[must_use]
    pub fn literal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(key.into(), SpecEntry::Literal(value.into()));
        self
    }

    /// Add a dynamic entry
    #[must_use]
    pub fn dynamic(mut self, key: impl Into<String>, values: Dynamic) -> Self {
        self.entries.insert(key.into(), SpecEntry::Dynamic(values));
        self
    }

    /// Add a nested spec
    #[must_use]
    pub fn nested(mut self, key: impl Into<String>, spec: ConfigSpec) -> Self {
        self.entries.insert(key.into(), SpecEntry::Nested(spec));
        self
    }

    /// Entries in declaration order
    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (&String, &SpecEntry)> {
        self.entries.iter()
    }

    /// Number of top-level entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if spec has no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of variants this spec expands to
    ///
    /// Product of all dynamic-leaf sizes; `1` when there are none.
    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| match entry {
                SpecEntry::Literal(_) => 1,
                SpecEntry::Dynamic(d) => d.len(),
                SpecEntry::Nested(spec) => spec.variant_count(),
            })
            .product()
    }

    /// Parse a JSON object, recognising `$dynamic` and `$range` markers
    ///
    /// # Errors
    /// Returns error if `value` is not an object or a marker is malformed.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(ConfigError::invalid(format!(
                "configuration spec must be a map, got {other}"
            ))),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self, ConfigError> {
        let mut entries = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            let entry = match value {
                Value::Object(inner) => match parse_marker(&inner)? {
                    Some(dynamic) => SpecEntry::Dynamic(dynamic),
                    None => SpecEntry::Nested(Self::from_map(inner)?),
                },
                literal => SpecEntry::Literal(literal),
            };
            entries.insert(key, entry);
        }
        Ok(Self { entries })
    }
}

impl From<Map<String, Value>> for ConfigSpec {
    /// Plain map: every value literal, markers not interpreted
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, SpecEntry::Literal(v)))
                .collect(),
        }
    }
}

fn parse_marker(map: &Map<String, Value>) -> Result<Option<Dynamic>, ConfigError> {
    if map.len() != 1 {
        return Ok(None);
    }
    if let Some(values) = map.get(DYNAMIC_MARKER) {
        return match values {
            Value::Array(items) => Ok(Some(Dynamic::of(items.iter().cloned()))),
            other => Err(ConfigError::InvalidMarker {
                marker: DYNAMIC_MARKER.to_string(),
                reason: format!("expected a list, got {other}"),
            }),
        };
    }
    if let Some(args) = map.get(RANGE_MARKER) {
        let int = |name: &str, default: Option<i64>| -> Result<i64, ConfigError> {
            match args.get(name) {
                Some(v) => v.as_i64().ok_or_else(|| ConfigError::InvalidMarker {
                    marker: RANGE_MARKER.to_string(),
                    reason: format!("'{name}' must be an integer"),
                }),
                None => default.ok_or_else(|| ConfigError::InvalidMarker {
                    marker: RANGE_MARKER.to_string(),
                    reason: format!("missing '{name}'"),
                }),
            }
        };
        if !args.is_object() {
            return Err(ConfigError::InvalidMarker {
                marker: RANGE_MARKER.to_string(),
                reason: "expected a map with start/end/step".to_string(),
            });
        }
        let dynamic = Dynamic::range(int("start", Some(0))?, int("end", None)?, int("step", Some(1))?)?;
        return Ok(Some(dynamic));
    }
    Ok(None)
}
