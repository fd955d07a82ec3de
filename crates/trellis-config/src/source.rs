//! Configuration sources
//!
//! A [`ConfigSource`] supplies raw [`ConfigSpec`]s to the expander.
//! Provided sources:
//! - [`InlineSource`]: specs built in code
//! - [`YamlSource`]: one map or a list of maps in YAML
//! - [`JsonSource`]: one map or a list of maps in JSON
//!
//! Documents use the `$dynamic` / `$range` markers described in
//! [`crate::spec`].

use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ConfigError;
use crate::expand::expand_all;
use crate::spec::ConfigSpec;
use crate::variant::{ConfigId, Variant};

/// Supplier of raw configuration specs
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    /// Load all specs
    ///
    /// # Errors
    /// Returns error if the source cannot be read or parsed.
    fn load(&self) -> Result<Vec<ConfigSpec>, ConfigError>;

    /// Load and expand into variants, in document order
    ///
    /// # Errors
    /// Propagates load and expansion errors.
    fn variants(&self) -> Result<Vec<Variant>, ConfigError> {
        let specs = self.load()?;
        expand_all(&specs)
    }
}

/// Specs held in memory
#[derive(Debug, Clone, Default)]
pub struct InlineSource {
    specs: Vec<ConfigSpec>,
}

impl InlineSource {
    /// Create from specs
    #[inline]
    #[must_use]
    pub fn new(specs: Vec<ConfigSpec>) -> Self {
        Self { specs }
    }
}

impl ConfigSource for InlineSource {
    fn load(&self) -> Result<Vec<ConfigSpec>, ConfigError> {
        Ok(self.specs.clone())
    }
}

/// YAML document source
#[derive(Debug, Clone)]
pub struct YamlSource {
    text: String,
}

impl YamlSource {
    /// Create from YAML text
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read YAML text from a file
    ///
    /// # Errors
    /// Returns error if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self { text })
    }
}

impl ConfigSource for YamlSource {
    fn load(&self) -> Result<Vec<ConfigSpec>, ConfigError> {
        if self.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = serde_yaml::from_str(&self.text)?;
        specs_from_document(value)
    }
}

/// JSON document source
#[derive(Debug, Clone)]
pub struct JsonSource {
    text: String,
}

impl JsonSource {
    /// Create from JSON text
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ConfigSource for JsonSource {
    fn load(&self) -> Result<Vec<ConfigSpec>, ConfigError> {
        let value: Value = serde_json::from_str(&self.text)?;
        specs_from_document(value)
    }
}

/// Interpret a parsed document as zero or more specs
///
/// # Errors
/// Returns error if the document is not null, a map, or a list of maps.
pub fn specs_from_document(value: Value) -> Result<Vec<ConfigSpec>, ConfigError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => Ok(vec![ConfigSpec::from_value(value)?]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                if item.is_object() {
                    ConfigSpec::from_value(item)
                } else {
                    Err(ConfigError::invalid(format!(
                        "config at index {i} must be a map, got {item}"
                    )))
                }
            })
            .collect(),
        other => Err(ConfigError::invalid(format!(
            "document must be a map or a list of maps, got {other}"
        ))),
    }
}

/// How two variant sets are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Concatenate
    #[default]
    Extend,
    /// Replace base variants that share a `config_id`, append the rest
    Override,
}

impl FromStr for MergeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extend" => Ok(Self::Extend),
            "override" => Ok(Self::Override),
            other => Err(ConfigError::UnknownMergeMode(other.to_string())),
        }
    }
}

/// Merge two variant sets
///
/// With [`MergeMode::Override`] a replaced variant keeps the position of
/// the base variant it replaces.
#[must_use]
pub fn merge_variants(base: Vec<Variant>, overrides: Vec<Variant>, mode: MergeMode) -> Vec<Variant> {
    match mode {
        MergeMode::Extend => base.into_iter().chain(overrides).collect(),
        MergeMode::Override => {
            let mut merged: IndexMap<ConfigId, Variant> = IndexMap::new();
            for variant in base.into_iter().chain(overrides) {
                merged.insert(variant.config_id().clone(), variant);
            }
            merged.into_values().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Dynamic;
    use serde_json::json;

    #[test]
    fn inline_source_expands() {
        let source = InlineSource::new(vec![
            ConfigSpec::new().dynamic("x", Dynamic::of([1, 2])),
            ConfigSpec::new().literal("y", 1),
        ]);
        assert_eq!(source.variants().unwrap().len(), 3);
    }

    #[test]
    fn yaml_single_map() {
        let source = YamlSource::new("model:\n  $dynamic: [a, b]\ntemp: 0.5\n");
        let variants = source.variants().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].get("model"), Some(&json!("a")));
        assert_eq!(variants[1].get("temp"), Some(&json!(0.5)));
    }

    #[test]
    fn yaml_list_of_maps() {
        let source = YamlSource::new("- config_id: one\n  x: 1\n- config_id: two\n  x: 2\n");
        let ids: Vec<String> = source
            .variants()
            .unwrap()
            .iter()
            .map(|v| v.config_id().to_string())
            .collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn yaml_empty_document() {
        assert!(YamlSource::new("").load().unwrap().is_empty());
    }

    #[test]
    fn yaml_scalar_rejected() {
        assert!(YamlSource::new("42").load().is_err());
        assert!(YamlSource::new("- 1\n- 2\n").load().is_err());
    }

    #[test]
    fn json_range_marker() {
        let source = JsonSource::new(r#"{"k": {"$range": {"start": 1, "end": 4}}}"#);
        assert_eq!(source.variants().unwrap().len(), 3);
    }

    #[test]
    fn merge_extend_and_override() {
        let v = |id: &str, x: i64| {
            Variant::from_fields(json!({"config_id": id, "x": x}).as_object().cloned().unwrap())
                .unwrap()
        };
        let base = vec![v("a", 1), v("b", 2)];
        let over = vec![v("b", 20), v("c", 3)];

        let extended = merge_variants(base.clone(), over.clone(), MergeMode::Extend);
        assert_eq!(extended.len(), 4);

        let overridden = merge_variants(base, over, MergeMode::Override);
        let got: Vec<(String, i64)> = overridden
            .iter()
            .map(|v| (v.config_id().to_string(), v.get("x").and_then(Value::as_i64).unwrap()))
            .collect();
        assert_eq!(
            got,
            vec![("a".into(), 1), ("b".into(), 20), ("c".into(), 3)]
        );
    }

    #[test]
    fn merge_mode_parse() {
        assert_eq!("extend".parse::<MergeMode>().unwrap(), MergeMode::Extend);
        assert_eq!("override".parse::<MergeMode>().unwrap(), MergeMode::Override);
        assert!("union".parse::<MergeMode>().is_err());
    }
}
