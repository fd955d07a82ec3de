//! Configuration variants and their identities
//!
//! A [`Variant`] is one concrete, immutable configuration. Its
//! [`ConfigId`] is either supplied through a `config_id` field or derived
//! from a Blake3 hash of the canonical (key-sorted) JSON of every other
//! field, so two variants with the same content always share an id.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::path::BindPath;

/// Field name that carries an explicit identity
pub const CONFIG_ID_FIELD: &str = "config_id";

/// Identity used for the synthetic variant of unconfigured nodes
pub const DEFAULT_CONFIG_ID: &str = "default";

/// Stable configuration identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    /// Create from any string
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of the synthetic default variant
    #[inline]
    #[must_use]
    pub fn default_id() -> Self {
        Self(DEFAULT_CONFIG_ID.to_string())
    }

    /// Derive identity from field content
    ///
    /// First 16 hex chars of the Blake3 hash of the canonical JSON.
    #[must_use]
    pub fn derive(fields: &Map<String, Value>) -> Self {
        let canonical = canonical_json(&Value::Object(fields.clone()));
        let hash = blake3::hash(canonical.as_bytes());
        Self(hex::encode(&hash.as_bytes()[..8]))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConfigId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConfigId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for ConfigId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ConfigId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Compact JSON with object keys sorted at every level
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// One concrete configuration
///
/// Immutable once built. Fields keep their declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Variant {
    config_id: ConfigId,
    fields: Map<String, Value>,
}

impl Variant {
    /// Build from a field map
    ///
    /// A `config_id` field (string or number) becomes the identity and is
    /// removed from the fields; otherwise the identity is derived.
    ///
    /// # Errors
    /// Returns error if `config_id` is present but not a string or number.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, ConfigError> {
        let config_id = match fields.shift_remove(CONFIG_ID_FIELD) {
            None => ConfigId::derive(&fields),
            Some(Value::String(s)) => ConfigId::new(s),
            Some(Value::Number(n)) => ConfigId::new(n.to_string()),
            Some(other) => {
                return Err(ConfigError::invalid(format!(
                    "config_id must be a string or number, got {other}"
                )))
            }
        };
        Ok(Self { config_id, fields })
    }

    /// Build with an explicit identity
    #[inline]
    #[must_use]
    pub fn with_id(config_id: impl Into<ConfigId>, fields: Map<String, Value>) -> Self {
        Self {
            config_id: config_id.into(),
            fields,
        }
    }

    /// Synthetic empty variant with id `default`
    #[inline]
    #[must_use]
    pub fn synthetic_default() -> Self {
        Self {
            config_id: ConfigId::default_id(),
            fields: Map::new(),
        }
    }

    /// Get identity
    #[inline]
    #[must_use]
    pub fn config_id(&self) -> &ConfigId {
        &self.config_id
    }

    /// Get fields (without `config_id`)
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Get a top-level field
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whole variant as a JSON object, `config_id` included
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(
            CONFIG_ID_FIELD.to_string(),
            Value::String(self.config_id.to_string()),
        );
        Value::Object(map)
    }

    /// Resolve a bind path against this variant
    ///
    /// The root path yields [`Variant::to_value`].
    ///
    /// # Errors
    /// Returns [`ConfigError::UnresolvedBindPath`] on a missing segment.
    pub fn resolve(&self, path: &BindPath) -> Result<Value, ConfigError> {
        let whole = self.to_value();
        path.resolve(&whole).cloned()
    }

    /// Check whether the identity was derived from content
    #[must_use]
    pub fn has_derived_id(&self) -> bool {
        ConfigId::derive(&self.fields) == self.config_id
    }
}

impl TryFrom<Value> for Variant {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::from_fields(map),
            other => Err(ConfigError::invalid(format!(
                "variant must be a map, got {other}"
            ))),
        }
    }
}

impl From<Variant> for Value {
    fn from(variant: Variant) -> Self {
        variant.to_value()
    }
}
