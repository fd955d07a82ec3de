//! Configuration expander
//!
//! Turns a [`ConfigSpec`] into the full list of [`Variant`]s:
//! - Every dynamic leaf, at any nesting depth, is one axis keyed by its path
//! - The product is taken in odometer order: the first axis found varies
//!   slowest, the last varies fastest
//! - Each combination is written into a copy of the literal skeleton and
//!   gets its identity assigned or derived
//!
//! A spec without dynamic leaves expands to exactly one variant. A dynamic
//! leaf with no alternatives makes the product empty.

use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::path::BindPath;
use crate::spec::{ConfigSpec, SpecEntry};
use crate::variant::Variant;

/// One product axis
#[derive(Debug, Clone)]
struct Axis<'a> {
    path: BindPath,
    values: &'a [Value],
}

/// Expand one spec into concrete variants
///
/// # Errors
/// Returns error if a resulting variant carries an unusable `config_id`,
/// or if the number of combinations overflows.
pub fn expand(spec: &ConfigSpec) -> Result<Vec<Variant>, ConfigError> {
    let mut axes = Vec::new();
    collect_axes(spec, &BindPath::root(), &mut axes);
    let skeleton = skeleton(spec);

    let total = product_size(axes.iter().map(|a| a.values.len()))?;
    if total == 0 {
        tracing::debug!(axes = axes.len(), "dynamic leaf with no values, spec expands to nothing");
        return Ok(Vec::new());
    }

    let mut variants = Vec::with_capacity(total);
    let mut indices = vec![0usize; axes.len()];
    for n in 0..total {
        let mut rem = n;
        for (i, axis) in axes.iter().enumerate().rev() {
            indices[i] = rem % axis.values.len();
            rem /= axis.values.len();
        }

        let mut fields = skeleton.clone();
        for (axis, &idx) in axes.iter().zip(&indices) {
            set_path(&mut fields, axis.path.segments(), axis.values[idx].clone());
        }
        variants.push(Variant::from_fields(fields)?);
    }

    tracing::debug!(axes = axes.len(), variants = variants.len(), "expanded configuration spec");
    Ok(variants)
}

/// Number of combinations over axes of the given sizes
///
/// # Errors
/// Returns [`ConfigError::ProductOverflow`] if the product does not fit in
/// `usize`. Any empty axis makes the product zero.
pub fn product_size<I>(sizes: I) -> Result<usize, ConfigError>
where
    I: IntoIterator<Item = usize>,
{
    let sizes: Vec<usize> = sizes.into_iter().collect();
    if sizes.contains(&0) {
        return Ok(0);
    }
    sizes
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or(ConfigError::ProductOverflow { axes: sizes.len() })
}

/// Expand several specs and concatenate in order
///
/// # Errors
/// Propagates the first expansion error.
pub fn expand_all<'a, I>(specs: I) -> Result<Vec<Variant>, ConfigError>
where
    I: IntoIterator<Item = &'a ConfigSpec>,
{
    let mut out = Vec::new();
    for spec in specs {
        out.extend(expand(spec)?);
    }
    Ok(out)
}

fn collect_axes<'a>(spec: &'a ConfigSpec, prefix: &BindPath, axes: &mut Vec<Axis<'a>>) {
    for (key, entry) in spec.entries() {
        match entry {
            SpecEntry::Literal(_) => {}
            SpecEntry::Dynamic(dynamic) => axes.push(Axis {
                path: prefix.child(key.clone()),
                values: dynamic.values(),
            }),
            SpecEntry::Nested(inner) => collect_axes(inner, &prefix.child(key.clone()), axes),
        }
    }
}

/// Literal content with dynamic leaves left as `null`
fn skeleton(spec: &ConfigSpec) -> Map<String, Value> {
    spec.entries()
        .map(|(key, entry)| {
            let value = match entry {
                SpecEntry::Literal(v) => v.clone(),
                SpecEntry::Dynamic(_) => Value::Null,
                SpecEntry::Nested(inner) => Value::Object(skeleton(inner)),
            };
            (key.clone(), value)
        })
        .collect()
}

fn set_path(fields: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Dynamic;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn no_dynamic_leaves_is_one_variant() {
        let spec = ConfigSpec::new().literal("model", "a");
        let variants = expand(&spec).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].get("model"), Some(&json!("a")));
    }

    #[test]
    fn empty_spec_is_one_variant() {
        assert_eq!(expand(&ConfigSpec::new()).unwrap().len(), 1);
    }

    #[test]
    fn odometer_order() {
        let spec = ConfigSpec::new()
            .dynamic("model", Dynamic::of(["a", "b"]))
            .dynamic("temp", Dynamic::of([1, 2]));
        let got: Vec<Value> = expand(&spec)
            .unwrap()
            .iter()
            .map(|v| Value::Object(v.fields().clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                json!({"model": "a", "temp": 1}),
                json!({"model": "a", "temp": 2}),
                json!({"model": "b", "temp": 1}),
                json!({"model": "b", "temp": 2}),
            ]
        );
    }

    #[test]
    fn nested_dynamic_leaves() {
        let spec = ConfigSpec::new().literal("name", "x").nested(
            "llm",
            ConfigSpec::new()
                .literal("provider", "p")
                .dynamic("temp", Dynamic::of([0.0, 1.0])),
        );
        let variants = expand(&spec).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(
            Value::Object(variants[1].fields().clone()),
            json!({"name": "x", "llm": {"provider": "p", "temp": 1.0}})
        );
    }

    #[test]
    fn empty_axis_yields_nothing() {
        let spec = ConfigSpec::new()
            .dynamic("model", Dynamic::of(["a", "b"]))
            .dynamic("none", Dynamic::of(Vec::<Value>::new()));
        assert!(expand(&spec).unwrap().is_empty());
    }

    #[test]
    fn distinct_ids_per_combination() {
        let spec = ConfigSpec::new()
            .dynamic("a", Dynamic::of([1, 2, 3]))
            .dynamic("b", Dynamic::of([true, false]));
        let variants = expand(&spec).unwrap();
        let mut ids: Vec<_> = variants.iter().map(|v| v.config_id().clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn dynamic_config_id_becomes_identity() {
        let spec = ConfigSpec::new()
            .dynamic("config_id", Dynamic::of(["first", "second"]))
            .literal("x", 1);
        let ids: Vec<String> = expand(&spec)
            .unwrap()
            .iter()
            .map(|v| v.config_id().to_string())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn expand_all_concatenates() {
        let a = ConfigSpec::new().dynamic("x", Dynamic::of([1, 2]));
        let b = ConfigSpec::new().literal("y", 3);
        assert_eq!(expand_all([&a, &b]).unwrap().len(), 3);
    }

    #[test]
    fn product_size_checks_overflow() {
        assert_eq!(product_size([2, 3, 4]).unwrap(), 24);
        assert_eq!(product_size([]).unwrap(), 1);
        assert_eq!(product_size([usize::MAX, 0]).unwrap(), 0);
        assert!(matches!(
            product_size([usize::MAX, 2]),
            Err(ConfigError::ProductOverflow { axes: 2 })
        ));
    }

    #[test]
    fn oversized_spec_is_rejected() {
        let spec = (0..usize::BITS).fold(ConfigSpec::new(), |spec, i| {
            spec.dynamic(format!("k{i}"), Dynamic::of([0, 1]))
        });
        assert!(matches!(
            expand(&spec),
            Err(ConfigError::ProductOverflow { .. })
        ));
    }
}
