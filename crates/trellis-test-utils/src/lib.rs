//! Testing utilities for the trellis workspace
//!
//! Shared fixtures: canned work units, config specs and log setup.

#![allow(missing_docs)]

use std::sync::Arc;

use serde_json::{json, Value};
use trellis_config::{ConfigSpec, Dynamic};
use trellis_core::{node_fn, ExperimentFn, Failure, Invocation, NodeSpec};

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Spec with one dynamic `config_id` per id, so variant ids are predictable
pub fn ids_spec(ids: &[&str]) -> ConfigSpec {
    ConfigSpec::new().dynamic("config_id", Dynamic::of(ids.iter().copied()))
}

/// Spec with a `config_id` and `model` pair per entry
pub fn models_spec(pairs: &[(&str, &str)]) -> Vec<ConfigSpec> {
    pairs
        .iter()
        .map(|(id, model)| ConfigSpec::new().literal("config_id", *id).literal("model", *model))
        .collect()
}

/// Work unit returning the bound `config_id`
pub fn report_config_id() -> Arc<dyn ExperimentFn> {
    node_fn(|inv: Invocation| async move {
        anyhow::Ok(inv.args.get("config_id").cloned().unwrap_or(Value::Null))
    })
}

/// Work unit that fails with `kind` when the bound `config_id` is in `failing`
pub fn failing_on(failing: &[&str], kind: &'static str) -> Arc<dyn ExperimentFn> {
    let failing: Vec<Value> = failing.iter().map(|id| json!(id)).collect();
    node_fn(move |inv: Invocation| {
        let id = inv.args.get("config_id").cloned().unwrap_or(Value::Null);
        let fails = failing.contains(&id);
        async move {
            if fails {
                return Err(Failure::new(kind, format!("config {id} rejected")).into());
            }
            anyhow::Ok(id)
        }
    })
}

/// Node reporting its `config_id`, configured with `ids`
pub fn id_node(name: &str, ids: &[&str]) -> NodeSpec {
    NodeSpec::new(name, report_config_id())
        .with_config(ids_spec(ids))
        .bind("config_id", "config_id")
}
