//! Nested experiments across strategies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use trellis_core::prelude::*;
use trellis_core::{InMemoryTracer, Random, BRANCH_SPAN, EXPERIMENT_SPAN};
use trellis_test_utils::{failing_on, id_node, ids_spec, init_test_logging};

fn outer_calling_inner() -> NodeSpec {
    NodeSpec::new(
        "outer",
        node_fn(|inv: Invocation| async move {
            let inner = inv.ctx.call("inner", Args::new()).await?;
            let own = inv.args.get("config_id").cloned().unwrap_or(Value::Null);
            anyhow::Ok(json!([own, inner]))
        }),
    )
    .with_config(ids_spec(&["o1", "o2"]))
    .bind("config_id", "config_id")
    .calls("inner")
}

fn chain(ids: &[ConfigId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn shadow_runs_main_in_foreground_and_all_others_in_background() {
    init_test_logging();
    let registry = Registry::new();
    let outer = registry
        .register(outer_calling_inner().with_strategy(StrategyKind::Shadow))
        .unwrap();
    registry.register(id_node("inner", &["i1", "i2"])).unwrap();

    let outcome = outer
        .runner()
        .with_wait_for_background(true)
        .with_return_all(true)
        .start(Args::new())
        .await
        .unwrap();

    assert_eq!(outcome.main_result, json!(["o1", "i1"]));
    let main = outcome.main_branch.as_ref().unwrap();
    assert!(main.default);
    assert_eq!(main.config_id, "o1");

    let mut variants: Vec<Vec<String>> = outcome
        .variant_results
        .iter()
        .map(|r| r.case.values().map(ToString::to_string).collect())
        .collect();
    variants.sort();
    assert_eq!(
        variants,
        vec![
            vec!["o1".to_string(), "i2".to_string()],
            vec!["o2".to_string(), "i1".to_string()],
            vec!["o2".to_string(), "i2".to_string()],
        ]
    );
    assert!(outcome.variant_results.iter().all(BranchResult::is_success));
    assert!(outcome.variant_results.iter().all(|r| !r.default));

    let mut tree: Vec<Vec<String>> = outcome
        .tree
        .as_ref()
        .unwrap()
        .iter()
        .map(|p| chain(&p.config_chain))
        .collect();
    tree.sort();
    assert_eq!(tree.len(), 4);
    assert_eq!(tree[0], vec!["o1", "i1"]);
    assert_eq!(tree[3], vec!["o2", "i2"]);

    assert_eq!(outcome.default_output(), Some(json!("i1")));
}

#[tokio::test]
async fn unconfigured_entry_multiplies_with_nested_variants() {
    let registry = Registry::new();
    let entry = registry
        .register(
            NodeSpec::new(
                "entry",
                node_fn(|inv: Invocation| async move {
                    anyhow::Ok(inv.ctx.call("leaf", Args::new()).await?)
                }),
            )
            .calls("leaf")
            .with_strategy(StrategyKind::MultiBranch),
        )
        .unwrap();
    registry.register(id_node("leaf", &["a", "b", "c"])).unwrap();

    let cases = registry.cases(entry.key()).unwrap();
    assert_eq!(cases.len(), 3);

    let out = entry.invoke(Args::new()).await.unwrap();
    let outputs: Vec<Value> = out
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["output"].clone())
        .collect();
    assert_eq!(outputs, vec![json!("a"), json!("b"), json!("c")]);
    assert_eq!(out[0]["config_id"], json!("default"));
    assert_eq!(out[0]["default"], json!(true));
    assert_eq!(out[1]["default"], json!(false));
}

#[tokio::test]
async fn main_failure_in_nested_node_reaches_caller_and_skips_variants() {
    let registry = Registry::new();
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let outer = registry
        .register(
            NodeSpec::new(
                "outer",
                node_fn(move |inv: Invocation| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async move { anyhow::Ok(inv.ctx.call("inner", Args::new()).await?) }
                }),
            )
            .with_config(ids_spec(&["o1", "o2"]))
            .calls("inner")
            .with_strategy(StrategyKind::Shadow),
        )
        .unwrap();
    registry
        .register(
            NodeSpec::new("inner", failing_on(&["i1"], "ValueError"))
                .with_config(ids_spec(&["i1", "i2"]))
                .bind("config_id", "config_id"),
        )
        .unwrap();

    let err = outer.invoke(Args::new()).await.unwrap_err();
    assert!(err.is_main_failure());
    assert_eq!(err.kind(), "ValueError");
    assert!(err.message().contains("rejected"));

    tokio::task::yield_now().await;
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn round_robin_rotates_through_cases() {
    let registry = Registry::new();
    let node = registry
        .register(id_node("rr", &["r0", "r1", "r2"]).with_strategy(StrategyKind::RoundRobin))
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(node.invoke(Args::new()).await.unwrap());
    }
    assert_eq!(seen, vec![json!("r0"), json!("r1"), json!("r2"), json!("r0")]);
}

#[tokio::test]
async fn round_robin_records_unselected_cases_as_skipped() {
    let registry = Registry::new();
    let node = registry
        .register(id_node("rr", &["r0", "r1", "r2"]).with_strategy(StrategyKind::RoundRobin))
        .unwrap();
    let outcome = node.runner().start(Args::new()).await.unwrap();
    assert_eq!(outcome.variant_results.len(), 2);
    assert_eq!(outcome.variant_results.skipped().count(), 2);
    assert_eq!(outcome.results().len(), 3);
}

#[tokio::test]
async fn seeded_random_picks_a_configured_case() {
    let registry = Registry::new();
    let node = registry
        .register(
            id_node("dice", &["x", "y", "z"]).with_strategy_impl(Arc::new(Random::seeded(42))),
        )
        .unwrap();
    for _ in 0..10 {
        let out = node.invoke(Args::new()).await.unwrap();
        assert!([json!("x"), json!("y"), json!("z")].contains(&out));
    }
    let outcome = node.runner().start(Args::new()).await.unwrap();
    assert_eq!(outcome.variant_results.skipped().count(), 2);
}

#[tokio::test]
async fn parallel_awaits_variants_before_returning() {
    let registry = Registry::new();
    let node = registry
        .register(
            NodeSpec::new("p", failing_on(&["b"], "KeyError"))
                .with_config(ids_spec(&["a", "b", "c"]))
                .bind("config_id", "config_id")
                .with_strategy(StrategyKind::Parallel),
        )
        .unwrap();
    let outcome = node.runner().start(Args::new()).await.unwrap();
    assert_eq!(outcome.main_result, json!("a"));
    assert_eq!(outcome.variant_results.len(), 2);
    assert_eq!(outcome.variant_results.failed().count(), 1);
    assert_eq!(outcome.background.pending(), 0);
}

#[tokio::test]
async fn parallel_main_failure_schedules_no_variants() {
    let registry = Registry::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = registry
        .register(
            NodeSpec::new(
                "p",
                node_fn(move |inv: Invocation| {
                    let counter = Arc::clone(&counter);
                    async move {
                        let id = inv.args.get("config_id").cloned().unwrap_or(Value::Null);
                        if id == json!("a") {
                            return Err(Failure::new("ValueError", "main rejected").into());
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(id)
                    }
                }),
            )
            .with_config(ids_spec(&["a", "b", "c"]))
            .bind("config_id", "config_id")
            .with_strategy(StrategyKind::Parallel),
        )
        .unwrap();

    let err = node.runner().start(Args::new()).await.unwrap_err();
    assert!(err.is_main_failure());
    assert_eq!(err.kind(), "ValueError");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shadow_primary_index_selects_foreground_case() {
    let registry = Registry::new();
    let node = registry
        .register(id_node("s", &["a", "b", "c"]).with_strategy(StrategyKind::Shadow))
        .unwrap();
    let config = RunConfig::new()
        .with_shadow_primary_index(2)
        .with_wait_for_background(true);
    let outcome = node.runner().with_config(config).start(Args::new()).await.unwrap();
    assert_eq!(outcome.main_result, json!("c"));
    let mut ids: Vec<String> = outcome
        .variant_results
        .iter()
        .map(|r| r.config_id.to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn tracer_sees_nested_spans() {
    let registry = Registry::new();
    let tracer = Arc::new(InMemoryTracer::new());
    registry.add_tracer(tracer.clone());
    let outer = registry.register(outer_calling_inner()).unwrap();
    registry.register(id_node("inner", &["i1", "i2"])).unwrap();

    outer.invoke(Args::new()).await.unwrap();

    let roots = tracer.roots();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].span.name, EXPERIMENT_SPAN);

    let outer_branches = tracer.children(roots[0].span.id);
    assert_eq!(outer_branches.len(), 1);
    assert_eq!(outer_branches[0].span.name, BRANCH_SPAN);
    assert_eq!(outer_branches[0].span.attributes["config_id"], json!("o1"));

    let inner_branches = tracer.children(outer_branches[0].span.id);
    assert_eq!(inner_branches.len(), 1);
    assert_eq!(inner_branches[0].span.attributes["node"], json!("inner"));
    assert!(tracer.records().iter().all(|r| r.ended && r.error.is_none()));
}

#[tokio::test]
async fn run_config_from_yaml_overrides_strategy() {
    let registry = Registry::new();
    let node = registry.register(id_node("n", &["a", "b"])).unwrap();
    let config = RunConfig::from_yaml("strategy: multi_branch\nreturn_all: true\n").unwrap();
    let outcome = node.runner().with_config(config).start(Args::new()).await.unwrap();
    assert_eq!(outcome.main_result.as_array().map(Vec::len), Some(2));
    assert_eq!(outcome.tree.map(|t| t.len()), Some(2));

    let err = RunConfig::from_yaml("strategy: bogus\n").unwrap_err();
    assert!(err.is_configuration());
}
