//! Case enumeration across a call graph
//!
//! Starting at an entry node, walks resolved inner calls depth-first and
//! collects one axis of variants per distinct node, in order of first
//! discovery. The Cartesian product over those axes, in odometer order
//! (first axis slowest), is the case set:
//! - The first element is the main case: the first variant of every node
//! - Every other element is a variant case
//!
//! A node reachable along several paths contributes one axis. A node that
//! is already on the current path is not expanded again, so cycles
//! terminate.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use trellis_config::{product_size, ConfigError, ConfigId, Variant};

use crate::node::Node;
use crate::types::NodeKey;

/// One full variant assignment across the call graph
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentCase {
    index: usize,
    assignments: IndexMap<NodeKey, Arc<Variant>>,
}

impl ExperimentCase {
    /// Position in the case set; `0` is the main case
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Check if this is the main case
    #[inline]
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.index == 0
    }

    /// Variant assigned to `node`
    #[inline]
    #[must_use]
    pub fn get(&self, node: &NodeKey) -> Option<&Arc<Variant>> {
        self.assignments.get(node)
    }

    /// Config assigned to `node`
    #[must_use]
    pub fn config_id(&self, node: &NodeKey) -> Option<&ConfigId> {
        self.assignments.get(node).map(|v| v.config_id())
    }

    /// Node to variant, in discovery order
    #[inline]
    pub fn assignments(&self) -> impl Iterator<Item = (&NodeKey, &Arc<Variant>)> {
        self.assignments.iter()
    }

    /// Node key to config, for reporting
    #[must_use]
    pub fn summary(&self) -> IndexMap<String, ConfigId> {
        self.assignments
            .iter()
            .map(|(k, v)| (k.to_string(), v.config_id().clone()))
            .collect()
    }

    /// Number of assigned nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Check if no node is assigned
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Main case plus variant cases for one entry node
#[derive(Debug, Clone)]
pub struct CaseSet {
    cases: Vec<Arc<ExperimentCase>>,
}

impl CaseSet {
    /// The main case
    #[inline]
    #[must_use]
    pub fn main(&self) -> &Arc<ExperimentCase> {
        &self.cases[0]
    }

    /// Every case except the main one
    #[inline]
    #[must_use]
    pub fn variants(&self) -> &[Arc<ExperimentCase>] {
        &self.cases[1..]
    }

    /// All cases, main first
    #[inline]
    #[must_use]
    pub fn all(&self) -> &[Arc<ExperimentCase>] {
        &self.cases
    }

    /// Total number of cases (never zero)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Check if there are no cases
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Enumerate all cases reachable from `root`
///
/// `lookup` resolves node keys; unresolved keys contribute nothing.
///
/// # Errors
/// Returns a configuration error if `root` is unknown, if the product is
/// empty (some node has no variants and the default was suppressed), or if
/// the number of cases overflows.
pub fn enumerate_cases<F>(root: &NodeKey, lookup: F) -> Result<CaseSet, ConfigError>
where
    F: Fn(&NodeKey) -> Option<Arc<Node>>,
{
    let root_node =
        lookup(root).ok_or_else(|| ConfigError::invalid(format!("unknown node '{root}'")))?;

    let mut axes: Vec<(NodeKey, Vec<Arc<Variant>>)> = Vec::new();
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    collect(&root_node, &lookup, &mut axes, &mut visited, &mut path);

    if let Some((key, _)) = axes.iter().find(|(_, variants)| variants.is_empty()) {
        return Err(ConfigError::EmptyExpansion(format!(
            "node '{key}' has no configuration variants and requires them"
        )));
    }

    let total = product_size(axes.iter().map(|(_, v)| v.len()))?;
    let mut cases = Vec::with_capacity(total);
    for n in 0..total {
        let mut rem = n;
        let mut picks = vec![0usize; axes.len()];
        for (i, (_, variants)) in axes.iter().enumerate().rev() {
            picks[i] = rem % variants.len();
            rem /= variants.len();
        }
        let assignments = axes
            .iter()
            .zip(&picks)
            .map(|((key, variants), &pick)| (key.clone(), Arc::clone(&variants[pick])))
            .collect();
        cases.push(Arc::new(ExperimentCase {
            index: n,
            assignments,
        }));
    }

    tracing::debug!(
        root = %root,
        nodes = axes.len(),
        cases = cases.len(),
        "enumerated experiment cases"
    );
    Ok(CaseSet { cases })
}

fn collect<F>(
    node: &Arc<Node>,
    lookup: &F,
    axes: &mut Vec<(NodeKey, Vec<Arc<Variant>>)>,
    visited: &mut HashSet<NodeKey>,
    path: &mut Vec<NodeKey>,
) where
    F: Fn(&NodeKey) -> Option<Arc<Node>>,
{
    if !visited.insert(node.key().clone()) {
        return;
    }
    axes.push((node.key().clone(), node.axis()));
    path.push(node.key().clone());

    for callee in node.resolved_calls() {
        if path.contains(&callee) {
            tracing::warn!(from = %node.key(), to = %callee, "call cycle detected, not expanding again");
            continue;
        }
        if let Some(inner) = lookup(&callee) {
            collect(&inner, lookup, axes, visited, path);
        }
    }

    path.pop();
}
