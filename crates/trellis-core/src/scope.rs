//! Execution scope tree
//!
//! One root [`Scope`] per top-level run. Every branch gets its own child
//! scope under the scope that was current when it started, so nested
//! experiments show up as nested scopes. The root has no branch.
//!
//! [`format_branch_results`] flattens the tree into one [`PathRecord`] per
//! leaf; [`get_default_output`] follows only default branches.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_config::ConfigId;

use crate::branch::{Branch, BranchResult};
use crate::error::BranchError;
use crate::types::{ExceptionInfo, NodeKey, Status};

/// Data recorded on a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeData {
    /// Node (function) the scope belongs to
    pub function: String,
    /// Snapshot of the call arguments
    pub args: Value,
}

#[derive(Debug)]
struct ScopeNode {
    data: ScopeData,
    branch: Mutex<Option<Branch>>,
    parent: Weak<ScopeNode>,
    children: Mutex<Vec<Arc<ScopeNode>>>,
}

/// Handle to one scope in the tree
#[derive(Debug, Clone)]
pub struct Scope(Arc<ScopeNode>);

impl Scope {
    /// Create a root scope
    #[must_use]
    pub fn root(data: ScopeData) -> Self {
        Self(Arc::new(ScopeNode {
            data,
            branch: Mutex::new(None),
            parent: Weak::new(),
            children: Mutex::new(Vec::new()),
        }))
    }

    /// Append a child scope owning `branch`
    #[must_use]
    pub fn child(&self, data: ScopeData, branch: Branch) -> Self {
        let node = Arc::new(ScopeNode {
            data,
            branch: Mutex::new(Some(branch)),
            parent: Arc::downgrade(&self.0),
            children: Mutex::new(Vec::new()),
        });
        self.0.children.lock().push(Arc::clone(&node));
        Self(node)
    }

    /// Parent scope, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.upgrade().map(Scope)
    }

    /// Check if this is a root scope
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.parent.upgrade().is_none()
    }

    /// Children in creation order
    #[must_use]
    pub fn children(&self) -> Vec<Scope> {
        self.0.children.lock().iter().cloned().map(Scope).collect()
    }

    /// Scope data
    #[inline]
    #[must_use]
    pub fn data(&self) -> &ScopeData {
        &self.0.data
    }

    /// Snapshot of the owned branch
    #[must_use]
    pub fn branch(&self) -> Option<BranchResult> {
        self.0.branch.lock().as_ref().map(Branch::to_result)
    }

    /// Apply a terminal transition to the owned branch
    pub(crate) fn finalize<F>(&self, transition: F) -> Result<BranchResult, BranchError>
    where
        F: FnOnce(&mut Branch) -> Result<(), BranchError>,
    {
        let mut guard = self.0.branch.lock();
        match guard.as_mut() {
            Some(branch) => {
                transition(branch)?;
                Ok(branch.to_result())
            }
            None => Err(BranchError::MissingBranch),
        }
    }

    /// Number of scopes in this subtree, self included
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(Scope::size).sum::<usize>()
    }
}

/// One entry along a result path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutput {
    /// Node that ran
    pub node: NodeKey,
    /// Its config
    pub config_id: ConfigId,
    /// Branch status
    pub status: Status,
    /// Output on success
    pub output: Option<Value>,
    /// Error on failure
    pub error: Option<ExceptionInfo>,
    /// Lies on the default path
    pub default: bool,
}

impl From<BranchResult> for ChainOutput {
    fn from(result: BranchResult) -> Self {
        Self {
            node: result.node,
            config_id: result.config_id,
            status: result.status,
            output: result.output,
            error: result.error,
            default: result.default,
        }
    }
}

/// Root-to-leaf path through the scope tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Config of every branch along the path
    pub config_chain: Vec<ConfigId>,
    /// Outputs collected along the path, same order
    pub outputs: Vec<ChainOutput>,
}

impl PathRecord {
    /// Output of the last branch on the path
    #[must_use]
    pub fn leaf(&self) -> Option<&ChainOutput> {
        self.outputs.last()
    }

    /// Check if every branch on the path succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outputs.iter().all(|o| o.status == Status::Success)
    }
}

/// Flatten the tree into one record per leaf
///
/// Leaves without any branch on their path are omitted.
#[must_use]
pub fn format_branch_results(root: &Scope) -> Vec<PathRecord> {
    let mut paths = Vec::new();
    collect_paths(root, &mut Vec::new(), &mut paths);
    paths
}

fn collect_paths(scope: &Scope, chain: &mut Vec<ChainOutput>, paths: &mut Vec<PathRecord>) {
    let pushed = match scope.branch() {
        Some(result) => {
            chain.push(result.into());
            true
        }
        None => false,
    };

    let children = scope.children();
    if children.is_empty() {
        if !chain.is_empty() {
            paths.push(PathRecord {
                config_chain: chain.iter().map(|o| o.config_id.clone()).collect(),
                outputs: chain.clone(),
            });
        }
    } else {
        for child in &children {
            collect_paths(child, chain, paths);
        }
    }

    if pushed {
        chain.pop();
    }
}

/// Output of the deepest branch reached by following default branches
#[must_use]
pub fn get_default_output(root: &Scope) -> Option<Value> {
    find_default(root)
}

fn find_default(scope: &Scope) -> Option<Value> {
    match scope.branch() {
        Some(branch) if branch.default => scope
            .children()
            .iter()
            .find_map(find_default)
            .or(branch.output),
        Some(_) => None,
        None => scope.children().iter().find_map(find_default),
    }
}
