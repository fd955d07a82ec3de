//! Branch lifecycle
//!
//! A [`Branch`] is one execution attempt of one node under one fixed
//! variant assignment:
//! - Created pending with a start timestamp
//! - Finalized exactly once as success, failed or skipped
//! - Converted to a [`BranchResult`] record for reporting
//!
//! A second terminal transition is a usage bug and returns
//! [`BranchError::AlreadyFinalized`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_config::{ConfigId, Variant};
use ulid::Ulid;

use crate::error::BranchError;
use crate::types::{ExceptionInfo, NodeKey, Status};

/// Branch identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(Ulid);

impl BranchId {
    /// Generate new unique ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One execution attempt
#[derive(Debug, Clone)]
pub struct Branch {
    id: BranchId,
    node: NodeKey,
    variant: Arc<Variant>,
    assignments: IndexMap<String, ConfigId>,
    is_default: bool,
    start_ts: DateTime<Utc>,
    started: Instant,
    end_ts: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
    status: Status,
    output: Option<Value>,
    exception: Option<ExceptionInfo>,
    skip_reason: Option<String>,
}

impl Branch {
    /// Start a pending branch
    #[must_use]
    pub fn start(node: NodeKey, variant: Arc<Variant>) -> Self {
        Self {
            id: BranchId::new(),
            node,
            variant,
            assignments: IndexMap::new(),
            is_default: false,
            start_ts: Utc::now(),
            started: Instant::now(),
            end_ts: None,
            elapsed: None,
            status: Status::Pending,
            output: None,
            exception: None,
            skip_reason: None,
        }
    }

    /// Mark as lying on the default path
    #[inline]
    #[must_use]
    pub fn as_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Record the full case assignment this branch ran under
    #[inline]
    #[must_use]
    pub fn with_assignments(mut self, assignments: IndexMap<String, ConfigId>) -> Self {
        self.assignments = assignments;
        self
    }

    /// Finalize with an output
    ///
    /// # Errors
    /// Returns [`BranchError::AlreadyFinalized`] if already terminal.
    pub fn mark_success(&mut self, output: Value) -> Result<(), BranchError> {
        self.finalize(Status::Success)?;
        self.output = Some(output);
        Ok(())
    }

    /// Finalize with an error
    ///
    /// # Errors
    /// Returns [`BranchError::AlreadyFinalized`] if already terminal.
    pub fn mark_failed(&mut self, error: ExceptionInfo) -> Result<(), BranchError> {
        self.finalize(Status::Failed)?;
        self.exception = Some(error);
        Ok(())
    }

    /// Finalize as not run
    ///
    /// # Errors
    /// Returns [`BranchError::AlreadyFinalized`] if already terminal.
    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<(), BranchError> {
        self.finalize(Status::Skipped)?;
        self.skip_reason = Some(reason.into());
        Ok(())
    }

    fn finalize(&mut self, status: Status) -> Result<(), BranchError> {
        if self.status.is_terminal() {
            return Err(BranchError::AlreadyFinalized {
                config_id: self.variant.config_id().to_string(),
                status: self.status,
            });
        }
        self.status = status;
        self.end_ts = Some(Utc::now());
        self.elapsed = Some(self.started.elapsed());
        Ok(())
    }

    /// Get branch ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> BranchId {
        self.id
    }

    /// Get node key
    #[inline]
    #[must_use]
    pub fn node(&self) -> &NodeKey {
        &self.node
    }

    /// Get config identity
    #[inline]
    #[must_use]
    pub fn config_id(&self) -> &ConfigId {
        self.variant.config_id()
    }

    /// Get bound variant
    #[inline]
    #[must_use]
    pub fn variant(&self) -> &Arc<Variant> {
        &self.variant
    }

    /// Get status
    #[inline]
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Check if branch lies on the default path
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Get output, if successful
    #[inline]
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Get captured error, if failed
    #[inline]
    #[must_use]
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    /// Start timestamp
    #[inline]
    #[must_use]
    pub fn start_ts(&self) -> DateTime<Utc> {
        self.start_ts
    }

    /// End timestamp, once terminal
    #[inline]
    #[must_use]
    pub fn end_ts(&self) -> Option<DateTime<Utc>> {
        self.end_ts
    }

    /// Elapsed time, once terminal
    #[inline]
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Result record for reporting
    #[must_use]
    pub fn to_result(&self) -> BranchResult {
        BranchResult {
            branch_id: self.id,
            node: self.node.clone(),
            config_id: self.config_id().clone(),
            case: self.assignments.clone(),
            status: self.status,
            output: self.output.clone(),
            error: self.exception.clone(),
            skip_reason: self.skip_reason.clone(),
            duration_ms: self.elapsed.map(|d| d.as_secs_f64() * 1000.0),
            default: self.is_default,
        }
    }
}

/// Immutable report of one branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    /// Branch ID
    pub branch_id: BranchId,
    /// Node that ran
    pub node: NodeKey,
    /// Config of that node
    pub config_id: ConfigId,
    /// Full case assignment, node key to config
    pub case: IndexMap<String, ConfigId>,
    /// Terminal (or pending) status
    pub status: Status,
    /// Output on success
    pub output: Option<Value>,
    /// Error summary on failure
    pub error: Option<ExceptionInfo>,
    /// Why the branch was skipped
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skip_reason: Option<String>,
    /// Elapsed milliseconds
    pub duration_ms: Option<f64>,
    /// Lies on the default path
    pub default: bool,
}

impl BranchResult {
    /// Check if successful
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Check if failed
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    /// Config assigned to `node` in this branch's case
    #[must_use]
    pub fn assigned(&self, node: &str) -> Option<&ConfigId> {
        self.case.get(node)
    }
}

/// Ordered collection of branch results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSet {
    branches: Vec<BranchResult>,
}

impl BranchSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result
    #[inline]
    pub fn push(&mut self, result: BranchResult) {
        self.branches.push(result);
    }

    /// Successful branches
    pub fn successful(&self) -> impl Iterator<Item = &BranchResult> {
        self.branches.iter().filter(|b| b.status == Status::Success)
    }

    /// Failed branches
    pub fn failed(&self) -> impl Iterator<Item = &BranchResult> {
        self.branches.iter().filter(|b| b.status == Status::Failed)
    }

    /// Skipped branches
    pub fn skipped(&self) -> impl Iterator<Item = &BranchResult> {
        self.branches.iter().filter(|b| b.status == Status::Skipped)
    }

    /// First branch with the given config
    #[must_use]
    pub fn by_config_id(&self, config_id: &str) -> Option<&BranchResult> {
        self.branches.iter().find(|b| b.config_id == config_id)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &BranchResult> {
        self.branches.iter()
    }

    /// Get number of results
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl FromIterator<BranchResult> for BranchSet {
    fn from_iter<I: IntoIterator<Item = BranchResult>>(iter: I) -> Self {
        Self {
            branches: iter.into_iter().collect(),
        }
    }
}

impl Extend<BranchResult> for BranchSet {
    fn extend<I: IntoIterator<Item = BranchResult>>(&mut self, iter: I) {
        self.branches.extend(iter);
    }
}

impl IntoIterator for BranchSet {
    type Item = BranchResult;
    type IntoIter = std::vec::IntoIter<BranchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.branches.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(id: &str) -> Arc<Variant> {
        Arc::new(Variant::with_id(id, serde_json::Map::new()))
    }

    #[test]
    fn lifecycle_success() {
        let mut branch = Branch::start("node".into(), variant("c1"));
        assert_eq!(branch.status(), Status::Pending);
        assert!(branch.duration().is_none());
        assert!(branch.end_ts().is_none());

        branch.mark_success(json!("out")).unwrap();
        assert_eq!(branch.status(), Status::Success);
        assert!(branch.duration().is_some());
        assert!(branch.end_ts().unwrap() >= branch.start_ts());

        let result = branch.to_result();
        assert_eq!(result.config_id, "c1");
        assert_eq!(result.output, Some(json!("out")));
        assert!(result.duration_ms.is_some());
        assert_eq!(branch.status(), Status::Success);
    }

    #[test]
    fn second_finalize_is_error() {
        let mut branch = Branch::start("node".into(), variant("c1"));
        branch.mark_skipped("not selected").unwrap();
        let err = branch.mark_success(json!(1)).unwrap_err();
        assert_eq!(
            err,
            BranchError::AlreadyFinalized {
                config_id: "c1".into(),
                status: Status::Skipped
            }
        );
        assert!(branch.output().is_none());
    }

    #[test]
    fn failed_branch_keeps_exception() {
        let mut branch = Branch::start("node".into(), variant("c2")).as_default(true);
        branch
            .mark_failed(ExceptionInfo {
                kind: "ValueError".into(),
                message: "bad".into(),
                trace: String::new(),
            })
            .unwrap();
        let result = branch.to_result();
        assert!(result.is_failed());
        assert!(result.default);
        assert_eq!(result.error.unwrap().kind, "ValueError");
    }

    #[test]
    fn branch_set_queries() {
        let mut ok = Branch::start("n".into(), variant("a"));
        ok.mark_success(json!(1)).unwrap();
        let mut bad = Branch::start("n".into(), variant("b"));
        bad.mark_failed(ExceptionInfo {
            kind: "E".into(),
            message: "m".into(),
            trace: String::new(),
        })
        .unwrap();
        let mut skip = Branch::start("n".into(), variant("c"));
        skip.mark_skipped("rotation").unwrap();

        let set: BranchSet = [ok, bad, skip].iter().map(Branch::to_result).collect();
        assert_eq!(set.len(), 3);
        assert_eq!(set.successful().count(), 1);
        assert_eq!(set.failed().count(), 1);
        assert_eq!(set.skipped().count(), 1);
        assert_eq!(set.by_config_id("b").unwrap().status, Status::Failed);
        assert!(set.by_config_id("z").is_none());
    }
}
