//! Span events around experiments and branches
//!
//! Runs and branches emit `on_start` / `on_end` to every registered
//! [`Tracer`]. Spans carry `{id, name, attributes, parent}`. Two tracers
//! ship with the crate:
//! - [`NoopTracer`]: discards everything
//! - [`InMemoryTracer`]: records spans and rebuilds the parent/child tree

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::types::ExceptionInfo;

/// Span name of a top-level or nested experiment
pub const EXPERIMENT_SPAN: &str = "experiment";

/// Span name of one branch
pub const BRANCH_SPAN: &str = "branch";

/// Span identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(Ulid);

impl SpanId {
    /// Generate new unique ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

/// One traced unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Span ID
    pub id: SpanId,
    /// `experiment` or `branch`
    pub name: String,
    /// Free-form attributes
    pub attributes: IndexMap<String, Value>,
    /// Enclosing span
    pub parent: Option<SpanId>,
    /// Start time
    pub started_at: DateTime<Utc>,
}

impl Span {
    /// Create span under `parent`
    #[must_use]
    pub fn new(name: impl Into<String>, parent: Option<SpanId>) -> Self {
        Self {
            id: SpanId::new(),
            name: name.into(),
            attributes: IndexMap::new(),
            parent,
            started_at: Utc::now(),
        }
    }

    /// Add attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Subscriber for span events
pub trait Tracer: Send + Sync + std::fmt::Debug {
    /// Span started
    fn on_start(&self, span: &Span);

    /// Span ended, with the error if the work failed
    fn on_end(&self, span: &Span, error: Option<&ExceptionInfo>);
}

/// Tracer that discards events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn on_start(&self, _span: &Span) {}

    fn on_end(&self, _span: &Span, _error: Option<&ExceptionInfo>) {}
}

/// Recorded span with its end state
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    /// The span
    pub span: Span,
    /// Has `on_end` been seen
    pub ended: bool,
    /// Error reported at end
    pub error: Option<ExceptionInfo>,
}

/// Tracer that keeps every span in memory
#[derive(Debug, Default)]
pub struct InMemoryTracer {
    spans: Mutex<IndexMap<SpanId, SpanRecord>>,
}

impl InMemoryTracer {
    /// Create empty tracer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in start order
    #[must_use]
    pub fn records(&self) -> Vec<SpanRecord> {
        self.spans.lock().values().cloned().collect()
    }

    /// Record by ID
    #[must_use]
    pub fn get(&self, id: SpanId) -> Option<SpanRecord> {
        self.spans.lock().get(&id).cloned()
    }

    /// Spans without a parent
    #[must_use]
    pub fn roots(&self) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .values()
            .filter(|r| r.span.parent.is_none())
            .cloned()
            .collect()
    }

    /// Direct children of `id`, in start order
    #[must_use]
    pub fn children(&self, id: SpanId) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .values()
            .filter(|r| r.span.parent == Some(id))
            .cloned()
            .collect()
    }

    /// Number of recorded spans
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }
}

impl Tracer for InMemoryTracer {
    fn on_start(&self, span: &Span) {
        self.spans.lock().insert(
            span.id,
            SpanRecord {
                span: span.clone(),
                ended: false,
                error: None,
            },
        );
    }

    fn on_end(&self, span: &Span, error: Option<&ExceptionInfo>) {
        let mut spans = self.spans.lock();
        let record = spans.entry(span.id).or_insert_with(|| SpanRecord {
            span: span.clone(),
            ended: false,
            error: None,
        });
        record.ended = true;
        record.error = error.cloned();
    }
}

/// Fan-out to registered tracers
#[derive(Debug, Clone, Default)]
pub(crate) struct TracerSet {
    tracers: Arc<RwLock<Vec<Arc<dyn Tracer>>>>,
}

impl TracerSet {
    pub(crate) fn add(&self, tracer: Arc<dyn Tracer>) {
        self.tracers.write().push(tracer);
    }

    pub(crate) fn start(&self, span: &Span) {
        for tracer in self.tracers.read().iter() {
            tracer.on_start(span);
        }
    }

    pub(crate) fn end(&self, span: &Span, error: Option<&ExceptionInfo>) {
        for tracer in self.tracers.read().iter() {
            tracer.on_end(span, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_tree() {
        let tracer = InMemoryTracer::new();
        let root = Span::new(EXPERIMENT_SPAN, None).with_attribute("node", "outer");
        let child = Span::new(BRANCH_SPAN, Some(root.id)).with_attribute("config_id", "o1");

        tracer.on_start(&root);
        tracer.on_start(&child);
        tracer.on_end(&child, None);
        tracer.on_end(
            &root,
            Some(&ExceptionInfo {
                kind: "E".into(),
                message: "m".into(),
                trace: String::new(),
            }),
        );

        assert_eq!(tracer.len(), 2);
        let roots = tracer.roots();
        assert_eq!(roots.len(), 1);
        assert!(roots[0].ended);
        assert_eq!(roots[0].error.as_ref().unwrap().kind, "E");

        let children = tracer.children(root.id);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].span.attributes["config_id"], "o1");
    }

    #[test]
    fn tracer_set_fans_out() {
        let a = Arc::new(InMemoryTracer::new());
        let b = Arc::new(InMemoryTracer::new());
        let set = TracerSet::default();
        set.add(a.clone());
        set.add(b.clone());
        set.add(Arc::new(NoopTracer));

        let span = Span::new(BRANCH_SPAN, None);
        set.start(&span);
        set.end(&span, None);
        assert_eq!(a.len(), 1);
        assert!(b.get(span.id).unwrap().ended);
    }
}
