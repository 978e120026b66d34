//! Action catalog: the fifteen atomic operations a plan step may invoke.

pub mod analysis;
pub mod graph;
pub mod retrieval;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::schemas::{ActionName, StepResult, TimeFilter};

/// An atomic, uniformly-typed operation invoked by plan steps.
///
/// Implementations never propagate errors through `Result`: every failure
/// mode (missing params, upstream I/O error, unexpected exception-analog)
/// is contained and reported as a failed [`StepResult`], matching the
/// executor's step-granularity containment policy.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> ActionName;

    async fn execute(&self, params: &Map<String, Value>, context: &crate::schemas::ExecutionContext) -> StepResult;
}

/// Per-execution-context registry of action instances, keyed by name.
///
/// Built once at startup via [`build_default_registry`] and shared
/// read-only across plan executions; tests may build their own registry
/// with stub actions instead of reaching for a process-global singleton.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionName, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name(), action);
    }

    pub fn get(&self, name: ActionName) -> Option<Arc<dyn Action>> {
        self.actions.get(&name).cloned()
    }

    pub fn list_actions(&self) -> Vec<ActionName> {
        self.actions.keys().copied().collect()
    }
}

/// Build the registry wired to the given stores and LLM client. `web` in
/// `stores` may be `None`; `web_search` degrades gracefully in that case.
pub fn build_default_registry(stores: Arc<crate::stores::Stores>, llm: Arc<dyn crate::llm::LlmClient>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(retrieval::SemanticSearch::new(stores.clone())));
    registry.register(Arc::new(retrieval::EntitySearch::new(stores.clone())));
    registry.register(Arc::new(retrieval::HierarchicalSearch::new(stores.clone())));
    registry.register(Arc::new(retrieval::TimeRangeNotes::new(stores.clone())));
    registry.register(Arc::new(retrieval::AggregatesQuery::new(stores.clone())));
    registry.register(Arc::new(graph::GraphExpand::new(stores.clone())));
    registry.register(Arc::new(graph::FindConnections::new(stores.clone())));
    registry.register(Arc::new(graph::GetCoOccurrences::new(stores.clone())));
    registry.register(Arc::new(graph::GetEntityContext::new(stores.clone())));
    registry.register(Arc::new(graph::FilterByEdgeType::new()));
    registry.register(Arc::new(analysis::ExtractPatterns::new(llm.clone())));
    registry.register(Arc::new(analysis::ComparePeriods::new(stores.clone(), llm.clone())));
    registry.register(Arc::new(analysis::TemporalSequence::new()));
    registry.register(Arc::new(analysis::MergeResults::new()));
    registry.register(Arc::new(web::WebSearch::new(stores)));
    registry
}

// ---- shared param-parsing helpers ----

pub(crate) fn step_id_of(params: &Map<String, Value>, action: ActionName) -> String {
    params.get("step_id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| action.as_str().to_string())
}

pub(crate) fn get_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn get_usize(params: &Map<String, Value>, key: &str, default: usize) -> usize {
    params.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

pub(crate) fn get_u32(params: &Map<String, Value>, key: &str, default: u32) -> u32 {
    params.get(key).and_then(Value::as_u64).map(|v| v as u32).unwrap_or(default)
}

pub(crate) fn get_f64(params: &Map<String, Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub(crate) fn get_time_filter(params: &Map<String, Value>) -> Option<TimeFilter> {
    TimeFilter::from_param(params.get("time_filter"))
}

pub(crate) fn get_str_list(params: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    params.get(key)?.as_array().map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

pub(crate) fn now_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Fetch the notes an analysis action should work over: from a referenced
/// step's `notes` field if `notes_ref` names one, otherwise from the
/// context's accumulated notes.
pub(crate) fn notes_from_ref_or_context(
    params: &Map<String, Value>,
    context: &crate::schemas::ExecutionContext,
) -> Vec<Value> {
    if let Some(notes_ref) = get_str(params, "notes_ref") {
        if let Some(result) = context.get_result(notes_ref) {
            if let Some(notes) = result.result.as_ref().and_then(|r| r.get("notes")).and_then(Value::as_array) {
                return notes.clone();
            }
        }
        Vec::new()
    } else {
        context.get_all_notes()
    }
}
