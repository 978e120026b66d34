//! Typed plan/result records shared by the classifier, planner, executor,
//! and action catalog.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Detected or declared category of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Relationship,
    MemoryRecall,
    Comparison,
    Correlation,
    WebAugmented,
    MultiEntity,
    Simple,
}

/// Closed enumeration of the fifteen actions a plan step may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    SemanticSearch,
    EntitySearch,
    HierarchicalSearch,
    TimeRangeNotes,
    AggregatesQuery,
    GraphExpand,
    FindConnections,
    GetCoOccurrences,
    GetEntityContext,
    ExtractPatterns,
    ComparePeriods,
    TemporalSequence,
    MergeResults,
    FilterByEdgeType,
    WebSearch,
}

impl ActionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::SemanticSearch => "semantic_search",
            ActionName::EntitySearch => "entity_search",
            ActionName::HierarchicalSearch => "hierarchical_search",
            ActionName::TimeRangeNotes => "time_range_notes",
            ActionName::AggregatesQuery => "aggregates_query",
            ActionName::GraphExpand => "graph_expand",
            ActionName::FindConnections => "find_connections",
            ActionName::GetCoOccurrences => "get_co_occurrences",
            ActionName::GetEntityContext => "get_entity_context",
            ActionName::ExtractPatterns => "extract_patterns",
            ActionName::ComparePeriods => "compare_periods",
            ActionName::TemporalSequence => "temporal_sequence",
            ActionName::MergeResults => "merge_results",
            ActionName::FilterByEdgeType => "filter_by_edge_type",
            ActionName::WebSearch => "web_search",
        }
    }
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed edge-type vocabulary used by graph actions.
pub const EDGE_TYPES: &[&str] = &[
    "ABOUT_TOPIC",
    "STUDIED_WHILE",
    "LISTENED_TO",
    "WATCHED",
    "USED_APP",
    "VISITED_DOMAIN",
    "CO_OCCURRED_WITH",
    "DOC_REFERENCE",
];

/// A time interval, optionally described by a natural-language phrase.
///
/// Accepts three input forms when parsed from step parameters: a mapping
/// with only `description` (resolved by an external time-expression
/// parser, represented here as [`TimeFilter::from_description`] returning
/// an unresolved filter the caller must still interpret), a mapping with
/// ISO-8601 `start`/`end`, or a bare description string. Absent input
/// yields "no filter" (`None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TimeFilter {
    pub fn from_description(description: impl Into<String>) -> Self {
        Self { start: None, end: None, description: Some(description.into()) }
    }

    /// Parse a `time_filter` parameter value in any of the forms the spec
    /// mandates. Returns `None` when the value is absent or unrecognized.
    pub fn from_param(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        match value {
            Value::String(s) => Some(Self::from_description(s.clone())),
            Value::Object(map) => {
                if let Some(Value::String(desc)) = map.get("description") {
                    if !map.contains_key("start") && !map.contains_key("end") {
                        return Some(Self::from_description(desc.clone()));
                    }
                }
                let start = map
                    .get("start")
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                let end = map
                    .get("end")
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                if start.is_some() || end.is_some() {
                    let description = map
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| "custom range".to_string());
                    Some(Self { start, end, description: Some(description) })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn default_timeout_seconds() -> f64 {
    10.0
}

fn clamp_timeout(v: f64) -> f64 {
    v.clamp(1.0, 30.0)
}

/// A single step in an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub action: ActionName,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

impl PlanStep {
    /// Build a step, generating a random token step_id if `step_id` is
    /// empty. This mirrors the schema-level fallback in the reference
    /// implementation; the planner's own index-based backfill (§4.2) is
    /// expected to run first and handle the common case.
    pub fn new(step_id: impl Into<String>, action: ActionName, description: impl Into<String>) -> Self {
        let step_id = step_id.into();
        let step_id = if step_id.is_empty() { random_step_id() } else { step_id };
        Self {
            step_id,
            action,
            params: Map::new(),
            depends_on: Vec::new(),
            required: true,
            timeout_seconds: default_timeout_seconds(),
            description: description.into(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = clamp_timeout(timeout_seconds);
        self
    }
}

pub fn random_step_id() -> String {
    format!("s{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlanValidationError {
    #[error("plan must have between 1 and 10 steps, got {0}")]
    StepCountOutOfRange(usize),
    #[error("step {0} depends on unknown step {1}")]
    DanglingDependency(String, String),
    #[error("circular dependency detected among steps: {0:?}")]
    CircularDependency(Vec<String>),
    #[error("step {0} has timeout_seconds {1} outside the allowed range [1.0, 30.0]")]
    StepTimeoutOutOfRange(String, f64),
    #[error("estimated_time_seconds {0} outside the allowed range [0.0, 30.0]")]
    EstimatedTimeOutOfRange(f64),
}

/// Complete execution plan for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub plan_id: String,
    pub query: String,
    pub query_type: QueryType,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
    #[serde(default = "default_timeout_seconds")]
    pub estimated_time_seconds: f64,
    #[serde(default)]
    pub requires_web_search: bool,
}

impl QueryPlan {
    /// Validate structural invariants: step count bounds, per-step and
    /// plan-level timeout bounds, dependency references, and
    /// (transitively, via `get_execution_order`) acyclicity.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() || self.steps.len() > 10 {
            return Err(PlanValidationError::StepCountOutOfRange(self.steps.len()));
        }
        if !(0.0..=30.0).contains(&self.estimated_time_seconds) {
            return Err(PlanValidationError::EstimatedTimeOutOfRange(self.estimated_time_seconds));
        }
        let step_ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            if !(1.0..=30.0).contains(&step.timeout_seconds) {
                return Err(PlanValidationError::StepTimeoutOutOfRange(step.step_id.clone(), step.timeout_seconds));
            }
            for dep in &step.depends_on {
                if !step_ids.contains(dep.as_str()) {
                    return Err(PlanValidationError::DanglingDependency(
                        step.step_id.clone(),
                        dep.clone(),
                    ));
                }
            }
        }
        self.get_execution_order()?;
        Ok(())
    }

    /// Group steps into execution phases via Kahn's algorithm. Each phase
    /// is the maximal set of not-yet-completed steps whose dependencies
    /// are all satisfied. Returns an error if a cycle prevents progress.
    pub fn get_execution_order(&self) -> Result<Vec<Vec<String>>, PlanValidationError> {
        let mut remaining: HashMap<&str, HashSet<&str>> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.depends_on.iter().map(String::as_str).collect()))
            .collect();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut phases: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_subset(&completed))
                .map(|(id, _)| *id)
                .collect();
            ready.sort_unstable();

            if ready.is_empty() {
                let mut stuck: Vec<String> = remaining.keys().map(|s| s.to_string()).collect();
                stuck.sort();
                return Err(PlanValidationError::CircularDependency(stuck));
            }

            for id in &ready {
                remaining.remove(id);
                completed.insert(id);
            }
            phases.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(phases)
    }
}

/// Result of executing a single plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub action: ActionName,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
}

impl StepResult {
    pub fn ok(step_id: impl Into<String>, action: ActionName, result: Value, execution_time_ms: f64) -> Self {
        Self {
            step_id: step_id.into(),
            action,
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
        }
    }

    pub fn fail(step_id: impl Into<String>, action: ActionName, error: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            step_id: step_id.into(),
            action,
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

fn value_get_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.as_object()?.get(key)?.as_str()
}

fn value_get_array<'a>(v: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    v.as_object()?.get(key)?.as_array()
}

/// Append-only accumulator plus step-result map, owned exclusively by the
/// executor for the duration of one plan execution. Actions receive a
/// shared, read-only view; only the executor appends, and only between
/// phases (§5), so within-phase reads never race with writes.
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    results: HashMap<String, StepResult>,
    result_order: Vec<String>,
    notes: Vec<Value>,
    entities: Vec<Value>,
    aggregates: Vec<Value>,
    web_results: Vec<Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's result and, on success with a mapping result, lift
    /// its `notes`/`entities`/`related_entities`/`aggregates`/`web_results`
    /// into the raw (non-deduplicated) accumulators. Deduplication happens
    /// lazily on read (`get_all_notes`, `get_all_entities`).
    pub fn add_result(&mut self, result: StepResult) {
        if result.success {
            if let Some(payload) = &result.result {
                if payload.is_object() {
                    if let Some(notes) = value_get_array(payload, "notes") {
                        self.notes.extend(notes.iter().cloned());
                    }
                    if let Some(entities) = value_get_array(payload, "entities") {
                        self.entities.extend(entities.iter().cloned());
                    }
                    if let Some(related) = value_get_array(payload, "related_entities") {
                        self.entities.extend(related.iter().cloned());
                    }
                    if let Some(aggregates) = value_get_array(payload, "aggregates") {
                        self.aggregates.extend(aggregates.iter().cloned());
                    }
                    if let Some(web_results) = value_get_array(payload, "web_results") {
                        self.web_results.extend(web_results.iter().cloned());
                    }
                }
            }
        }
        if !self.results.contains_key(&result.step_id) {
            self.result_order.push(result.step_id.clone());
        }
        self.results.insert(result.step_id.clone(), result);
    }

    pub fn get_result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// All recorded step results, in the order they were first added.
    pub fn get_all_results(&self) -> Vec<&StepResult> {
        self.result_order.iter().filter_map(|id| self.results.get(id)).collect()
    }

    /// Notes deduplicated by `note_id`, preserving first-seen order. Notes
    /// lacking a `note_id` are kept as-is (never deduplicated against).
    pub fn get_all_notes(&self) -> Vec<Value> {
        dedup_by_key(&self.notes, "note_id")
    }

    /// Entities deduplicated by `entity_id`, preserving first-seen order.
    pub fn get_all_entities(&self) -> Vec<Value> {
        dedup_by_key(&self.entities, "entity_id")
    }

    pub fn get_all_aggregates(&self) -> Vec<Value> {
        self.aggregates.clone()
    }

    pub fn get_all_web_results(&self) -> Vec<Value> {
        self.web_results.clone()
    }
}

fn dedup_by_key(items: &[Value], key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match value_get_str(item, key) {
            Some(id) if !id.is_empty() => {
                if seen.insert(id.to_string()) {
                    out.push(item.clone());
                }
            }
            _ => out.push(item.clone()),
        }
    }
    out
}

/// Final merged evidence bundle produced by one `execute(plan)` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub query: String,
    pub success: bool,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub total_execution_time_ms: f64,
    pub merged_notes: Vec<Value>,
    pub merged_entities: Vec<Value>,
    pub aggregates: Vec<Value>,
    pub web_results: Vec<Value>,
    pub patterns: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Value>,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub step_results: HashMap<String, StepResult>,
}

/// Result of query-complexity classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_complex: bool,
    pub query_type: QueryType,
    pub confidence: f64,
    pub signals: Vec<String>,
    pub reasoning: String,
}
