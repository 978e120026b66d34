//! Query planner: turns a user query into an executable [`QueryPlan`],
//! either via fixed templates for known query types or via an LLM call
//! with bounded retries and a deterministic fallback.

pub mod prompts;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{ChatCompletionRequest, ChatMessage, LlmClient, ResponseFormat};
use crate::schemas::{ActionName, PlanStep, PlanValidationError, QueryPlan, QueryType};

use prompts::PlannerPromptBuilder;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlannerError {
    #[error("llm call failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("planner produced invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("planner produced an invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),

    #[error("planner exhausted all retry attempts")]
    ExhaustedRetries,
}

pub type PlannerResult<T> = Result<T, PlannerError>;

const PLANNER_MODEL: &str = "gpt-4o-mini";
const MAX_ATTEMPTS: usize = 3;

fn random_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn time_filter_params(time_filter_description: Option<&str>) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(description) = time_filter_description {
        params.insert("time_filter".to_string(), json!({ "description": description }));
    }
    params
}

fn step(
    step_id: &str,
    action: ActionName,
    params: Map<String, Value>,
    depends_on: &[&str],
    required: bool,
    timeout_seconds: f64,
    description: &str,
) -> PlanStep {
    PlanStep::new(step_id, action, description)
        .with_params(params)
        .with_depends_on(depends_on.iter().map(|s| s.to_string()).collect())
        .with_required(required)
        .with_timeout_seconds(timeout_seconds)
}

fn merge_params(mut base: Map<String, Value>, extra: Map<String, Value>) -> Map<String, Value> {
    base.extend(extra);
    base
}

/// LLM-backed and template-backed query planner.
pub struct QueryPlanner {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt_builder: PlannerPromptBuilder,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, model: PLANNER_MODEL.to_string(), prompt_builder: PlannerPromptBuilder::new() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Generate a plan via the LLM, retrying up to three times on invalid
    /// output (bad JSON, schema mismatch, or a cyclic dependency graph)
    /// before falling back to a single-step hierarchical search.
    pub async fn plan(
        &self,
        query: &str,
        time_context: Option<&str>,
        available_data_summary: Option<&Map<String, Value>>,
    ) -> QueryPlan {
        let mut messages = self.prompt_builder.build_messages(query, time_context, available_data_summary);
        let mut last_error: Option<PlannerError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self.try_generate_plan(&messages, query).await {
                Ok((plan, raw)) => {
                    info!(steps = plan.steps.len(), query = %truncate(query, 50), "generated plan");
                    let _ = raw;
                    return plan;
                }
                Err((err, raw)) => {
                    warn!(attempt = attempt + 1, error = %err, "plan generation attempt failed");
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(format!(
                        "The previous response had an error: {err}. Please fix and output valid JSON."
                    )));
                    last_error = Some(err);
                }
            }
        }

        warn!(error = ?last_error, "planning failed after retries, using fallback plan");
        self.create_fallback_plan(query)
    }

    async fn try_generate_plan(
        &self,
        messages: &[ChatMessage],
        query: &str,
    ) -> Result<(QueryPlan, String), (PlannerError, String)> {
        let request = ChatCompletionRequest::new(self.model.clone())
            .temperature(0.2)
            .max_tokens(2000)
            .response_format(ResponseFormat::json());
        let request = messages.iter().cloned().fold(request, |r, m| r.message(m));

        let raw = match self.llm.chat(request).await {
            Ok(response) => response.content().unwrap_or("{}").to_string(),
            Err(e) => return Err((PlannerError::from(e), "{}".to_string())),
        };

        let parsed = match self.parse_and_validate_plan(&raw, query) {
            Ok(plan) => plan,
            Err(e) => return Err((e, raw)),
        };
        Ok((parsed, raw))
    }

    fn parse_and_validate_plan(&self, plan_json: &str, query: &str) -> PlannerResult<QueryPlan> {
        let cleaned = crate::llm::extract_json(plan_json);
        let mut data: Value = serde_json::from_str(cleaned)?;

        let obj = data
            .as_object_mut()
            .ok_or_else(|| PlannerError::InvalidJson(<serde_json::Error as serde::de::Error>::custom("plan response is not a JSON object")))?;

        obj.entry("query").or_insert_with(|| Value::String(query.to_string()));
        obj.entry("plan_id").or_insert_with(|| Value::String(format!("plan-{}", random_token())));

        if let Some(steps) = obj.get_mut("steps").and_then(Value::as_array_mut) {
            for (i, step) in steps.iter_mut().enumerate() {
                if let Some(step_obj) = step.as_object_mut() {
                    step_obj
                        .entry("step_id")
                        .or_insert_with(|| Value::String(format!("s{}", i + 1)));
                }
            }
        }

        let plan: QueryPlan = serde_json::from_value(data)?;
        plan.validate()?;
        Ok(plan)
    }

    fn create_fallback_plan(&self, query: &str) -> QueryPlan {
        QueryPlan {
            plan_id: format!("fallback-{}", random_token()),
            query: query.to_string(),
            query_type: QueryType::Simple,
            reasoning: "Fallback plan due to planning failure - using hierarchical search".to_string(),
            steps: vec![step(
                "s1",
                ActionName::HierarchicalSearch,
                Map::from_iter([
                    ("query".to_string(), json!(query)),
                    ("max_days".to_string(), json!(5)),
                ]),
                &[],
                true,
                10.0,
                "Fallback hierarchical search",
            )],
            estimated_time_seconds: 10.0,
            requires_web_search: false,
        }
    }

    /// Build a plan from a fixed template for a recognized query type,
    /// falling back to LLM planning for anything else (`multi_entity`
    /// included, since no fixed template covers it).
    pub async fn plan_for_type(
        &self,
        query: &str,
        query_type: QueryType,
        time_filter_description: Option<&str>,
    ) -> QueryPlan {
        let plan_id = format!("template-{}", random_token());
        let time_params = time_filter_params(time_filter_description);

        match query_type {
            QueryType::Relationship => self.plan_relationship_query(query, &plan_id, time_params),
            QueryType::MemoryRecall => self.plan_memory_recall_query(query, &plan_id, time_params),
            QueryType::Comparison => self.plan_comparison_query(query, &plan_id),
            QueryType::Correlation => self.plan_correlation_query(query, &plan_id, time_params),
            QueryType::WebAugmented => self.plan_web_augmented_query(query, &plan_id, time_params),
            _ => self.plan(query, time_filter_description, None).await,
        }
    }

    fn plan_relationship_query(&self, query: &str, plan_id: &str, time_params: Map<String, Value>) -> QueryPlan {
        QueryPlan {
            plan_id: plan_id.to_string(),
            query: query.to_string(),
            query_type: QueryType::Relationship,
            reasoning: "Relationship query - searching for co-occurring entities".to_string(),
            steps: vec![
                step(
                    "s1",
                    ActionName::SemanticSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("limit".to_string(), json!(10))]), time_params.clone()),
                    &[],
                    true,
                    8.0,
                    "Initial semantic search for relevant notes",
                ),
                step(
                    "s2",
                    ActionName::HierarchicalSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("max_days".to_string(), json!(5))]), time_params),
                    &[],
                    false,
                    10.0,
                    "Hierarchical search for broader context",
                ),
                step(
                    "s3",
                    ActionName::MergeResults,
                    Map::from_iter([("result_refs".to_string(), json!(["s1", "s2"]))]),
                    &["s1", "s2"],
                    true,
                    2.0,
                    "Merge search results",
                ),
            ],
            estimated_time_seconds: 12.0,
            requires_web_search: false,
        }
    }

    fn plan_memory_recall_query(&self, query: &str, plan_id: &str, time_params: Map<String, Value>) -> QueryPlan {
        QueryPlan {
            plan_id: plan_id.to_string(),
            query: query.to_string(),
            query_type: QueryType::MemoryRecall,
            reasoning: "Memory recall - broad semantic search to find matching memories".to_string(),
            steps: vec![
                step(
                    "s1",
                    ActionName::SemanticSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("limit".to_string(), json!(15))]), time_params.clone()),
                    &[],
                    true,
                    8.0,
                    "Semantic search for memory fragments",
                ),
                step(
                    "s2",
                    ActionName::HierarchicalSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("max_days".to_string(), json!(7))]), time_params),
                    &[],
                    false,
                    10.0,
                    "Hierarchical search for day context",
                ),
                step(
                    "s3",
                    ActionName::MergeResults,
                    Map::from_iter([("result_refs".to_string(), json!(["s1", "s2"]))]),
                    &["s1", "s2"],
                    true,
                    2.0,
                    "Merge and deduplicate results",
                ),
            ],
            estimated_time_seconds: 12.0,
            requires_web_search: false,
        }
    }

    fn plan_comparison_query(&self, query: &str, plan_id: &str) -> QueryPlan {
        QueryPlan {
            plan_id: plan_id.to_string(),
            query: query.to_string(),
            query_type: QueryType::Comparison,
            reasoning: "Comparison query - gathering data from two periods".to_string(),
            steps: vec![
                step(
                    "s1",
                    ActionName::SemanticSearch,
                    Map::from_iter([("query".to_string(), json!(query)), ("limit".to_string(), json!(20))]),
                    &[],
                    true,
                    8.0,
                    "Search for notes related to the comparison",
                ),
                step(
                    "s2",
                    ActionName::AggregatesQuery,
                    Map::from_iter([("key_type".to_string(), json!("app")), ("limit".to_string(), json!(10))]),
                    &[],
                    false,
                    3.0,
                    "Get app usage aggregates",
                ),
                step(
                    "s3",
                    ActionName::AggregatesQuery,
                    Map::from_iter([("key_type".to_string(), json!("category")), ("limit".to_string(), json!(10))]),
                    &[],
                    false,
                    3.0,
                    "Get category aggregates",
                ),
                step(
                    "s4",
                    ActionName::MergeResults,
                    Map::from_iter([("result_refs".to_string(), json!(["s1", "s2", "s3"]))]),
                    &["s1", "s2", "s3"],
                    true,
                    2.0,
                    "Merge all comparison data",
                ),
            ],
            estimated_time_seconds: 12.0,
            requires_web_search: false,
        }
    }

    fn plan_correlation_query(&self, query: &str, plan_id: &str, time_params: Map<String, Value>) -> QueryPlan {
        QueryPlan {
            plan_id: plan_id.to_string(),
            query: query.to_string(),
            query_type: QueryType::Correlation,
            reasoning: "Correlation query - finding patterns in activities".to_string(),
            steps: vec![
                step(
                    "s1",
                    ActionName::SemanticSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("limit".to_string(), json!(20))]), time_params),
                    &[],
                    true,
                    8.0,
                    "Search for relevant activity notes",
                ),
                step(
                    "s2",
                    ActionName::ExtractPatterns,
                    Map::from_iter([
                        ("pattern_type".to_string(), json!("correlation")),
                        ("notes_ref".to_string(), json!("s1")),
                    ]),
                    &["s1"],
                    false,
                    8.0,
                    "Extract behavioral patterns",
                ),
            ],
            estimated_time_seconds: 16.0,
            requires_web_search: false,
        }
    }

    fn plan_web_augmented_query(&self, query: &str, plan_id: &str, time_params: Map<String, Value>) -> QueryPlan {
        QueryPlan {
            plan_id: plan_id.to_string(),
            query: query.to_string(),
            query_type: QueryType::WebAugmented,
            reasoning: "Web-augmented query - combining local notes with external search".to_string(),
            steps: vec![
                step(
                    "s1",
                    ActionName::SemanticSearch,
                    merge_params(Map::from_iter([("query".to_string(), json!(query)), ("limit".to_string(), json!(10))]), time_params),
                    &[],
                    true,
                    8.0,
                    "Search local notes for context",
                ),
                step(
                    "s2",
                    ActionName::WebSearch,
                    Map::from_iter([("query".to_string(), json!(query)), ("max_results".to_string(), json!(5))]),
                    &[],
                    false,
                    15.0,
                    "Search web for external context",
                ),
                step(
                    "s3",
                    ActionName::MergeResults,
                    Map::from_iter([("result_refs".to_string(), json!(["s1", "s2"]))]),
                    &["s1", "s2"],
                    true,
                    2.0,
                    "Merge local and web results",
                ),
            ],
            estimated_time_seconds: 18.0,
            requires_web_search: true,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletionResponse, Choice, ChatMessageOut, LlmResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubLlm {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat(&self, _request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = if responses.is_empty() { "{}".to_string() } else { responses.remove(0) };
            Ok(ChatCompletionResponse { choices: vec![Choice { message: ChatMessageOut { content: Some(content) } }] })
        }
    }

    fn planner_with(responses: Vec<&str>) -> QueryPlanner {
        let llm = Arc::new(StubLlm { responses: Mutex::new(responses.into_iter().map(String::from).collect()) });
        QueryPlanner::new(llm)
    }

    #[tokio::test]
    async fn relationship_template_has_expected_shape() {
        let planner = planner_with(vec![]);
        let plan = planner.plan_for_type("How is X related to Y", QueryType::Relationship, None).await;
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.estimated_time_seconds, 12.0);
        assert!(!plan.requires_web_search);
    }

    #[tokio::test]
    async fn web_augmented_template_requires_web_search() {
        let planner = planner_with(vec![]);
        let plan = planner.plan_for_type("what's the latest on rust", QueryType::WebAugmented, None).await;
        assert!(plan.requires_web_search);
        assert_eq!(plan.estimated_time_seconds, 18.0);
    }

    #[tokio::test]
    async fn llm_plan_backfills_missing_ids() {
        let raw = r#"{"query_type": "simple", "reasoning": "r", "steps": [{"action": "semantic_search", "params": {}}], "estimated_time_seconds": 5, "requires_web_search": false}"#;
        let planner = planner_with(vec![raw]);
        let plan = planner.plan("some query", None, None).await;
        assert_eq!(plan.steps[0].step_id, "s1");
        assert_eq!(plan.plan_id.is_empty(), false);
    }

    #[tokio::test]
    async fn llm_plan_falls_back_after_exhausting_retries() {
        let planner = planner_with(vec!["not json", "still not json", "nope"]);
        let plan = planner.plan("some query", None, None).await;
        assert!(plan.plan_id.starts_with("fallback-"));
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, ActionName::HierarchicalSearch);
    }

    #[tokio::test]
    async fn llm_plan_recovers_on_second_attempt() {
        let good = r#"{"query_type": "simple", "reasoning": "r", "steps": [{"step_id": "s1", "action": "semantic_search", "params": {}}], "estimated_time_seconds": 5, "requires_web_search": false}"#;
        let planner = planner_with(vec!["not json", good]);
        let plan = planner.plan("some query", None, None).await;
        assert!(!plan.plan_id.starts_with("fallback-"));
        assert_eq!(plan.steps.len(), 1);
    }

    #[tokio::test]
    async fn llm_plan_retries_on_cycle() {
        let cyclic = r#"{"query_type": "simple", "reasoning": "r", "steps": [{"step_id": "s1", "action": "semantic_search", "params": {}, "depends_on": ["s2"]}, {"step_id": "s2", "action": "semantic_search", "params": {}, "depends_on": ["s1"]}], "estimated_time_seconds": 5, "requires_web_search": false}"#;
        let planner = planner_with(vec![cyclic, cyclic, cyclic]);
        let plan = planner.plan("some query", None, None).await;
        assert!(plan.plan_id.starts_with("fallback-"));
    }
}
