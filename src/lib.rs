//! Agentic query pipeline for a personal activity-tracking assistant.
//!
//! A query is classified, turned into a dependency-ordered plan of atomic
//! actions, and the plan is executed against the note/graph/aggregate
//! stores (and, where relevant, a web-search provider and an LLM oracle),
//! producing one merged [`schemas::ExecutionResult`].

pub mod actions;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod planner;
pub mod schemas;
pub mod stores;

pub use classifier::Classifier;
pub use error::{AgenticError, AgenticResult};
pub use executor::{ExecutorError, PlanExecutor};
pub use planner::{PlannerError, QueryPlanner};
pub use schemas::{ClassificationResult, ExecutionResult, QueryPlan, QueryType};

use std::sync::Arc;

use serde_json::Map;

/// Classify a query's complexity and likely shape. Pure and infallible.
pub fn classify(classifier: &Classifier, query: &str) -> ClassificationResult {
    classifier.classify(query)
}

/// Produce a plan for `query`, using the template fast path for known
/// complex query types and falling back to the LLM planner otherwise.
pub async fn plan(
    planner: &QueryPlanner,
    query: &str,
    classification: &ClassificationResult,
    time_context: Option<&str>,
    available_data_summary: Option<&Map<String, serde_json::Value>>,
) -> QueryPlan {
    if classification.is_complex {
        planner.plan_for_type(query, classification.query_type, time_context).await
    } else {
        planner.plan(query, time_context, available_data_summary).await
    }
}

/// Execute a plan against the given action registry and return the merged
/// result. A thin convenience wrapper over [`PlanExecutor`] for callers that
/// don't need to hold onto an executor instance across calls.
pub async fn execute(registry: actions::ActionRegistry, plan: &QueryPlan) -> AgenticResult<ExecutionResult> {
    let executor = PlanExecutor::new(registry);
    Ok(executor.execute(plan).await?)
}

/// Execute a plan on a dedicated task, for callers that don't want to hold
/// the calling task open for the duration of execution.
pub async fn execute_async(registry: actions::ActionRegistry, plan: QueryPlan) -> AgenticResult<ExecutionResult> {
    let executor = Arc::new(PlanExecutor::new(registry));
    Ok(executor.execute_async(plan).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{AggregatesStore, GraphStore, NoteStore, StoreResult, WebRawResult, WebSearchProvider};
    use async_trait::async_trait;
    use serde_json::json;

    struct EmptyNotes;
    #[async_trait]
    impl NoteStore for EmptyNotes {
        async fn semantic_search(&self, _q: &str, _tf: Option<&schemas::TimeFilter>, _l: usize) -> StoreResult<Vec<serde_json::Value>> {
            Ok(vec![json!({"note_id": "n1", "start_ts": "2026-01-01T00:00:00Z", "summary": "read rust book"})])
        }
        async fn entity_search(
            &self,
            _e: &str,
            _t: Option<&str>,
            _tf: Option<&schemas::TimeFilter>,
            _l: usize,
        ) -> StoreResult<(Vec<serde_json::Value>, Vec<serde_json::Value>)> {
            Ok((vec![], vec![]))
        }
        async fn hierarchical_search(&self, _q: &str, _tf: Option<&schemas::TimeFilter>, _d: u32) -> StoreResult<Vec<serde_json::Value>> {
            Ok(vec![])
        }
        async fn time_range_notes(&self, _tf: &schemas::TimeFilter, _nt: Option<&str>, _l: usize) -> StoreResult<Vec<serde_json::Value>> {
            Ok(vec![])
        }
    }

    struct EmptyAggregates;
    #[async_trait]
    impl AggregatesStore for EmptyAggregates {
        async fn top_by_key_type(
            &self,
            _kt: &str,
            _tf: Option<&schemas::TimeFilter>,
            _l: usize,
        ) -> StoreResult<Vec<crate::stores::AggregateItem>> {
            Ok(vec![])
        }
    }

    struct EmptyGraph;
    #[async_trait]
    impl GraphStore for EmptyGraph {
        async fn get_entity_context(&self, _n: &str, _t: Option<&str>, _tf: Option<&schemas::TimeFilter>) -> StoreResult<serde_json::Value> {
            Ok(json!({"error": "not found"}))
        }
        async fn expand_from_entities(
            &self,
            _i: &[String],
            _h: u32,
            _tf: Option<&schemas::TimeFilter>,
            _e: Option<&[String]>,
            _m: Option<f64>,
            _mr: usize,
        ) -> StoreResult<(Vec<serde_json::Value>, Vec<serde_json::Value>)> {
            Ok((vec![], vec![]))
        }
        async fn find_connections(&self, _a: &str, _b: &str, _mh: u32) -> StoreResult<Vec<Vec<serde_json::Value>>> {
            Ok(vec![])
        }
    }

    struct NoWeb;
    #[async_trait]
    impl WebSearchProvider for NoWeb {
        async fn search(&self, _q: &str, _max: usize, _depth: &str) -> StoreResult<Vec<WebRawResult>> {
            Ok(vec![])
        }
    }

    fn test_stores() -> Arc<stores::Stores> {
        Arc::new(stores::Stores {
            notes: Arc::new(EmptyNotes),
            aggregates: Arc::new(EmptyAggregates),
            graph: Arc::new(EmptyGraph),
            web: Some(Arc::new(NoWeb)),
        })
    }

    struct NoopLlm;
    #[async_trait]
    impl llm::LlmClient for NoopLlm {
        async fn chat(&self, _request: llm::ChatCompletionRequest) -> llm::LlmResult<llm::ChatCompletionResponse> {
            Err(llm::LlmError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn classify_then_template_plan_then_execute_end_to_end() {
        let classifier = Classifier::new();
        let query = "What was I watching while working on the report?";
        let classification = classify(&classifier, query);
        assert_eq!(classification.query_type, QueryType::Relationship);

        let llm: Arc<dyn llm::LlmClient> = Arc::new(NoopLlm);
        let planner = QueryPlanner::new(llm.clone());
        let query_plan = plan(&planner, query, &classification, None, None).await;
        assert!(!query_plan.steps.is_empty());

        let registry = actions::build_default_registry(test_stores(), llm);
        let result = execute(registry, &query_plan).await.unwrap();
        assert!(result.success);
        assert!(!result.merged_notes.is_empty());
    }
}
