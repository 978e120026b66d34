//! Web search action: consults the configured external search provider.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::schemas::{ActionName, ExecutionContext, StepResult};
use crate::stores::Stores;

use super::{get_str, get_usize, now_ms, step_id_of, Action};

pub struct WebSearch {
    stores: Arc<Stores>,
}

impl WebSearch {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for WebSearch {
    fn name(&self) -> ActionName {
        ActionName::WebSearch
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(query) = get_str(params, "query") else {
            return StepResult::fail(step_id, self.name(), "Query is required", now_ms(start));
        };

        let Some(provider) = &self.stores.web else {
            return StepResult::ok(
                step_id,
                self.name(),
                json!({
                    "web_results": [],
                    "web_citations": [],
                    "query": query,
                    "results_count": 0,
                    "message": "Web search not available. Set TAVILY_API_KEY to enable.",
                }),
                now_ms(start),
            );
        };

        let max_results = get_usize(params, "max_results", 5);
        let search_depth = get_str(params, "search_depth").unwrap_or("basic");

        let raw_results = match provider.search(query, max_results, search_depth).await {
            Ok(results) => results,
            Err(_) => Vec::new(),
        };

        let accessed_at = chrono::Utc::now().to_rfc3339();

        let web_results: Vec<Value> = raw_results
            .iter()
            .map(|r| {
                json!({
                    "title": r.title,
                    "url": r.url,
                    "snippet": truncate(&r.content, 500),
                    "relevance_score": r.score,
                })
            })
            .collect();

        let web_citations: Vec<Value> = raw_results
            .iter()
            .map(|r| {
                json!({
                    "url": r.url,
                    "title": r.title,
                    "accessed_at": accessed_at,
                    "snippet": truncate(&r.content, 200),
                })
            })
            .collect();

        let results_count = web_results.len();

        StepResult::ok(
            step_id,
            self.name(),
            json!({
                "web_results": web_results,
                "web_citations": web_citations,
                "query": query,
                "results_count": results_count,
            }),
            now_ms(start),
        )
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{AggregatesStore, GraphStore, NoteStore, StoreError, StoreResult, WebRawResult, WebSearchProvider};
    use crate::schemas::TimeFilter;

    struct UnusedNotes;
    #[async_trait]
    impl NoteStore for UnusedNotes {
        async fn semantic_search(&self, _q: &str, _tf: Option<&TimeFilter>, _l: usize) -> StoreResult<Vec<Value>> { Ok(vec![]) }
        async fn entity_search(&self, _e: &str, _t: Option<&str>, _tf: Option<&TimeFilter>, _l: usize) -> StoreResult<(Vec<Value>, Vec<Value>)> { Ok((vec![], vec![])) }
        async fn hierarchical_search(&self, _q: &str, _tf: Option<&TimeFilter>, _d: u32) -> StoreResult<Vec<Value>> { Ok(vec![]) }
        async fn time_range_notes(&self, _tf: &TimeFilter, _nt: Option<&str>, _l: usize) -> StoreResult<Vec<Value>> { Ok(vec![]) }
    }
    struct UnusedAggregates;
    #[async_trait]
    impl AggregatesStore for UnusedAggregates {
        async fn top_by_key_type(&self, _kt: &str, _tf: Option<&TimeFilter>, _l: usize) -> StoreResult<Vec<crate::stores::AggregateItem>> { Ok(vec![]) }
    }
    struct UnusedGraph;
    #[async_trait]
    impl GraphStore for UnusedGraph {
        async fn get_entity_context(&self, _n: &str, _t: Option<&str>, _tf: Option<&TimeFilter>) -> StoreResult<Value> { Ok(json!({})) }
        async fn expand_from_entities(&self, _i: &[String], _h: u32, _tf: Option<&TimeFilter>, _e: Option<&[String]>, _m: Option<f64>, _mr: usize) -> StoreResult<(Vec<Value>, Vec<Value>)> { Ok((vec![], vec![])) }
        async fn find_connections(&self, _a: &str, _b: &str, _mh: u32) -> StoreResult<Vec<Vec<Value>>> { Ok(vec![]) }
    }

    struct StubWeb {
        fail: bool,
    }
    #[async_trait]
    impl WebSearchProvider for StubWeb {
        async fn search(&self, _q: &str, _max: usize, _depth: &str) -> StoreResult<Vec<WebRawResult>> {
            if self.fail {
                Err(StoreError::Query("boom".into()))
            } else {
                Ok(vec![WebRawResult { title: "T".into(), url: "http://x".into(), content: "c".repeat(600), score: 0.9 }])
            }
        }
    }

    fn stores_with_web(web: Option<Arc<dyn WebSearchProvider>>) -> Arc<Stores> {
        Arc::new(Stores { notes: Arc::new(UnusedNotes), aggregates: Arc::new(UnusedAggregates), graph: Arc::new(UnusedGraph), web })
    }

    #[tokio::test]
    async fn requires_query() {
        let action = WebSearch::new(stores_with_web(None));
        let ctx = ExecutionContext::new();
        let result = action.execute(&Map::new(), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Query is required"));
    }

    #[tokio::test]
    async fn unavailable_provider_returns_message() {
        let action = WebSearch::new(stores_with_web(None));
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("query".to_string(), json!("rust news"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        let payload = result.result.unwrap();
        assert_eq!(payload["web_results"].as_array().unwrap().len(), 0);
        assert!(payload["message"].as_str().unwrap().contains("TAVILY_API_KEY"));
    }

    #[tokio::test]
    async fn snippets_are_truncated() {
        let action = WebSearch::new(stores_with_web(Some(Arc::new(StubWeb { fail: false }))));
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("query".to_string(), json!("rust news"))]);
        let result = action.execute(&params, &ctx).await;
        let payload = result.result.unwrap();
        assert_eq!(payload["web_results"][0]["snippet"].as_str().unwrap().len(), 500);
        assert_eq!(payload["web_citations"][0]["snippet"].as_str().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn provider_error_yields_empty_results_not_failure() {
        let action = WebSearch::new(stores_with_web(Some(Arc::new(StubWeb { fail: true }))));
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("query".to_string(), json!("rust news"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["results_count"], 0);
    }
}
