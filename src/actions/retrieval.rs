//! Retrieval actions: semantic/entity/hierarchical search, raw time-range
//! lookups, and pre-computed aggregates. Each wraps one [`crate::stores`]
//! query behind the uniform [`Action`] contract.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::schemas::{ActionName, ExecutionContext, StepResult};
use crate::stores::Stores;

use super::{get_f64, get_str, get_time_filter, get_usize, now_ms, step_id_of, Action};

pub struct SemanticSearch {
    stores: Arc<Stores>,
}

impl SemanticSearch {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for SemanticSearch {
    fn name(&self) -> ActionName {
        ActionName::SemanticSearch
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(query) = get_str(params, "query") else {
            return StepResult::fail(step_id, self.name(), "query is required", now_ms(start));
        };
        let time_filter = get_time_filter(params);
        let limit = get_usize(params, "limit", 10);

        match self.stores.notes.semantic_search(query, time_filter.as_ref(), limit).await {
            Ok(notes) => StepResult::ok(step_id, self.name(), json!({ "notes": notes }), now_ms(start)),
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct EntitySearch {
    stores: Arc<Stores>,
}

impl EntitySearch {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for EntitySearch {
    fn name(&self) -> ActionName {
        ActionName::EntitySearch
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(entity_name) = get_str(params, "entity_name") else {
            return StepResult::fail(step_id, self.name(), "entity_name is required", now_ms(start));
        };
        let entity_type = get_str(params, "entity_type");
        let time_filter = get_time_filter(params);
        let limit = get_usize(params, "limit", 10);

        match self.stores.notes.entity_search(entity_name, entity_type, time_filter.as_ref(), limit).await {
            Ok((notes, entities)) => {
                StepResult::ok(step_id, self.name(), json!({ "notes": notes, "entities": entities }), now_ms(start))
            }
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct HierarchicalSearch {
    stores: Arc<Stores>,
}

impl HierarchicalSearch {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for HierarchicalSearch {
    fn name(&self) -> ActionName {
        ActionName::HierarchicalSearch
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(query) = get_str(params, "query") else {
            return StepResult::fail(step_id, self.name(), "query is required", now_ms(start));
        };
        let time_filter = get_time_filter(params);
        let max_days = get_f64(params, "max_days", 5.0) as u32;

        match self.stores.notes.hierarchical_search(query, time_filter.as_ref(), max_days).await {
            Ok(notes) => StepResult::ok(step_id, self.name(), json!({ "notes": notes }), now_ms(start)),
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct TimeRangeNotes {
    stores: Arc<Stores>,
}

impl TimeRangeNotes {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for TimeRangeNotes {
    fn name(&self) -> ActionName {
        ActionName::TimeRangeNotes
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(time_filter) = get_time_filter(params) else {
            return StepResult::fail(step_id, self.name(), "time_filter is required", now_ms(start));
        };
        let note_type = get_str(params, "note_type");
        let limit = get_usize(params, "limit", 100);

        match self.stores.notes.time_range_notes(&time_filter, note_type, limit).await {
            Ok(notes) => StepResult::ok(step_id, self.name(), json!({ "notes": notes }), now_ms(start)),
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct AggregatesQuery {
    stores: Arc<Stores>,
}

impl AggregatesQuery {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

const VALID_KEY_TYPES: &[&str] = &["app", "domain", "topic", "artist", "track", "category"];

#[async_trait]
impl Action for AggregatesQuery {
    fn name(&self) -> ActionName {
        ActionName::AggregatesQuery
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(key_type) = get_str(params, "key_type") else {
            return StepResult::fail(step_id, self.name(), "key_type is required", now_ms(start));
        };
        if !VALID_KEY_TYPES.contains(&key_type) {
            return StepResult::fail(
                step_id,
                self.name(),
                format!("invalid key_type: {key_type}"),
                now_ms(start),
            );
        }
        let time_filter = get_time_filter(params);
        let limit = get_usize(params, "limit", 10);

        match self.stores.aggregates.top_by_key_type(key_type, time_filter.as_ref(), limit).await {
            Ok(items) => {
                let aggregates: Vec<Value> =
                    items.into_iter().map(|item| json!({ "key": item.key, "minutes": item.value })).collect();
                StepResult::ok(step_id, self.name(), json!({ "aggregates": aggregates }), now_ms(start))
            }
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{AggregatesStore, GraphStore, NoteStore, StoreResult, WebRawResult, WebSearchProvider};
    use crate::schemas::TimeFilter;
    use async_trait::async_trait;

    struct StubNotes;

    #[async_trait]
    impl NoteStore for StubNotes {
        async fn semantic_search(&self, _q: &str, _tf: Option<&TimeFilter>, _limit: usize) -> StoreResult<Vec<Value>> {
            Ok(vec![json!({"note_id": "n1", "start_ts": "2026-01-01T00:00:00Z"})])
        }
        async fn entity_search(&self, _e: &str, _et: Option<&str>, _tf: Option<&TimeFilter>, _limit: usize) -> StoreResult<(Vec<Value>, Vec<Value>)> {
            Ok((vec![], vec![]))
        }
        async fn hierarchical_search(&self, _q: &str, _tf: Option<&TimeFilter>, _max_days: u32) -> StoreResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn time_range_notes(&self, _tf: &TimeFilter, _nt: Option<&str>, _limit: usize) -> StoreResult<Vec<Value>> {
            Ok(vec![])
        }
    }

    struct StubAggregates;
    #[async_trait]
    impl AggregatesStore for StubAggregates {
        async fn top_by_key_type(&self, _kt: &str, _tf: Option<&TimeFilter>, _limit: usize) -> StoreResult<Vec<crate::stores::AggregateItem>> {
            Ok(vec![crate::stores::AggregateItem { key: "vscode".into(), value: 120.0 }])
        }
    }

    struct StubGraph;
    #[async_trait]
    impl GraphStore for StubGraph {
        async fn get_entity_context(&self, _n: &str, _t: Option<&str>, _tf: Option<&TimeFilter>) -> StoreResult<Value> {
            Ok(json!({"error": "not found"}))
        }
        async fn expand_from_entities(&self, _ids: &[String], _hops: u32, _tf: Option<&TimeFilter>, _et: Option<&[String]>, _mw: Option<f64>, _mr: usize) -> StoreResult<(Vec<Value>, Vec<Value>)> {
            Ok((vec![], vec![]))
        }
        async fn find_connections(&self, _a: &str, _b: &str, _mh: u32) -> StoreResult<Vec<Vec<Value>>> {
            Ok(vec![])
        }
    }

    struct StubWeb;
    #[async_trait]
    impl WebSearchProvider for StubWeb {
        async fn search(&self, _q: &str, _max: usize, _depth: &str) -> StoreResult<Vec<WebRawResult>> {
            Ok(vec![])
        }
    }

    fn stub_stores() -> Arc<Stores> {
        Arc::new(Stores {
            notes: Arc::new(StubNotes),
            aggregates: Arc::new(StubAggregates),
            graph: Arc::new(StubGraph),
            web: Some(Arc::new(StubWeb)),
        })
    }

    #[tokio::test]
    async fn semantic_search_requires_query() {
        let action = SemanticSearch::new(stub_stores());
        let ctx = ExecutionContext::new();
        let result = action.execute(&Map::new(), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("query is required"));
    }

    #[tokio::test]
    async fn semantic_search_returns_notes() {
        let action = SemanticSearch::new(stub_stores());
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("query".to_string(), json!("rust"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["notes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn aggregates_query_rejects_invalid_key_type() {
        let action = AggregatesQuery::new(stub_stores());
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("key_type".to_string(), json!("bogus"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn aggregates_query_returns_minutes() {
        let action = AggregatesQuery::new(stub_stores());
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("key_type".to_string(), json!("app"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        let aggs = result.result.unwrap();
        assert_eq!(aggs["aggregates"][0]["key"], "vscode");
    }
}
