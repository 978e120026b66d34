//! Trait interfaces for the external collaborators the action catalog
//! consults: the note/vector store, the time-rollup aggregates store, the
//! entity graph, and the web-search provider. These systems are out of
//! scope for this crate; it only owns the query contracts shown to them.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::schemas::TimeFilter;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Note retrieval: semantic/entity/hierarchical search and raw time-range
/// lookups. Records are free-form JSON objects carrying at minimum
/// `note_id` and `start_ts`, matching the upstream persistence layer's
/// permissive shape.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn semantic_search(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> StoreResult<Vec<Value>>;

    /// Returns `(notes, entities)` — notes mentioning the entity and the
    /// entity records themselves.
    async fn entity_search(
        &self,
        entity_name: &str,
        entity_type: Option<&str>,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> StoreResult<(Vec<Value>, Vec<Value>)>;

    async fn hierarchical_search(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
        max_days: u32,
    ) -> StoreResult<Vec<Value>>;

    async fn time_range_notes(
        &self,
        time_filter: &TimeFilter,
        note_type: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Value>>;
}

/// A single pre-computed time rollup entry (e.g. minutes spent per app).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AggregateItem {
    pub key: String,
    pub value: f64,
}

#[async_trait]
pub trait AggregatesStore: Send + Sync {
    async fn top_by_key_type(
        &self,
        key_type: &str,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> StoreResult<Vec<AggregateItem>>;
}

/// Entity graph traversal: context lookup, neighborhood expansion, and
/// path-finding between two entities.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Resolve an entity by name and return its full context as a JSON
    /// object. An unresolved name is signaled by an `"error"` key in the
    /// returned object rather than an `Err` — mirrors the upstream
    /// resolver's own not-found convention, which callers (the graph
    /// actions) depend on to distinguish "not found" from "query failed".
    async fn get_entity_context(
        &self,
        entity_name: &str,
        entity_type: Option<&str>,
        time_filter: Option<&TimeFilter>,
    ) -> StoreResult<Value>;

    /// Returns `(related_entities, expanded_notes)`.
    async fn expand_from_entities(
        &self,
        entity_ids: &[String],
        hops: u32,
        time_filter: Option<&TimeFilter>,
        edge_types: Option<&[String]>,
        min_weight: Option<f64>,
        max_related: usize,
    ) -> StoreResult<(Vec<Value>, Vec<Value>)>;

    /// Returns every path found, each path a list of entity objects with
    /// `entity_id`, `entity_type`, `canonical_name`.
    async fn find_connections(
        &self,
        entity_a: &str,
        entity_b: &str,
        max_hops: u32,
    ) -> StoreResult<Vec<Vec<Value>>>;
}

/// Raw result from the web-search provider, before the `web_search`
/// action shapes it into `WebResult`/`WebCitation` pairs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebRawResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        search_depth: &str,
    ) -> StoreResult<Vec<WebRawResult>>;
}

/// Shared read-only handles to every external collaborator, constructed
/// once and handed to every action. Actions never construct their own
/// connections; `web` is `None` when no provider credential is configured.
#[derive(Clone)]
pub struct Stores {
    pub notes: std::sync::Arc<dyn NoteStore>,
    pub aggregates: std::sync::Arc<dyn AggregatesStore>,
    pub graph: std::sync::Arc<dyn GraphStore>,
    pub web: Option<std::sync::Arc<dyn WebSearchProvider>>,
}
