//! Graph actions: entity-neighborhood expansion, path-finding between two
//! entities, co-occurrence lookup, full entity context, and an
//! edge-type filter utility.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::schemas::{ActionName, ExecutionContext, StepResult};
use crate::stores::Stores;

use super::{get_f64, get_str, get_str_list, get_time_filter, get_u32, get_usize, now_ms, step_id_of, Action};

/// Resolve an entity name to its id via `get_entity_context`. Returns
/// `Ok(Some(id))` on success, `Ok(None)` when the lookup succeeded but
/// produced no entity (caller should return an empty-but-successful
/// result with no message), or `Err(message)` when the lookup itself
/// reports an error (caller returns the "not found" message).
async fn resolve_entity_id(
    stores: &Stores,
    entity_name: &str,
    entity_type: Option<&str>,
    time_filter: Option<&crate::schemas::TimeFilter>,
) -> Result<Option<String>, String> {
    let context = stores
        .graph
        .get_entity_context(entity_name, entity_type, time_filter)
        .await
        .map_err(|e| e.to_string())?;

    if context.get("error").is_some() {
        return Err(format!("Entity '{entity_name}' not found"));
    }
    Ok(context.get("entity_id").and_then(Value::as_str).map(str::to_string))
}

pub struct GraphExpand {
    stores: Arc<Stores>,
}

impl GraphExpand {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for GraphExpand {
    fn name(&self) -> ActionName {
        ActionName::GraphExpand
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(entity_name) = get_str(params, "entity_name") else {
            return StepResult::fail(step_id, self.name(), "entity_name is required", now_ms(start));
        };
        let entity_type = get_str(params, "entity_type");
        let time_filter = get_time_filter(params);
        let edge_types = get_str_list(params, "edge_types");
        let hops = get_u32(params, "hops", 1);
        let min_weight = get_f64(params, "min_weight", 0.3);
        let max_related = get_usize(params, "max_related", 20);

        match resolve_entity_id(&self.stores, entity_name, entity_type, time_filter.as_ref()).await {
            Err(message) => StepResult::ok(
                step_id,
                self.name(),
                json!({ "related_entities": [], "expanded_notes": [], "entity_name": entity_name, "message": message }),
                now_ms(start),
            ),
            Ok(None) => StepResult::ok(
                step_id,
                self.name(),
                json!({ "related_entities": [], "expanded_notes": [], "entity_name": entity_name }),
                now_ms(start),
            ),
            Ok(Some(entity_id)) => {
                match self
                    .stores
                    .graph
                    .expand_from_entities(
                        &[entity_id],
                        hops,
                        time_filter.as_ref(),
                        edge_types.as_deref(),
                        Some(min_weight),
                        max_related,
                    )
                    .await
                {
                    Ok((related_entities, expanded_notes)) => StepResult::ok(
                        step_id,
                        self.name(),
                        json!({
                            "related_entities": related_entities,
                            "expanded_notes": expanded_notes,
                            "entity_name": entity_name,
                            "hops_used": hops,
                        }),
                        now_ms(start),
                    ),
                    Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
                }
            }
        }
    }
}

pub struct FindConnections {
    stores: Arc<Stores>,
}

impl FindConnections {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for FindConnections {
    fn name(&self) -> ActionName {
        ActionName::FindConnections
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let entity_a = get_str(params, "entity_a");
        let entity_b = get_str(params, "entity_b");
        let (Some(entity_a), Some(entity_b)) = (entity_a, entity_b) else {
            return StepResult::fail(step_id, self.name(), "Both entity_a and entity_b are required", now_ms(start));
        };
        let max_hops = get_u32(params, "max_hops", 3);

        match self.stores.graph.find_connections(entity_a, entity_b, max_hops).await {
            Ok(paths) => {
                let paths_found = paths.len();
                StepResult::ok(
                    step_id,
                    self.name(),
                    json!({
                        "paths": paths,
                        "entity_a": entity_a,
                        "entity_b": entity_b,
                        "paths_found": paths_found,
                    }),
                    now_ms(start),
                )
            }
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct GetCoOccurrences {
    stores: Arc<Stores>,
}

impl GetCoOccurrences {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for GetCoOccurrences {
    fn name(&self) -> ActionName {
        ActionName::GetCoOccurrences
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(entity_name) = get_str(params, "entity_name") else {
            return StepResult::fail(step_id, self.name(), "entity_name is required", now_ms(start));
        };
        let edge_type = get_str(params, "edge_type").unwrap_or("CO_OCCURRED_WITH").to_string();
        let time_filter = get_time_filter(params);

        match resolve_entity_id(&self.stores, entity_name, None, time_filter.as_ref()).await {
            Err(message) => StepResult::ok(
                step_id,
                self.name(),
                json!({ "co_occurrences": [], "entity_name": entity_name, "edge_type": edge_type, "message": message }),
                now_ms(start),
            ),
            Ok(None) => StepResult::ok(
                step_id,
                self.name(),
                json!({ "co_occurrences": [], "entity_name": entity_name, "edge_type": edge_type }),
                now_ms(start),
            ),
            Ok(Some(entity_id)) => {
                match self
                    .stores
                    .graph
                    .expand_from_entities(&[entity_id], 1, time_filter.as_ref(), Some(&[edge_type.clone()]), None, 20)
                    .await
                {
                    Ok((related_entities, _)) => StepResult::ok(
                        step_id,
                        self.name(),
                        json!({ "co_occurrences": related_entities, "entity_name": entity_name, "edge_type": edge_type }),
                        now_ms(start),
                    ),
                    Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
                }
            }
        }
    }
}

pub struct GetEntityContext {
    stores: Arc<Stores>,
}

impl GetEntityContext {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Action for GetEntityContext {
    fn name(&self) -> ActionName {
        ActionName::GetEntityContext
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(entity_name) = get_str(params, "entity_name") else {
            return StepResult::fail(step_id, self.name(), "entity_name is required", now_ms(start));
        };
        let entity_type = get_str(params, "entity_type");
        let time_filter = get_time_filter(params);

        match self.stores.graph.get_entity_context(entity_name, entity_type, time_filter.as_ref()).await {
            Ok(result) => StepResult::ok(step_id, self.name(), result, now_ms(start)),
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

/// Filter an accumulated or referenced entity list down to a single edge
/// type. Not surfaced to the LLM planner's prompt (it is not part of the
/// action list the planner is taught); available for template plans and
/// direct programmatic use.
pub struct FilterByEdgeType;

impl FilterByEdgeType {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FilterByEdgeType {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for FilterByEdgeType {
    fn name(&self) -> ActionName {
        ActionName::FilterByEdgeType
    }

    async fn execute(&self, params: &Map<String, Value>, context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let Some(edge_type) = get_str(params, "edge_type") else {
            return StepResult::fail(step_id, self.name(), "edge_type is required", now_ms(start));
        };

        let entities = if let Some(entities_ref) = get_str(params, "entities_ref") {
            context
                .get_result(entities_ref)
                .and_then(|r| r.result.as_ref())
                .and_then(|r| r.get("related_entities").or_else(|| r.get("entities")))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        } else {
            context.get_all_entities()
        };

        let filtered: Vec<Value> = entities
            .into_iter()
            .filter(|e| e.get("edge_type").and_then(Value::as_str) == Some(edge_type))
            .collect();

        StepResult::ok(
            step_id,
            self.name(),
            json!({ "entities": filtered, "edge_type": edge_type }),
            now_ms(start),
        )
    }
}
