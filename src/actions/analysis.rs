//! Analysis actions: LLM-backed pattern extraction and period comparison,
//! plus the deterministic temporal-sequence and result-merge utilities.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::llm::{ChatCompletionRequest, ChatMessage, LlmClient, ResponseFormat};
use crate::schemas::{ActionName, ExecutionContext, StepResult, TimeFilter};
use crate::stores::Stores;

use super::{get_str, get_str_list, now_ms, notes_from_ref_or_context, step_id_of, Action};

const ANALYSIS_MODEL: &str = "gpt-4o-mini";

fn summarize_notes_for_prompt(notes: &[Value]) -> String {
    notes
        .iter()
        .map(|note| {
            let timestamp = note.get("start_ts").and_then(Value::as_str).unwrap_or("");
            let summary: String = note.get("summary").and_then(Value::as_str).unwrap_or("").chars().take(200).collect();
            let categories = note.get("categories").and_then(Value::as_array);
            let cat_str = match categories {
                Some(cats) if !cats.is_empty() => {
                    cats.iter().filter_map(Value::as_str).take(3).collect::<Vec<_>>().join(", ")
                }
                _ => "uncategorized".to_string(),
            };
            format!("- [{timestamp}] ({cat_str}) {summary}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ExtractPatterns {
    llm: Arc<dyn LlmClient>,
}

impl ExtractPatterns {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_prompt(pattern_type: &str, focus_activity: Option<&str>, notes_summary: &str) -> String {
        let focus_str = focus_activity.map(|f| format!(" related to '{f}'")).unwrap_or_default();
        format!(
            "Analyze the following activity notes and extract behavioral patterns{focus_str}.\n\n\
Pattern type to focus on: {pattern_type}\n\n\
Activity Notes:\n{notes_summary}\n\n\
Identify 2-5 meaningful patterns. Output JSON:\n\
{{\n  \"patterns\": [\"Pattern 1 description\", \"Pattern 2 description\", ...],\n  \"confidence\": 0.0-1.0\n}}\n\n\
Focus on:\n- Recurring behaviors\n- Time-based correlations\n- Activity sequences\n- Habit formations"
        )
    }
}

#[async_trait]
impl Action for ExtractPatterns {
    fn name(&self) -> ActionName {
        ActionName::ExtractPatterns
    }

    async fn execute(&self, params: &Map<String, Value>, context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let pattern_type = get_str(params, "pattern_type").unwrap_or("general");
        let focus_activity = get_str(params, "focus_activity");

        let notes = notes_from_ref_or_context(params, context);

        if notes.is_empty() {
            return StepResult::ok(
                step_id,
                self.name(),
                json!({
                    "patterns": ["Insufficient data to extract patterns"],
                    "evidence_note_ids": Vec::<String>::new(),
                    "confidence": 0.0,
                }),
                now_ms(start),
            );
        }

        let sample: Vec<Value> = notes.iter().take(20).cloned().collect();
        let notes_summary = summarize_notes_for_prompt(&sample);
        let prompt = Self::build_prompt(pattern_type, focus_activity, &notes_summary);

        let request = ChatCompletionRequest::new(ANALYSIS_MODEL)
            .temperature(0.3)
            .max_tokens(500)
            .response_format(ResponseFormat::json())
            .message(ChatMessage::system("You are an analyst extracting behavioral patterns from activity data. Output JSON."))
            .message(ChatMessage::user(prompt));

        let evidence_note_ids: Vec<Value> = notes
            .iter()
            .take(10)
            .map(|n| json!(n.get("note_id").and_then(Value::as_str).unwrap_or("")))
            .collect();

        match self.llm.chat(request).await {
            Ok(response) => {
                let raw = response.content().unwrap_or("{}");
                let cleaned = crate::llm::extract_json(raw);
                match serde_json::from_str::<Value>(cleaned) {
                    Ok(data) => {
                        let patterns = data.get("patterns").and_then(Value::as_array).cloned().unwrap_or_default();
                        let confidence = data.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
                        StepResult::ok(
                            step_id,
                            self.name(),
                            json!({ "patterns": patterns, "evidence_note_ids": evidence_note_ids, "confidence": confidence }),
                            now_ms(start),
                        )
                    }
                    Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
                }
            }
            Err(e) => StepResult::fail(step_id, self.name(), e.to_string(), now_ms(start)),
        }
    }
}

pub struct ComparePeriods {
    stores: Arc<Stores>,
    llm: Arc<dyn LlmClient>,
}

const COMPARISON_KEY_TYPES: &[&str] = &["app", "topic", "category", "domain"];

impl ComparePeriods {
    pub fn new(stores: Arc<Stores>, llm: Arc<dyn LlmClient>) -> Self {
        Self { stores, llm }
    }

    async fn period_aggregates(&self, period: &TimeFilter) -> Map<String, Value> {
        let mut data = Map::new();
        for key_type in COMPARISON_KEY_TYPES {
            let items = self
                .stores
                .aggregates
                .top_by_key_type(key_type, Some(period), 5)
                .await
                .unwrap_or_default();
            let entries: Vec<Value> = items.into_iter().map(|i| json!({"key": i.key, "minutes": i.value})).collect();
            data.insert(key_type.to_string(), Value::Array(entries));
        }
        data
    }

    async fn analyze_comparison(
        &self,
        period_a_desc: &str,
        period_b_desc: &str,
        period_a_data: &Map<String, Value>,
        period_b_data: &Map<String, Value>,
        focus: &str,
    ) -> (Vec<Value>, Vec<Value>) {
        let prompt = format!(
            "Compare these two time periods and identify key differences and commonalities.\n\n\
Period A ({period_a_desc}):\n{}\n\n\
Period B ({period_b_desc}):\n{}\n\n\
Focus area: {focus}\n\n\
Output JSON:\n{{\n  \"differences\": [\"Difference 1\", \"Difference 2\", ...],\n  \"commonalities\": [\"Commonality 1\", \"Commonality 2\", ...]\n}}\n\n\
Be specific and mention actual data values where relevant.",
            serde_json::to_string_pretty(period_a_data).unwrap_or_default(),
            serde_json::to_string_pretty(period_b_data).unwrap_or_default(),
        );

        let request = ChatCompletionRequest::new(ANALYSIS_MODEL)
            .temperature(0.3)
            .max_tokens(500)
            .response_format(ResponseFormat::json())
            .message(ChatMessage::system("You analyze activity data comparisons. Output JSON."))
            .message(ChatMessage::user(prompt));

        let llm_result = self.llm.chat(request).await.ok().and_then(|resp| {
            let raw = resp.content().unwrap_or("{}").to_string();
            let cleaned = crate::llm::extract_json(&raw).to_string();
            serde_json::from_str::<Value>(&cleaned).ok()
        });

        if let Some(data) = llm_result {
            let differences = data.get("differences").and_then(Value::as_array).cloned().unwrap_or_default();
            let commonalities = data.get("commonalities").and_then(Value::as_array).cloned().unwrap_or_default();
            if !differences.is_empty() || !commonalities.is_empty() {
                return (differences, commonalities);
            }
        }

        self.basic_comparison(period_a_data, period_b_data)
    }

    fn basic_comparison(&self, period_a_data: &Map<String, Value>, period_b_data: &Map<String, Value>) -> (Vec<Value>, Vec<Value>) {
        let mut differences = Vec::new();
        let mut commonalities = Vec::new();

        for key_type in COMPARISON_KEY_TYPES {
            let a_keys: HashSet<&str> = period_a_data
                .get(*key_type)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.get("key").and_then(Value::as_str)).collect())
                .unwrap_or_default();
            let b_keys: HashSet<&str> = period_b_data
                .get(*key_type)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.get("key").and_then(Value::as_str)).collect())
                .unwrap_or_default();

            let only_a: Vec<&str> = a_keys.difference(&b_keys).take(3).copied().collect();
            let only_b: Vec<&str> = b_keys.difference(&a_keys).take(3).copied().collect();
            let common: Vec<&str> = a_keys.intersection(&b_keys).take(3).copied().collect();

            if !only_a.is_empty() {
                differences.push(json!(format!("{key_type}: {} only in period A", only_a.join(", "))));
            }
            if !only_b.is_empty() {
                differences.push(json!(format!("{key_type}: {} only in period B", only_b.join(", "))));
            }
            if !common.is_empty() {
                commonalities.push(json!(format!("{key_type}: {} in both periods", common.join(", "))));
            }
        }

        (differences, commonalities)
    }
}

#[async_trait]
impl Action for ComparePeriods {
    fn name(&self) -> ActionName {
        ActionName::ComparePeriods
    }

    async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());

        let period_a_param = params.get("period_a");
        let period_b_param = params.get("period_b");
        if period_a_param.is_none() || period_b_param.is_none() {
            return StepResult::fail(step_id, self.name(), "Both period_a and period_b are required", now_ms(start));
        }

        let period_a = TimeFilter::from_param(period_a_param);
        let period_b = TimeFilter::from_param(period_b_param);
        let (Some(period_a), Some(period_b)) = (period_a, period_b) else {
            return StepResult::fail(step_id, self.name(), "Could not parse time periods", now_ms(start));
        };

        let focus = get_str(params, "focus").unwrap_or("general");

        let period_a_data = self.period_aggregates(&period_a).await;
        let period_b_data = self.period_aggregates(&period_b).await;

        let period_a_desc = period_a.description.clone().unwrap_or_default();
        let period_b_desc = period_b.description.clone().unwrap_or_default();

        let (differences, commonalities) =
            self.analyze_comparison(&period_a_desc, &period_b_desc, &period_a_data, &period_b_data, focus).await;

        StepResult::ok(
            step_id,
            self.name(),
            json!({
                "period_a_description": period_a_desc,
                "period_b_description": period_b_desc,
                "period_a_data": period_a_data,
                "period_b_data": period_b_data,
                "differences": differences,
                "commonalities": commonalities,
            }),
            now_ms(start),
        )
    }
}

pub struct TemporalSequence;

impl TemporalSequence {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemporalSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for TemporalSequence {
    fn name(&self) -> ActionName {
        ActionName::TemporalSequence
    }

    async fn execute(&self, params: &Map<String, Value>, context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let activity_filter = get_str(params, "activity_filter").unwrap_or("").to_lowercase();
        let sequence_type = get_str(params, "sequence_type").unwrap_or("after");

        let notes = notes_from_ref_or_context(params, context);

        if notes.is_empty() {
            return StepResult::ok(
                step_id,
                self.name(),
                json!({ "sequence_items": [], "activity_filter": activity_filter, "sequence_type": sequence_type }),
                now_ms(start),
            );
        }

        let mut sorted_notes = notes;
        sorted_notes.sort_by(|a, b| {
            let a_ts = a.get("start_ts").and_then(Value::as_str).unwrap_or("");
            let b_ts = b.get("start_ts").and_then(Value::as_str).unwrap_or("");
            a_ts.cmp(b_ts)
        });

        let matching_indices: Vec<usize> = sorted_notes
            .iter()
            .enumerate()
            .filter(|(_, note)| {
                let summary = note.get("summary").and_then(Value::as_str).unwrap_or("").to_lowercase();
                let categories_match = note
                    .get("categories")
                    .and_then(Value::as_array)
                    .map(|cats| cats.iter().filter_map(Value::as_str).any(|c| c.to_lowercase() == activity_filter))
                    .unwrap_or(false);
                summary.contains(&activity_filter) || categories_match
            })
            .map(|(i, _)| i)
            .collect();

        let mut sequence_items = Vec::new();
        for idx in &matching_indices {
            let idx = *idx;
            let neighbor = if sequence_type == "after" {
                sorted_notes.get(idx + 1)
            } else if idx > 0 {
                sorted_notes.get(idx - 1)
            } else {
                None
            };

            if let Some(note) = neighbor {
                let categories: Vec<&str> = note
                    .get("categories")
                    .and_then(Value::as_array)
                    .map(|cats| cats.iter().filter_map(Value::as_str).take(2).collect())
                    .unwrap_or_default();
                let summary: String = note.get("summary").and_then(Value::as_str).unwrap_or("").chars().take(100).collect();
                sequence_items.push(json!({
                    "timestamp": note.get("start_ts").cloned().unwrap_or(Value::Null),
                    "activity": summary,
                    "category": categories.join(", "),
                    "note_id": note.get("note_id").cloned().unwrap_or(Value::Null),
                }));
            }
        }

        StepResult::ok(
            step_id,
            self.name(),
            json!({
                "sequence_items": sequence_items,
                "activity_filter": activity_filter,
                "sequence_type": sequence_type,
                "matches_found": matching_indices.len(),
            }),
            now_ms(start),
        )
    }
}

pub struct MergeResults;

impl MergeResults {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergeResults {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for MergeResults {
    fn name(&self) -> ActionName {
        ActionName::MergeResults
    }

    async fn execute(&self, params: &Map<String, Value>, context: &ExecutionContext) -> StepResult {
        let start = Instant::now();
        let step_id = step_id_of(params, self.name());
        let result_refs = get_str_list(params, "result_refs").unwrap_or_default();

        let mut merged_notes: Vec<Value> = Vec::new();
        let mut merged_entities: Vec<Value> = Vec::new();
        let mut merged_aggregates: Vec<Value> = Vec::new();
        let mut seen_note_ids: HashSet<String> = HashSet::new();
        let mut seen_entity_ids: HashSet<String> = HashSet::new();

        for step_ref in &result_refs {
            let Some(ref_result) = context.get_result(step_ref) else { continue };
            let Some(data) = &ref_result.result else { continue };

            if let Some(notes) = data.get("notes").and_then(Value::as_array) {
                for note in notes {
                    if let Some(note_id) = note.get("note_id").and_then(Value::as_str) {
                        if seen_note_ids.insert(note_id.to_string()) {
                            merged_notes.push(note.clone());
                        }
                    }
                }
            }

            let related = data.get("related_entities").and_then(Value::as_array).into_iter().flatten();
            let plain = data.get("entities").and_then(Value::as_array).into_iter().flatten();
            for entity in related.chain(plain) {
                if let Some(entity_id) = entity.get("entity_id").and_then(Value::as_str) {
                    if seen_entity_ids.insert(entity_id.to_string()) {
                        merged_entities.push(entity.clone());
                    }
                }
            }

            if let Some(aggregates) = data.get("aggregates").and_then(Value::as_array) {
                merged_aggregates.extend(aggregates.iter().cloned());
            }
        }

        for note in context.get_all_notes() {
            if let Some(note_id) = note.get("note_id").and_then(Value::as_str) {
                if seen_note_ids.insert(note_id.to_string()) {
                    merged_notes.push(note);
                }
            }
        }

        merged_notes.sort_by(|a, b| {
            let a_ts = a.get("start_ts").and_then(Value::as_str).unwrap_or("");
            let b_ts = b.get("start_ts").and_then(Value::as_str).unwrap_or("");
            b_ts.cmp(a_ts)
        });

        let total_notes = merged_notes.len();
        let total_entities = merged_entities.len();

        StepResult::ok(
            step_id,
            self.name(),
            json!({
                "notes": merged_notes,
                "entities": merged_entities,
                "aggregates": merged_aggregates,
                "total_notes": total_notes,
                "total_entities": total_entities,
            }),
            now_ms(start),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletionResponse, ChatMessageOut, Choice, LlmResult};
    use crate::schemas::{ActionName as AN, StepResult as SR};

    struct StubLlm(String);

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat(&self, _r: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
            Ok(ChatCompletionResponse { choices: vec![Choice { message: ChatMessageOut { content: Some(self.0.clone()) } }] })
        }
    }

    #[tokio::test]
    async fn extract_patterns_reports_insufficient_data() {
        let action = ExtractPatterns::new(Arc::new(StubLlm("{}".to_string())));
        let ctx = ExecutionContext::new();
        let result = action.execute(&Map::new(), &ctx).await;
        assert!(result.success);
        let payload = result.result.unwrap();
        assert_eq!(payload["confidence"], 0.0);
    }

    #[tokio::test]
    async fn extract_patterns_uses_context_notes() {
        let action = ExtractPatterns::new(Arc::new(StubLlm(
            r#"{"patterns": ["pattern one"], "confidence": 0.8}"#.to_string(),
        )));
        let mut ctx = ExecutionContext::new();
        ctx.add_result(SR::ok("s1", AN::SemanticSearch, json!({"notes": [{"note_id": "n1", "start_ts": "t"}]}), 1.0));
        let result = action.execute(&Map::new(), &ctx).await;
        assert!(result.success);
        let payload = result.result.unwrap();
        assert_eq!(payload["confidence"], 0.8);
    }

    struct EmptyAggregates;
    #[async_trait]
    impl crate::stores::AggregatesStore for EmptyAggregates {
        async fn top_by_key_type(
            &self,
            _key_type: &str,
            _time_filter: Option<&TimeFilter>,
            _limit: usize,
        ) -> crate::stores::StoreResult<Vec<crate::stores::AggregateItem>> {
            Ok(vec![])
        }
    }

    struct UnusedNotes;
    #[async_trait]
    impl crate::stores::NoteStore for UnusedNotes {
        async fn semantic_search(&self, _q: &str, _tf: Option<&TimeFilter>, _l: usize) -> crate::stores::StoreResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn entity_search(
            &self,
            _e: &str,
            _t: Option<&str>,
            _tf: Option<&TimeFilter>,
            _l: usize,
        ) -> crate::stores::StoreResult<(Vec<Value>, Vec<Value>)> {
            Ok((vec![], vec![]))
        }
        async fn hierarchical_search(&self, _q: &str, _tf: Option<&TimeFilter>, _d: u32) -> crate::stores::StoreResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn time_range_notes(&self, _tf: &TimeFilter, _nt: Option<&str>, _l: usize) -> crate::stores::StoreResult<Vec<Value>> {
            Ok(vec![])
        }
    }

    struct UnusedGraph;
    #[async_trait]
    impl crate::stores::GraphStore for UnusedGraph {
        async fn get_entity_context(&self, _n: &str, _t: Option<&str>, _tf: Option<&TimeFilter>) -> crate::stores::StoreResult<Value> {
            Ok(json!({}))
        }
        async fn expand_from_entities(
            &self,
            _i: &[String],
            _h: u32,
            _tf: Option<&TimeFilter>,
            _e: Option<&[String]>,
            _m: Option<f64>,
            _mr: usize,
        ) -> crate::stores::StoreResult<(Vec<Value>, Vec<Value>)> {
            Ok((vec![], vec![]))
        }
        async fn find_connections(&self, _a: &str, _b: &str, _mh: u32) -> crate::stores::StoreResult<Vec<Vec<Value>>> {
            Ok(vec![])
        }
    }

    fn stub_stores() -> Arc<Stores> {
        Arc::new(Stores {
            notes: Arc::new(UnusedNotes),
            aggregates: Arc::new(EmptyAggregates),
            graph: Arc::new(UnusedGraph),
            web: None,
        })
    }

    #[tokio::test]
    async fn compare_periods_requires_both_periods() {
        let action = ComparePeriods::new(stub_stores(), Arc::new(StubLlm("{}".to_string())));
        let ctx = ExecutionContext::new();
        let params = Map::from_iter([("period_a".to_string(), json!("January"))]);
        let result = action.execute(&params, &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Both period_a and period_b are required"));
    }

    #[tokio::test]
    async fn temporal_sequence_finds_successor() {
        let action = TemporalSequence::new();
        let mut ctx = ExecutionContext::new();
        ctx.add_result(SR::ok(
            "s1",
            AN::SemanticSearch,
            json!({"notes": [
                {"note_id": "n1", "start_ts": "2026-01-01T00:00:00Z", "summary": "studied rust"},
                {"note_id": "n2", "start_ts": "2026-01-01T01:00:00Z", "summary": "listened to jazz"}
            ]}),
            1.0,
        ));
        let params = Map::from_iter([
            ("activity_filter".to_string(), json!("rust")),
            ("sequence_type".to_string(), json!("after")),
        ]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        let payload = result.result.unwrap();
        assert_eq!(payload["matches_found"], 1);
        assert_eq!(payload["sequence_items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_results_dedups_and_double_includes_context_notes() {
        let action = MergeResults::new();
        let mut ctx = ExecutionContext::new();
        ctx.add_result(SR::ok(
            "s1",
            AN::SemanticSearch,
            json!({"notes": [{"note_id": "n1", "start_ts": "2026-01-02T00:00:00Z"}]}),
            1.0,
        ));
        ctx.add_result(SR::ok(
            "s2",
            AN::HierarchicalSearch,
            json!({"notes": [{"note_id": "n2", "start_ts": "2026-01-01T00:00:00Z"}]}),
            1.0,
        ));
        let params = Map::from_iter([("result_refs".to_string(), json!(["s1", "s2"]))]);
        let result = action.execute(&params, &ctx).await;
        assert!(result.success);
        let payload = result.result.unwrap();
        assert_eq!(payload["total_notes"], 2);
        assert_eq!(payload["notes"][0]["note_id"], "n1");
        assert!(payload.get("web_results").is_none());
    }
}
