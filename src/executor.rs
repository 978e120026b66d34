//! Plan executor: runs a validated [`QueryPlan`] phase by phase, bounding
//! within-phase fan-out to a worker cap and enforcing per-step and
//! whole-plan deadlines.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::actions::ActionRegistry;
use crate::config::AgenticConfig;
use crate::schemas::{ExecutionContext, ExecutionResult, PlanStep, PlanValidationError, QueryPlan, StepResult};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    #[error("plan cannot be executed: {0}")]
    InvalidPlan(#[from] PlanValidationError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Runs one plan at a time; stateless beyond its registry and tuning
/// knobs, so a single instance is shared across concurrent `execute` calls.
pub struct PlanExecutor {
    registry: Arc<ActionRegistry>,
    max_workers: usize,
    max_plan_timeout_seconds: f64,
}

impl PlanExecutor {
    pub fn new(registry: ActionRegistry) -> Self {
        Self::with_config(registry, &AgenticConfig::default())
    }

    pub fn with_config(registry: ActionRegistry, config: &AgenticConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            max_workers: config.max_workers.max(1),
            max_plan_timeout_seconds: config.max_plan_timeout_seconds,
        }
    }

    /// Execute `plan`, returning a well-formed result even when individual
    /// steps fail. Only a structurally invalid plan (e.g. a dependency
    /// cycle handed in directly, bypassing the planner's own validation)
    /// is rejected outright.
    pub async fn execute(&self, plan: &QueryPlan) -> ExecutorResult<ExecutionResult> {
        let phases = plan.get_execution_order()?;
        let plan_start = Instant::now();

        match AssertUnwindSafe(self.run_phases(plan, &phases, plan_start)).catch_unwind().await {
            Ok(result) => Ok(result),
            Err(panic) => {
                let reason = panic_message(&panic);
                error!(plan_id = %plan.plan_id, reason = %reason, "plan execution hit the outer fault boundary");
                Ok(ExecutionResult {
                    plan_id: plan.plan_id.clone(),
                    query: plan.query.clone(),
                    success: false,
                    steps_completed: 0,
                    steps_failed: 0,
                    total_execution_time_ms: plan_start.elapsed().as_secs_f64() * 1000.0,
                    merged_notes: Vec::new(),
                    merged_entities: Vec::new(),
                    aggregates: Vec::new(),
                    web_results: Vec::new(),
                    patterns: Vec::new(),
                    comparison: None,
                    fallback_used: true,
                    fallback_reason: Some(reason),
                    step_results: HashMap::new(),
                })
            }
        }
    }

    /// Offloads `execute` onto a dedicated task, for callers that want to
    /// fire a plan and continue without holding the calling task open.
    pub async fn execute_async(self: Arc<Self>, plan: QueryPlan) -> ExecutorResult<ExecutionResult> {
        match tokio::spawn(async move { self.execute(&plan).await }).await {
            Ok(result) => result,
            Err(join_err) => Ok(ExecutionResult {
                plan_id: String::new(),
                query: String::new(),
                success: false,
                steps_completed: 0,
                steps_failed: 0,
                total_execution_time_ms: 0.0,
                merged_notes: Vec::new(),
                merged_entities: Vec::new(),
                aggregates: Vec::new(),
                web_results: Vec::new(),
                patterns: Vec::new(),
                comparison: None,
                fallback_used: true,
                fallback_reason: Some(join_err.to_string()),
                step_results: HashMap::new(),
            }),
        }
    }

    async fn run_phases(&self, plan: &QueryPlan, phases: &[Vec<String>], plan_start: Instant) -> ExecutionResult {
        let steps_by_id: HashMap<&str, &PlanStep> = plan.steps.iter().map(|s| (s.step_id.as_str(), s)).collect();
        let mut context = ExecutionContext::new();
        let mut steps_completed = 0usize;
        let mut steps_failed = 0usize;

        for phase in phases {
            if plan_start.elapsed().as_secs_f64() >= self.max_plan_timeout_seconds {
                warn!(plan_id = %plan.plan_id, "plan deadline exceeded; remaining phases not scheduled");
                break;
            }

            let phase_steps: Vec<PlanStep> =
                phase.iter().filter_map(|id| steps_by_id.get(id.as_str()).map(|s| (*s).clone())).collect();
            if phase_steps.is_empty() {
                continue;
            }

            info!(plan_id = %plan.plan_id, phase_size = phase_steps.len(), "dispatching phase");
            let context_snapshot = Arc::new(context.clone());
            let results = self.run_phase_steps(&phase_steps, context_snapshot).await;

            for result in results {
                if result.success {
                    steps_completed += 1;
                } else {
                    steps_failed += 1;
                    let required = steps_by_id.get(result.step_id.as_str()).map(|s| s.required).unwrap_or(false);
                    if required {
                        warn!(plan_id = %plan.plan_id, step_id = %result.step_id, error = ?result.error, "required step failed");
                    }
                }
                context.add_result(result);
            }
        }

        assemble_result(plan, context, steps_completed, steps_failed, plan_start)
    }

    /// Runs every step in the phase concurrently, bounded to
    /// `min(max_workers, |phase|)` in-flight steps at once. A single-step
    /// phase takes the same path with a cap of one, which is exactly
    /// equivalent to running it inline.
    async fn run_phase_steps(&self, steps: &[PlanStep], context: Arc<ExecutionContext>) -> Vec<StepResult> {
        let permits = self.max_workers.min(steps.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let futures = steps.iter().cloned().map(|step| {
            let semaphore = semaphore.clone();
            let registry = self.registry.clone();
            let context = context.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                execute_step(&registry, step, &context).await
            }
        });

        future::join_all(futures).await
    }
}

async fn execute_step(registry: &ActionRegistry, step: PlanStep, context: &ExecutionContext) -> StepResult {
    let Some(action) = registry.get(step.action) else {
        return StepResult::fail(step.step_id.clone(), step.action, format!("Unknown action: {}", step.action), 0.0);
    };

    let mut params = step.params.clone();
    params.insert("step_id".to_string(), Value::String(step.step_id.clone()));

    match timeout(Duration::from_secs_f64(step.timeout_seconds), action.execute(&params, context)).await {
        Ok(result) => result,
        Err(_) => StepResult::fail(step.step_id.clone(), step.action, "Execution timeout", step.timeout_seconds * 1000.0),
    }
}

fn assemble_result(
    plan: &QueryPlan,
    context: ExecutionContext,
    steps_completed: usize,
    steps_failed: usize,
    plan_start: Instant,
) -> ExecutionResult {
    let merged_notes = sort_notes_desc(context.get_all_notes());
    let merged_entities = context.get_all_entities();
    let aggregates = context.get_all_aggregates();
    let web_results = context.get_all_web_results();

    let mut patterns = Vec::new();
    let mut comparison = None;
    let mut step_results = HashMap::new();

    for result in context.get_all_results() {
        if let Some(payload) = &result.result {
            if let Some(found) = payload.get("patterns").and_then(Value::as_array) {
                patterns.extend(found.iter().cloned());
            }
            if payload.get("period_a_description").is_some() {
                comparison = Some(payload.clone());
            }
        }
        step_results.insert(result.step_id.clone(), result.clone());
    }

    let success = steps_completed > 0 || !merged_notes.is_empty();

    ExecutionResult {
        plan_id: plan.plan_id.clone(),
        query: plan.query.clone(),
        success,
        steps_completed,
        steps_failed,
        total_execution_time_ms: plan_start.elapsed().as_secs_f64() * 1000.0,
        merged_notes,
        merged_entities,
        aggregates,
        web_results,
        patterns,
        comparison,
        fallback_used: false,
        fallback_reason: None,
        step_results,
    }
}

/// Final `merged_notes` order: `start_ts` descending, ties broken by
/// insertion order (preserved because `sort_by` is stable).
fn sort_notes_desc(mut notes: Vec<Value>) -> Vec<Value> {
    notes.sort_by(|a, b| {
        let a_ts = a.get("start_ts").and_then(Value::as_str).unwrap_or("");
        let b_ts = b.get("start_ts").and_then(Value::as_str).unwrap_or("");
        b_ts.cmp(a_ts)
    });
    notes
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected error during plan execution".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::time::Duration as StdDuration;

    use crate::schemas::{ActionName, QueryType};

    struct Echo;
    #[async_trait]
    impl crate::actions::Action for Echo {
        fn name(&self) -> ActionName {
            ActionName::SemanticSearch
        }
        async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
            let step_id = params.get("step_id").and_then(Value::as_str).unwrap_or("").to_string();
            StepResult::ok(step_id, self.name(), json!({"notes": [{"note_id": "n1", "start_ts": "2026-01-01T00:00:00Z"}]}), 1.0)
        }
    }

    struct Slow;
    #[async_trait]
    impl crate::actions::Action for Slow {
        fn name(&self) -> ActionName {
            ActionName::HierarchicalSearch
        }
        async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            let step_id = params.get("step_id").and_then(Value::as_str).unwrap_or("").to_string();
            StepResult::ok(step_id, self.name(), json!({"notes": []}), 50.0)
        }
    }

    struct VerySlow;
    #[async_trait]
    impl crate::actions::Action for VerySlow {
        fn name(&self) -> ActionName {
            ActionName::AggregatesQuery
        }
        async fn execute(&self, params: &Map<String, Value>, _context: &ExecutionContext) -> StepResult {
            tokio::time::sleep(StdDuration::from_millis(1200)).await;
            let step_id = params.get("step_id").and_then(Value::as_str).unwrap_or("").to_string();
            StepResult::ok(step_id, self.name(), json!({"notes": []}), 1200.0)
        }
    }

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        r.register(Arc::new(Echo));
        r.register(Arc::new(Slow));
        r.register(Arc::new(VerySlow));
        r
    }

    fn plan_with(steps: Vec<PlanStep>) -> QueryPlan {
        QueryPlan {
            plan_id: "p1".into(),
            query: "q".into(),
            query_type: QueryType::Simple,
            reasoning: "r".into(),
            steps,
            estimated_time_seconds: 10.0,
            requires_web_search: false,
        }
    }

    #[tokio::test]
    async fn executes_linear_plan_and_merges_notes() {
        let step = PlanStep::new("s1", ActionName::SemanticSearch, "search").with_timeout_seconds(5.0);
        let executor = PlanExecutor::new(registry());
        let result = executor.execute(&plan_with(vec![step])).await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_completed, 1);
        assert_eq!(result.merged_notes.len(), 1);
        assert!(!result.fallback_used);
    }

    #[tokio::test]
    async fn times_out_slow_step() {
        let step = PlanStep::new("s1", ActionName::AggregatesQuery, "slow").with_timeout_seconds(0.01);
        let executor = PlanExecutor::new(registry());
        let result = executor.execute(&plan_with(vec![step])).await.unwrap();
        assert_eq!(result.steps_failed, 1);
        let failed = &result.step_results["s1"];
        assert_eq!(failed.error.as_deref(), Some("Execution timeout"));
    }

    #[tokio::test]
    async fn rejects_cyclic_plan() {
        let s1 = PlanStep::new("s1", ActionName::SemanticSearch, "a").with_depends_on(vec!["s2".to_string()]);
        let s2 = PlanStep::new("s2", ActionName::SemanticSearch, "b").with_depends_on(vec!["s1".to_string()]);
        let executor = PlanExecutor::new(registry());
        let result = executor.execute(&plan_with(vec![s1, s2])).await;
        assert!(matches!(result, Err(ExecutorError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn unknown_action_fails_the_step_without_aborting_the_plan() {
        let step = PlanStep::new("s1", ActionName::WebSearch, "unregistered");
        let executor = PlanExecutor::new(ActionRegistry::new());
        let result = executor.execute(&plan_with(vec![step])).await.unwrap();
        assert_eq!(result.steps_failed, 1);
        assert!(result.step_results["s1"].error.as_deref().unwrap().starts_with("Unknown action"));
    }

    #[tokio::test]
    async fn runs_phase_steps_concurrently_not_sequentially() {
        let s1 = PlanStep::new("s1", ActionName::HierarchicalSearch, "a");
        let s2 = PlanStep::new("s2", ActionName::HierarchicalSearch, "b");
        let executor = PlanExecutor::new(registry());
        let start = Instant::now();
        let result = executor.execute(&plan_with(vec![s1, s2])).await.unwrap();
        assert_eq!(result.steps_completed, 2);
        assert!(start.elapsed() < StdDuration::from_millis(90));
    }
}
