//! Research mode: decompose a query into an ordered step plan and drive it
//! to completion, accumulating keyed results.
//!
//! The planner produces the whole step list up front; the executor consumes
//! it strictly in order. Steps can iterate over a previously collected
//! sequence, fanning out once per item. Partial results survive a failed
//! step, so a broken run still reports what it found.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LoreError, LoreResult};
use crate::gateway::GenerationGateway;
use crate::tool::{ToolKind, Toolbox};
use crate::types::CallerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One step of a research plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStep {
    pub step_id: String,
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Output key of an earlier step whose sequence this step fans out over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterate_over: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl ResearchStep {
    fn result_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.step_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub steps: Vec<ResearchStep>,
}

/// Execution state of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub status: ResearchStatus,
    pub plan: ResearchPlan,
    pub current_step_index: usize,
    /// output key → result. Iterating steps store an item → result map.
    pub collected: Map<String, Value>,
}

impl ResearchState {
    fn new(plan: ResearchPlan) -> Self {
        Self {
            status: ResearchStatus::Pending,
            plan,
            current_step_index: 0,
            collected: Map::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_step_index >= self.plan.steps.len()
    }
}

/// Asks the model for a step plan and validates it.
pub struct ResearchPlanner {
    gateway: Arc<GenerationGateway>,
}

impl ResearchPlanner {
    pub fn new(gateway: Arc<GenerationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn plan(&self, query: &str) -> LoreResult<ResearchPlan> {
        let tool_names: Vec<&str> = ToolKind::ALL.iter().map(|k| k.name()).collect();
        let prompt = format!(
            "Break this research question into an ordered list of tool steps.\n\
             Available tools: {}.\n\
             Reply with only a JSON array of steps:\n\
             [{{\"step_id\": \"s1\", \"tool\": \"<tool name>\", \"parameters\": {{...}}, \
             \"depends_on\": \"<earlier step_id, optional>\", \
             \"iterate_over\": \"<earlier output_key holding a list, optional>\", \
             \"output_key\": \"<key to store the result under, optional>\"}}]\n\
             A step with iterate_over runs once per item; write {{item}} in its \
             parameters where the item belongs.\n\n\
             Question: {query}",
            tool_names.join(", ")
        );

        let reply = self.gateway.complete(&prompt).await?;
        let cleaned = crate::tool::strip_code_fences(&reply);
        let steps: Vec<ResearchStep> = serde_json::from_str(cleaned).map_err(|e| {
            tracing::warn!(raw = %reply, "unparsable research plan");
            LoreError::Planning(format!("plan was not valid JSON: {e}"))
        })?;

        let plan = ResearchPlan { steps };
        validate_plan(&plan)?;
        Ok(plan)
    }
}

fn validate_plan(plan: &ResearchPlan) -> LoreResult<()> {
    if plan.steps.is_empty() {
        return Err(LoreError::Planning("plan has no steps".into()));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &plan.steps {
        if ToolKind::from_name(&step.tool).is_none() {
            return Err(LoreError::Planning(format!(
                "step {} uses unknown tool {}",
                step.step_id, step.tool
            )));
        }
        if let Some(dep) = &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(LoreError::Planning(format!(
                    "step {} depends on {dep}, which does not precede it",
                    step.step_id
                )));
            }
        }
        if !seen_ids.insert(&step.step_id) {
            return Err(LoreError::Planning(format!(
                "duplicate step id {}",
                step.step_id
            )));
        }
    }
    Ok(())
}

/// Drives a validated plan against the toolbox.
pub struct ResearchRunner {
    toolbox: Arc<Toolbox>,
}

impl ResearchRunner {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }

    pub async fn execute(&self, plan: ResearchPlan, caller: &CallerContext) -> ResearchState {
        self.execute_seeded(plan, caller, Map::new()).await
    }

    /// Execute with pre-collected data, e.g. inputs the host already has.
    pub async fn execute_seeded(
        &self,
        plan: ResearchPlan,
        caller: &CallerContext,
        seed: Map<String, Value>,
    ) -> ResearchState {
        let mut state = ResearchState::new(plan);
        state.collected = seed;
        state.status = ResearchStatus::InProgress;

        while state.current_step_index < state.plan.steps.len() {
            let step = state.plan.steps[state.current_step_index].clone();

            let outcome = if let Some(source_key) = &step.iterate_over {
                self.run_iterating(&step, source_key, &state.collected, caller)
                    .await
            } else {
                self.run_single(&step, caller).await
            };

            match outcome {
                Ok(value) => {
                    state.collected.insert(step.result_key().to_string(), value);
                    state.current_step_index += 1;
                }
                Err(e) => {
                    tracing::warn!(step_id = %step.step_id, error = %e, "research step failed");
                    state.status = ResearchStatus::Failed;
                    return state;
                }
            }
        }

        state.status = ResearchStatus::Completed;
        state
    }

    async fn run_single(&self, step: &ResearchStep, caller: &CallerContext) -> LoreResult<Value> {
        let kind = tool_kind(step)?;
        let response = self.toolbox.execute(caller, kind, &step.parameters).await;
        if !response.success {
            return Err(LoreError::Planning(format!(
                "step {} failed: {}",
                step.step_id,
                response.message.unwrap_or_default()
            )));
        }
        Ok(result_value(response.answer, response.message))
    }

    /// Fan out over a previously collected sequence. A failed item stores an
    /// error marker; it never aborts its siblings.
    async fn run_iterating(
        &self,
        step: &ResearchStep,
        source_key: &str,
        collected: &Map<String, Value>,
        caller: &CallerContext,
    ) -> LoreResult<Value> {
        let items = collected
            .get(source_key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                LoreError::Planning(format!(
                    "step {} iterates over {source_key}, which holds no sequence",
                    step.step_id
                ))
            })?;

        let kind = tool_kind(step)?;
        let executions = items.iter().map(|item| {
            let params = substitute_item(&step.parameters, item);
            async move {
                let response = self.toolbox.execute(caller, kind, &params).await;
                let value = if response.success {
                    result_value(response.answer, response.message)
                } else {
                    serde_json::json!({
                        "error": response.message.unwrap_or_else(|| "tool failed".into())
                    })
                };
                (item_label(item), value)
            }
        });

        let mut map = Map::new();
        for (label, value) in join_all(executions).await {
            map.insert(label, value);
        }
        Ok(Value::Object(map))
    }
}

fn tool_kind(step: &ResearchStep) -> LoreResult<ToolKind> {
    ToolKind::from_name(&step.tool).ok_or_else(|| {
        LoreError::Planning(format!(
            "step {} uses unknown tool {}",
            step.step_id, step.tool
        ))
    })
}

/// Store an answer that parses as a JSON array as the array itself, so a
/// later step can iterate over it.
fn result_value(answer: Option<String>, message: Option<String>) -> Value {
    if let Some(answer) = &answer {
        if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(answer) {
            return parsed;
        }
    }
    match (answer, message) {
        (Some(a), _) => Value::String(a),
        (None, Some(m)) => Value::String(m),
        (None, None) => Value::Null,
    }
}

fn item_label(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `{item}` in every string parameter with the current item.
fn substitute_item(parameters: &Value, item: &Value) -> Value {
    match parameters {
        Value::String(s) => Value::String(s.replace("{item}", &item_label(item))),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_item(v, item)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_item(v, item)).collect())
        }
        other => other.clone(),
    }
}
