//! LLM Plan Arbitration
//!
//! Asks a completion service to confirm or adjust the deterministic plan, then
//! merges its answer field by field. The deterministic plan is always a valid
//! answer on its own: any failure (transport error, panic, deadline,
//! unparseable text) returns its decision unchanged, with one trail entry
//! saying why arbitration was skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::company_aliases::CompanyAliases;
use super::routing_policy::CompletenessWeights;
use crate::error::{RouterError, RouterResult};
use crate::llm::CompletionService;
use crate::types::{
    sanitize_fallback, DocType, ExtractedMetadata, FieldSource, Quarter, Route, RoutingPlan,
    Stage, SubTask,
};

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

const ARBITER_SYSTEM_PROMPT: &str = r#"You route questions about SEC filings (10-K, 10-Q, 8-K) of US banks to a retrieval strategy. Output a JSON object with these fields:

{"route":"cypher|hybrid|rag|multi","fallback":["..."],"metadata":{"company":"...","year":2024,"quarter":"Q1","doc_type":"10-K"},"sub_tasks":[{"topic":"...","metadata":{},"suggested_route":"..."}],"reasoning":"..."}

ROUTES:
- "cypher": structured graph lookup keyed by company/year/quarter/filing. Best for a single number or ratio ("CET1 ratio", "total assets", "net income") when company and year are known.
- "hybrid": semantic search narrowed by structured filters. Best for tables (balance sheet, income statement), named sections (MD&A, Risk Factors, Business) and explanations of strategy or drivers.
- "rag": pure semantic search. Best for open-ended or industry-wide questions ("banking trends", "regulatory changes").
- "multi": split into independent sub-tasks, one per company or period. Best for comparisons across entities ("compare GS and MS", "JPM versus BAC").

RULES:
- fallback: at most 2 routes, never the chosen route.
- metadata.company: the company's stock ticker if you know it.
- metadata.doc_type: one of "10-K", "10-Q", "8-K", "MD&A", "Risk Factors", "Business".
- sub_tasks: only when route is "multi"; each sub-task's suggested_route must not be "multi".
- reasoning: one sentence explaining the decision.
- Omit any field you cannot determine.

Output ONLY the JSON object. Do NOT wrap it in markdown."#;

pub fn build_arbitration_prompt(query: &str, plan: &RoutingPlan) -> String {
    let metadata = serde_json::to_string_pretty(&plan.metadata).unwrap_or_else(|_| "{}".to_string());
    let fallback = plan
        .fallback
        .iter()
        .map(Route::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{}\n\nQuery: \"{}\"\n\nPre-classified as: {} (confidence {:.2})\nSuggested route: {} (fallback: [{}])\n\nPartial metadata:\n{}\n\nComplete the metadata and validate or adjust the routing decision.\nJSON:",
        ARBITER_SYSTEM_PROMPT,
        query,
        plan.intent,
        plan.confidence,
        plan.route,
        fallback,
        metadata,
    )
}

// ---------------------------------------------------------------------------
// Response Parsing
// ---------------------------------------------------------------------------

/// Fields recovered from a completion. Every field is optional; values are
/// typed where possible but not yet validated against the plan invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbiterResponse {
    pub route: Option<String>,
    pub fallback: Option<Vec<String>>,
    /// `company` holds the raw text from the completion, not yet normalized
    pub metadata: Option<ExtractedMetadata>,
    pub sub_tasks: Option<Vec<ArbiterSubTask>>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbiterSubTask {
    pub topic: String,
    pub metadata: ExtractedMetadata,
    pub suggested_route: Option<String>,
}

/// Parse a completion into an [`ArbiterResponse`].
/// Tolerates markdown fences and prose around the JSON object; wrongly typed
/// fields are treated as absent rather than failing the whole response.
pub fn parse_arbiter_response(raw: &str) -> RouterResult<ArbiterResponse> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    let value: Value = serde_json::from_str(json_str).map_err(|e| {
        let preview: String = cleaned.chars().take(200).collect();
        RouterError::MalformedResponse(format!("{} in {:?}", e, preview))
    })?;
    let Value::Object(obj) = value else {
        return Err(RouterError::MalformedResponse("expected a JSON object".to_string()));
    };

    Ok(ArbiterResponse {
        route: string_field(&obj, "route"),
        fallback: obj.get("fallback").and_then(string_list),
        metadata: obj.get("metadata").and_then(Value::as_object).map(metadata_fields),
        sub_tasks: obj.get("sub_tasks").and_then(Value::as_array).map(|items| {
            items.iter().filter_map(sub_task_fields).collect()
        }),
        reasoning: string_field(&obj, "reasoning"),
    })
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts `["rag","hybrid"]` or a bare `"rag"`.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn metadata_fields(obj: &Map<String, Value>) -> ExtractedMetadata {
    ExtractedMetadata {
        company: string_field(obj, "company"),
        year: obj.get("year").and_then(year_value),
        quarter: obj.get("quarter").and_then(quarter_value),
        doc_type: obj
            .get("doc_type")
            .and_then(Value::as_str)
            .and_then(DocType::parse),
    }
}

fn year_value(value: &Value) -> Option<u16> {
    let year = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (1990..=2100).contains(&year).then_some(year as u16)
}

fn quarter_value(value: &Value) -> Option<Quarter> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()).and_then(Quarter::from_number),
        Value::String(s) => Quarter::parse(s),
        _ => None,
    }
}

fn sub_task_fields(value: &Value) -> Option<ArbiterSubTask> {
    match value {
        Value::String(topic) if !topic.trim().is_empty() => Some(ArbiterSubTask {
            topic: topic.trim().to_string(),
            ..Default::default()
        }),
        Value::Object(obj) => Some(ArbiterSubTask {
            topic: string_field(obj, "topic").or_else(|| string_field(obj, "query"))?,
            metadata: obj
                .get("metadata")
                .and_then(Value::as_object)
                .map(metadata_fields)
                .unwrap_or_default(),
            suggested_route: string_field(obj, "suggested_route").or_else(|| string_field(obj, "route")),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge a completion into the deterministic plan, field by field.
///
/// Invalid route names are dropped, companies are re-normalized against the
/// alias table (an unknown company keeps the pattern-derived value), and the
/// fallback list is re-sanitized against the final route.
pub fn merge_plan(
    deterministic: RoutingPlan,
    response: &ArbiterResponse,
    aliases: &CompanyAliases,
    weights: &CompletenessWeights,
) -> RoutingPlan {
    let mut plan = deterministic;
    let mut taken: Vec<&str> = Vec::new();

    if let Some(route) = response.route.as_deref().and_then(Route::parse) {
        if route != plan.route {
            taken.push("route");
        }
        plan.route = route;
        plan.provenance.route = FieldSource::Completion;
    }

    let proposed: Vec<Route> = response
        .fallback
        .iter()
        .flatten()
        .filter_map(|r| Route::parse(r))
        .collect();
    let fallback = sanitize_fallback(plan.route, proposed);
    if fallback.is_empty() {
        plan.fallback = sanitize_fallback(plan.route, plan.fallback.iter().copied());
    } else {
        plan.fallback = fallback;
        plan.provenance.fallback = FieldSource::Completion;
        taken.push("fallback");
    }

    if let Some(meta) = &response.metadata {
        let merged = merge_metadata(&plan.metadata, meta, aliases);
        if merged != plan.metadata {
            plan.metadata = merged;
            plan.provenance.metadata = FieldSource::Completion;
            taken.push("metadata");
        }
    }

    if let Some(tasks) = response.sub_tasks.as_ref().filter(|t| !t.is_empty()) {
        plan.sub_tasks = tasks
            .iter()
            .map(|task| SubTask {
                topic: task.topic.clone(),
                metadata: merge_metadata(&ExtractedMetadata::default(), &task.metadata, aliases)
                    .inherit(&plan.metadata),
                suggested_route: task
                    .suggested_route
                    .as_deref()
                    .and_then(Route::parse)
                    .filter(|r| *r != Route::Multi)
                    .unwrap_or(Route::Hybrid),
            })
            .collect();
        plan.provenance.sub_tasks = FieldSource::Completion;
        taken.push("sub_tasks");
    }

    if let Some(reasoning) = &response.reasoning {
        plan.reasoning = reasoning.clone();
        plan.provenance.reasoning = FieldSource::Completion;
        taken.push("reasoning");
    }

    plan.completeness = weights.score(&plan.metadata);
    let detail = if taken.is_empty() {
        "completion confirmed the deterministic plan".to_string()
    } else {
        format!("completion supplied {}", taken.join(", "))
    };
    plan.record(Stage::Arbitrating, detail);
    plan
}

/// Completion fields win when present; companies must normalize to a ticker.
fn merge_metadata(
    base: &ExtractedMetadata,
    proposed: &ExtractedMetadata,
    aliases: &CompanyAliases,
) -> ExtractedMetadata {
    let company = match proposed.company.as_deref() {
        Some(raw) => match aliases.normalize(raw) {
            Some(ticker) => Some(ticker),
            None => {
                tracing::warn!(company = %raw, "[PlanArbiter] Completion returned a company outside the alias table");
                base.company.clone()
            }
        },
        None => base.company.clone(),
    };

    ExtractedMetadata {
        company,
        year: proposed.year.or(base.year),
        quarter: proposed.quarter.or(base.quarter),
        doc_type: proposed.doc_type.or(base.doc_type),
    }
}

// ---------------------------------------------------------------------------
// Arbiter
// ---------------------------------------------------------------------------

pub struct PlanArbiter {
    completion: Arc<dyn CompletionService>,
    aliases: Arc<CompanyAliases>,
    weights: CompletenessWeights,
    max_tokens: usize,
}

impl PlanArbiter {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        aliases: Arc<CompanyAliases>,
        weights: CompletenessWeights,
        max_tokens: usize,
    ) -> Self {
        Self {
            completion,
            aliases,
            weights,
            max_tokens,
        }
    }

    /// One completion call, parsed. No retry.
    pub async fn request_verdict(&self, query: &str, plan: &RoutingPlan) -> RouterResult<ArbiterResponse> {
        let prompt = build_arbitration_prompt(query, plan);
        let start = std::time::Instant::now();
        let raw = self
            .completion
            .complete(&prompt, self.max_tokens)
            .await
            .map_err(|e| RouterError::Completion(format!("{:#}", e)))?;

        tracing::debug!(
            service = %self.completion.name(),
            latency_ms = start.elapsed().as_millis() as u64,
            response_len = raw.len(),
            "[PlanArbiter] Completion response received"
        );
        parse_arbiter_response(&raw)
    }

    /// Race the completion against `timeout`. On any failure, a panic in the
    /// completion service included, the deterministic decision comes back
    /// untouched and only the trail notes the skipped arbitration.
    pub async fn assemble(&self, query: &str, deterministic: RoutingPlan, timeout: Duration) -> RoutingPlan {
        let request = AssertUnwindSafe(self.request_verdict(query, &deterministic)).catch_unwind();
        let verdict = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(RouterError::Completion(format!(
                "completion service panicked: {}",
                panic_note(&*panic)
            ))),
            Err(_) => Err(RouterError::CompletionTimeout(timeout)),
        };

        match verdict {
            Ok(response) => {
                let plan = merge_plan(deterministic, &response, &self.aliases, &self.weights);
                tracing::info!(
                    route = %plan.route,
                    fallback = ?plan.fallback,
                    provenance = ?plan.provenance,
                    "[PlanArbiter] Arbitrated routing plan"
                );
                plan
            }
            Err(e) => {
                tracing::warn!(error = %e, route = %deterministic.route, "[PlanArbiter] Arbitration skipped, keeping deterministic plan");
                let mut plan = deterministic;
                plan.record(Stage::Arbitrating, format!("skipped: {}", e));
                plan
            }
        }
    }
}

/// Human-readable text of a panic payload.
pub(crate) fn panic_note(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
