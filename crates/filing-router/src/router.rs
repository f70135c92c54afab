//! Query Router
//!
//! Composition root for the routing core. Owns the alias table, the compiled
//! pattern tables and the optional completion service, and runs each query
//! through extraction, classification, routing, optional arbitration and
//! decomposition. `plan` never fails: completion-service failures keep the
//! deterministic decision, and any other error or panic becomes the safe
//! default plan.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::config::RouterConfig;
use crate::error::RouterResult;
use crate::llm::CompletionService;
use crate::rag::company_aliases::CompanyAliases;
use crate::rag::intent_classifier::IntentClassifier;
use crate::rag::llm_router::{panic_note, PlanArbiter};
use crate::rag::metadata::MetadataExtractor;
use crate::rag::query_decomposer::QueryDecomposer;
use crate::rag::routing_policy::RoutingPolicy;
use crate::types::{sanitize_fallback, FieldSource, PlanProvenance, Route, RoutingPlan, Stage};

pub struct QueryRouter {
    config: RouterConfig,
    aliases: Arc<CompanyAliases>,
    extractor: Arc<MetadataExtractor>,
    classifier: Arc<IntentClassifier>,
    policy: Arc<RoutingPolicy>,
    decomposer: QueryDecomposer,
    arbiter: Option<PlanArbiter>,
}

impl QueryRouter {
    /// Build a router, loading `config.aliases_path` when set.
    pub fn new(config: RouterConfig, completion: Option<Arc<dyn CompletionService>>) -> RouterResult<Self> {
        let aliases = match &config.aliases_path {
            Some(path) => CompanyAliases::from_file(path)?,
            None => CompanyAliases::default(),
        };
        Self::with_aliases(config, Arc::new(aliases), completion)
    }

    /// Build a router around an explicitly constructed alias table.
    pub fn with_aliases(
        config: RouterConfig,
        aliases: Arc<CompanyAliases>,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> RouterResult<Self> {
        config.validate()?;

        let extractor = Arc::new(MetadataExtractor::new(aliases.clone())?);
        let classifier = Arc::new(IntentClassifier::new(&config.classifier)?);
        let policy = Arc::new(RoutingPolicy::new(config.policy.clone()));
        let decomposer = QueryDecomposer::new(
            extractor.clone(),
            classifier.clone(),
            policy.clone(),
            config.completeness,
        );

        let arbiter = completion
            .filter(|_| config.arbitration.enabled)
            .map(|service| {
                PlanArbiter::new(
                    service,
                    aliases.clone(),
                    config.completeness,
                    config.arbitration.max_tokens,
                )
            });

        tracing::info!(
            companies = aliases.tickers().len(),
            arbitration = arbiter.is_some(),
            "[QueryRouter] Initialized"
        );

        Ok(Self {
            config,
            aliases,
            extractor,
            classifier,
            policy,
            decomposer,
            arbiter,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn aliases(&self) -> &CompanyAliases {
        &self.aliases
    }

    pub fn extractor(&self) -> &MetadataExtractor {
        &self.extractor
    }

    /// Route a query. Always returns a structurally valid plan.
    pub async fn plan(&self, query: &str) -> RoutingPlan {
        match AssertUnwindSafe(self.try_plan(query)).catch_unwind().await {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "[QueryRouter] Routing failed, using safe default plan");
                RoutingPlan::safe_default(e.to_string())
            }
            Err(panic) => {
                let note = panic_note(&*panic);
                tracing::error!(panic = %note, "[QueryRouter] Routing panicked, using safe default plan");
                RoutingPlan::safe_default(format!("internal panic: {}", note))
            }
        }
    }

    /// The plan produced by patterns alone, without the completion service.
    pub fn deterministic_plan(&self, query: &str) -> RoutingPlan {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.build_plan(query).and_then(|plan| self.finalize(query, plan))
        }));
        match result {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "[QueryRouter] Deterministic routing failed, using safe default plan");
                RoutingPlan::safe_default(e.to_string())
            }
            Err(panic) => {
                let note = panic_note(&*panic);
                tracing::error!(panic = %note, "[QueryRouter] Deterministic routing panicked, using safe default plan");
                RoutingPlan::safe_default(format!("internal panic: {}", note))
            }
        }
    }

    async fn try_plan(&self, query: &str) -> RouterResult<RoutingPlan> {
        let plan = self.build_plan(query)?;

        let plan = match &self.arbiter {
            Some(arbiter) => {
                arbiter
                    .assemble(query, plan, self.config.arbitration.timeout())
                    .await
            }
            None => plan,
        };

        self.finalize(query, plan)
    }

    /// Extract, classify and route.
    fn build_plan(&self, query: &str) -> RouterResult<RoutingPlan> {
        let metadata = self.extractor.extract(query);
        let completeness = self.config.completeness.score(&metadata);
        let classification = self.classifier.classify(query);
        let decision = self.policy.route(classification.intent, completeness)?;

        tracing::debug!(
            metadata = ?metadata,
            completeness,
            intent = ?classification.intent,
            confidence = classification.confidence,
            route = %decision.route,
            overridden = decision.overridden,
            "[QueryRouter] Deterministic routing"
        );

        let mut plan = RoutingPlan {
            route: decision.route,
            fallback: decision.fallback,
            metadata,
            sub_tasks: Vec::new(),
            reasoning: decision.reason,
            intent: classification.intent,
            confidence: classification.confidence,
            completeness,
            provenance: PlanProvenance::uniform(FieldSource::Pattern),
            trail: Vec::new(),
            error: None,
        };

        let extracted = serde_json::to_string(&plan.metadata)?;
        plan.record(Stage::Extracting, extracted);
        plan.record(
            Stage::Classifying,
            format!("{} ({:.2})", classification.intent, classification.confidence),
        );
        plan.record(
            Stage::Routing,
            format!(
                "{} -> {}{}",
                classification.intent,
                decision.route,
                if decision.overridden { " (completeness override)" } else { "" }
            ),
        );
        Ok(plan)
    }

    /// Reconcile sub-tasks with the final route and close the trail.
    fn finalize(&self, query: &str, mut plan: RoutingPlan) -> RouterResult<RoutingPlan> {
        if plan.route == Route::Multi {
            if plan.sub_tasks.is_empty() {
                let decomposition = self.decomposer.decompose(query, &plan.metadata)?;
                plan.record(
                    Stage::Decomposing,
                    format!(
                        "{:?} -> {} sub-tasks",
                        decomposition.strategy,
                        decomposition.sub_tasks.len()
                    ),
                );
                plan.sub_tasks = decomposition.sub_tasks;
                plan.provenance.sub_tasks = FieldSource::Pattern;
            }
        } else if !plan.sub_tasks.is_empty() {
            plan.sub_tasks.clear();
            plan.provenance.sub_tasks = FieldSource::Default;
        }

        plan.fallback = sanitize_fallback(plan.route, plan.fallback.iter().copied());
        plan.record(Stage::Done, format!("{} {:?}", plan.route, plan.fallback));

        tracing::info!(
            intent = ?plan.intent,
            route = %plan.route,
            fallback = ?plan.fallback,
            company = ?plan.metadata.company,
            completeness = plan.completeness,
            sub_tasks = plan.sub_tasks.len(),
            "[QueryRouter] Routing decision"
        );
        Ok(plan)
    }
}
