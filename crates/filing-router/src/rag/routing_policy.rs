//! Routing Policy
//!
//! Static intent-to-route table plus two overrides driven by metadata
//! completeness:
//!
//! - a structured lookup with too little metadata to key on degrades to semantic
//!   search, keeping the structured route as a last resort
//! - a comparison whose entities are mostly unknown cannot fan out per entity,
//!   so it collapses to a single filtered search

use serde::{Deserialize, Serialize};

use crate::error::{RouterError, RouterResult};
use crate::types::{sanitize_fallback, ExtractedMetadata, QueryIntent, Route};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub intent: QueryIntent,
    pub primary: Route,
    pub fallback: Vec<Route>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub rules: Vec<RouteRule>,
    /// Below this completeness a cypher route degrades to rag
    pub sparse_metadata_threshold: f32,
    /// Below this completeness a comparison stays a single hybrid search
    pub comparison_fanout_threshold: f32,
}

fn route_rule(intent: QueryIntent, primary: Route, fallback: [Route; 2], reason: &str) -> RouteRule {
    RouteRule {
        intent,
        primary,
        fallback: fallback.to_vec(),
        reason: reason.to_string(),
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        use QueryIntent::*;
        use Route::*;
        Self {
            rules: vec![
                route_rule(SingleFact, Cypher, [Rag, Hybrid], "single fact lookup suits a structured query"),
                route_rule(TabularData, Hybrid, [Rag, Cypher], "tabular data needs filtered search over tables"),
                route_rule(SectionContent, Hybrid, [Rag, Cypher], "section content needs filtered search within a section"),
                route_rule(Explanation, Hybrid, [Rag, Multi], "explanations need filtered semantic context"),
                route_rule(Comparison, Multi, [Hybrid, Rag], "comparisons fan out per entity"),
                route_rule(OpenEnded, Rag, [Hybrid, Multi], "open-ended question suits broad semantic search"),
                route_rule(MultiStep, Hybrid, [Rag, Multi], "multi-step question anchored on a source"),
            ],
            sparse_metadata_threshold: 0.3,
            comparison_fanout_threshold: 0.5,
        }
    }
}

/// Per-field weights for the metadata completeness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessWeights {
    pub company: f32,
    pub year: f32,
    pub doc_type: f32,
    pub quarter: f32,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            company: 0.4,
            year: 0.3,
            doc_type: 0.2,
            quarter: 0.1,
        }
    }
}

impl CompletenessWeights {
    /// Weighted sum of the populated fields, capped at 1.0.
    pub fn score(&self, metadata: &ExtractedMetadata) -> f32 {
        let mut score = 0.0;
        if metadata.company.is_some() {
            score += self.company;
        }
        if metadata.year.is_some() {
            score += self.year;
        }
        if metadata.doc_type.is_some() {
            score += self.doc_type;
        }
        if metadata.quarter.is_some() {
            score += self.quarter;
        }
        f32::min(score, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub fallback: Vec<Route>,
    pub reason: String,
    /// Set when a completeness override replaced the table entry
    pub overridden: bool,
}

#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    config: PolicyConfig,
}

impl RoutingPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn rule_for(&self, intent: QueryIntent) -> Option<&RouteRule> {
        self.config.rules.iter().find(|r| r.intent == intent)
    }

    pub fn route(&self, intent: QueryIntent, completeness: f32) -> RouterResult<RouteDecision> {
        let rule = self.rule_for(intent).ok_or(RouterError::MissingRule(intent))?;

        if rule.primary == Route::Cypher && completeness < self.config.sparse_metadata_threshold {
            return Ok(RouteDecision {
                route: Route::Rag,
                fallback: vec![Route::Hybrid, Route::Cypher],
                reason: format!(
                    "metadata too sparse for a structured lookup (completeness {:.2})",
                    completeness
                ),
                overridden: true,
            });
        }

        if intent == QueryIntent::Comparison && completeness < self.config.comparison_fanout_threshold {
            return Ok(RouteDecision {
                route: Route::Hybrid,
                fallback: vec![Route::Rag, Route::Multi],
                reason: format!(
                    "comparison lacks entity metadata to fan out (completeness {:.2})",
                    completeness
                ),
                overridden: true,
            });
        }

        Ok(RouteDecision {
            route: rule.primary,
            fallback: sanitize_fallback(rule.primary, rule.fallback.iter().copied()),
            reason: if rule.reason.is_empty() {
                format!("{} routes to {}", intent, rule.primary)
            } else {
                rule.reason.clone()
            },
            overridden: false,
        })
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocType, Quarter};

    fn policy() -> RoutingPolicy {
        RoutingPolicy::default()
    }

    #[test]
    fn test_static_table() {
        let p = policy();
        let cases = [
            (QueryIntent::SingleFact, Route::Cypher, vec![Route::Rag, Route::Hybrid]),
            (QueryIntent::TabularData, Route::Hybrid, vec![Route::Rag, Route::Cypher]),
            (QueryIntent::SectionContent, Route::Hybrid, vec![Route::Rag, Route::Cypher]),
            (QueryIntent::Explanation, Route::Hybrid, vec![Route::Rag, Route::Multi]),
            (QueryIntent::Comparison, Route::Multi, vec![Route::Hybrid, Route::Rag]),
            (QueryIntent::OpenEnded, Route::Rag, vec![Route::Hybrid, Route::Multi]),
            (QueryIntent::MultiStep, Route::Hybrid, vec![Route::Rag, Route::Multi]),
        ];
        for (intent, route, fallback) in cases {
            let d = p.route(intent, 1.0).unwrap();
            assert_eq!(d.route, route, "{}", intent);
            assert_eq!(d.fallback, fallback, "{}", intent);
            assert!(!d.overridden);
        }
    }

    #[test]
    fn test_sparse_metadata_override() {
        let d = policy().route(QueryIntent::SingleFact, 0.2).unwrap();
        assert_eq!(d.route, Route::Rag);
        assert_eq!(d.fallback, vec![Route::Hybrid, Route::Cypher]);
        assert!(d.overridden);

        // exactly at the threshold keeps the table entry
        let d = policy().route(QueryIntent::SingleFact, 0.3).unwrap();
        assert_eq!(d.route, Route::Cypher);
    }

    #[test]
    fn test_comparison_override() {
        let d = policy().route(QueryIntent::Comparison, 0.4).unwrap();
        assert_eq!(d.route, Route::Hybrid);
        assert_eq!(d.fallback, vec![Route::Rag, Route::Multi]);
        assert!(d.overridden);

        let d = policy().route(QueryIntent::Comparison, 0.7).unwrap();
        assert_eq!(d.route, Route::Multi);
    }

    #[test]
    fn test_override_never_applies_to_other_intents() {
        let d = policy().route(QueryIntent::OpenEnded, 0.0).unwrap();
        assert_eq!(d.route, Route::Rag);
        assert!(!d.overridden);
    }

    #[test]
    fn test_missing_rule() {
        let mut config = PolicyConfig::default();
        config.rules.retain(|r| r.intent != QueryIntent::Explanation);
        let p = RoutingPolicy::new(config);
        assert!(matches!(
            p.route(QueryIntent::Explanation, 1.0),
            Err(RouterError::MissingRule(QueryIntent::Explanation))
        ));
    }

    #[test]
    fn test_completeness_weights() {
        let w = CompletenessWeights::default();
        assert_eq!(w.score(&ExtractedMetadata::default()), 0.0);

        let company_only = ExtractedMetadata {
            company: Some("GS".into()),
            ..Default::default()
        };
        assert!((w.score(&company_only) - 0.4).abs() < 1e-6);

        let full = ExtractedMetadata {
            company: Some("BAC".into()),
            year: Some(2025),
            quarter: Some(Quarter::Q1),
            doc_type: Some(DocType::TenK),
        };
        assert!((w.score(&full) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_completeness_is_capped_and_monotone() {
        let w = CompletenessWeights {
            company: 0.9,
            year: 0.9,
            doc_type: 0.0,
            quarter: 0.0,
        };
        let one = ExtractedMetadata {
            company: Some("MS".into()),
            ..Default::default()
        };
        let two = ExtractedMetadata {
            year: Some(2024),
            ..one.clone()
        };
        assert!(w.score(&one) <= w.score(&two));
        assert_eq!(w.score(&two), 1.0);
    }
}
