//! Query Decomposition Module
//!
//! Splits a query routed to `multi` into independently routable sub-tasks.
//! Entity structure is tried first (several companies, several fiscal years),
//! then the shape of the text (enumerated items, multiple questions,
//! "between X and Y" comparisons, conjunctions). Every fragment inherits the
//! parent's metadata for fields it does not mention itself, is classified and
//! routed on its own, and never fans out again.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::intent_classifier::IntentClassifier;
use super::metadata::MetadataExtractor;
use super::routing_policy::{CompletenessWeights, RoutingPolicy};
use crate::error::RouterResult;
use crate::types::{ExtractedMetadata, Route, SubTask};

/// Upper bound on sub-tasks handed to the dispatcher for one query.
pub const MAX_SUB_TASKS: usize = 8;

static CONJUNCTION_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:and also|and then|and|also|additionally|plus|as well as)\b")
        .expect("conjunction regex is valid")
});

static QUESTION_MARK_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?\s+").expect("question mark split regex is valid"));

static ENUMERATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]\s*|[-•]\s+)(.+)$").expect("enumerated regex is valid")
});

static COMPARATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:compare|comparing|difference between|versus|vs\.?|differ from)\b")
        .expect("comparative regex is valid")
});

static BETWEEN_ENTITIES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbetween\s+(.+?)\s+and\s+(.+?)\s*(?:[?.,;]|$)")
        .expect("between entities regex is valid")
});

/// Phrases where "and" joins a single concept rather than two questions.
const NON_SPLIT_PHRASES: &[&str] = &[
    "pros and cons",
    "assets and liabilities",
    "gains and losses",
    "profit and loss",
    "mergers and acquisitions",
    "controls and procedures",
    "discussion and analysis",
    "risks and uncertainties",
    "property and equipment",
    "loans and leases",
    "strengths and weaknesses",
    "research and development",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionStrategy {
    /// Nothing to split; the whole query is one sub-task
    Single,
    /// One sub-task per company mentioned
    PerCompany,
    /// One sub-task per fiscal year mentioned
    PerPeriod,
    /// Enumerated items ("1. X\n2. Y")
    Enumerated,
    /// Split on multiple question marks
    MultiQuestion,
    /// "difference between X and Y"
    Comparative,
    /// Split on conjunctions ("X and Y")
    Conjunction,
}

/// A piece of the original query plus any metadata pinned by the split itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub topic: String,
    pub text: String,
    pub pinned: ExtractedMetadata,
}

impl Fragment {
    fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            topic: text.clone(),
            text,
            pinned: ExtractedMetadata::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecomposedQuery {
    pub original: String,
    pub fragments: Vec<Fragment>,
    pub strategy: DecompositionStrategy,
}

/// Split a query into fragments without routing them.
pub fn split_query(query: &str, extractor: &MetadataExtractor) -> DecomposedQuery {
    let query = query.trim();
    let long_enough = query.split_whitespace().count() >= 5;

    if long_enough {
        let enumerated = extract_enumerated(query);
        if enumerated.len() >= 2 {
            return decomposed(query, enumerated, DecompositionStrategy::Enumerated);
        }

        let questions = split_on_question_marks(query);
        if questions.len() >= 2 {
            return decomposed(query, questions, DecompositionStrategy::MultiQuestion);
        }
    }

    let companies = extractor.companies(query);
    if companies.len() >= 2 {
        let fragments = companies
            .into_iter()
            .map(|ticker| Fragment {
                topic: format!("{}: {}", ticker, query),
                text: query.to_string(),
                pinned: ExtractedMetadata {
                    company: Some(ticker),
                    ..Default::default()
                },
            })
            .collect();
        return DecomposedQuery {
            original: query.to_string(),
            fragments,
            strategy: DecompositionStrategy::PerCompany,
        };
    }

    let years = extractor.years(query);
    if years.len() >= 2 {
        let fragments = years
            .into_iter()
            .map(|year| Fragment {
                topic: format!("{}: {}", year, query),
                text: query.to_string(),
                pinned: ExtractedMetadata {
                    year: Some(year),
                    ..Default::default()
                },
            })
            .collect();
        return DecomposedQuery {
            original: query.to_string(),
            fragments,
            strategy: DecompositionStrategy::PerPeriod,
        };
    }

    if long_enough {
        if let Some(entities) = try_comparative_split(query) {
            return decomposed(query, entities, DecompositionStrategy::Comparative);
        }
        if let Some(parts) = try_conjunction_split(query) {
            return decomposed(query, parts, DecompositionStrategy::Conjunction);
        }
    }

    decomposed(query, vec![query.to_string()], DecompositionStrategy::Single)
}

fn decomposed(query: &str, parts: Vec<String>, strategy: DecompositionStrategy) -> DecomposedQuery {
    DecomposedQuery {
        original: query.to_string(),
        fragments: parts.into_iter().map(Fragment::text).collect(),
        strategy,
    }
}

fn extract_enumerated(query: &str) -> Vec<String> {
    ENUMERATED_RE
        .captures_iter(query)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.split_whitespace().count() >= 2)
        .collect()
}

fn split_on_question_marks(query: &str) -> Vec<String> {
    QUESTION_MARK_SPLIT_RE
        .split(query)
        .map(|s| {
            let s = s.trim();
            if s.is_empty() || s.ends_with('?') {
                s.to_string()
            } else {
                format!("{}?", s)
            }
        })
        .filter(|s| s.split_whitespace().count() >= 2)
        .collect()
}

fn try_comparative_split(query: &str) -> Option<Vec<String>> {
    if !COMPARATIVE_RE.is_match(query) {
        return None;
    }
    let cap = BETWEEN_ENTITIES_RE.captures(query)?;
    let entity_a = cap.get(1)?.as_str().trim();
    let entity_b = cap.get(2)?.as_str().trim();

    let short = |e: &str| (1..=5).contains(&e.split_whitespace().count());
    if short(entity_a) && short(entity_b) {
        Some(vec![format!("what is {}", entity_a), format!("what is {}", entity_b)])
    } else {
        None
    }
}

fn try_conjunction_split(query: &str) -> Option<Vec<String>> {
    let lower = query.to_lowercase();
    if NON_SPLIT_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }

    // Each part must have enough substance to be a standalone query
    let parts: Vec<String> = CONJUNCTION_SPLIT_RE
        .split(query)
        .map(|p| p.trim().trim_end_matches(',').trim().to_string())
        .filter(|p| p.split_whitespace().count() >= 3)
        .collect();

    (parts.len() >= 2).then_some(parts)
}

#[derive(Debug, Clone)]
pub struct Decomposition {
    pub strategy: DecompositionStrategy,
    pub sub_tasks: Vec<SubTask>,
}

/// Classifies and routes each fragment of a split query.
#[derive(Debug, Clone)]
pub struct QueryDecomposer {
    extractor: Arc<MetadataExtractor>,
    classifier: Arc<IntentClassifier>,
    policy: Arc<RoutingPolicy>,
    weights: CompletenessWeights,
}

impl QueryDecomposer {
    pub fn new(
        extractor: Arc<MetadataExtractor>,
        classifier: Arc<IntentClassifier>,
        policy: Arc<RoutingPolicy>,
        weights: CompletenessWeights,
    ) -> Self {
        Self {
            extractor,
            classifier,
            policy,
            weights,
        }
    }

    pub fn decompose(&self, query: &str, parent: &ExtractedMetadata) -> RouterResult<Decomposition> {
        let split = split_query(query, &self.extractor);
        let mut sub_tasks = Vec::with_capacity(split.fragments.len().min(MAX_SUB_TASKS));

        for fragment in split.fragments.into_iter().take(MAX_SUB_TASKS) {
            let metadata = fragment
                .pinned
                .inherit(&self.extractor.extract(&fragment.text))
                .inherit(parent);
            let intent = self.classifier.classify(&fragment.text).intent;
            let decision = self.policy.route(intent, self.weights.score(&metadata))?;

            // A sub-task is dispatched as-is; it never fans out again
            let suggested_route = if decision.route == Route::Multi {
                decision
                    .fallback
                    .iter()
                    .copied()
                    .find(|r| *r != Route::Multi)
                    .unwrap_or(Route::Hybrid)
            } else {
                decision.route
            };

            sub_tasks.push(SubTask {
                topic: fragment.topic,
                metadata,
                suggested_route,
            });
        }

        tracing::debug!(
            strategy = ?split.strategy,
            sub_tasks = sub_tasks.len(),
            "[QueryDecomposer] Decomposed query"
        );

        Ok(Decomposition {
            strategy: split.strategy,
            sub_tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::company_aliases::CompanyAliases;
    use crate::rag::intent_classifier::ClassifierConfig;

    fn extractor() -> Arc<MetadataExtractor> {
        Arc::new(MetadataExtractor::new(Arc::new(CompanyAliases::default())).unwrap())
    }

    fn decomposer() -> QueryDecomposer {
        QueryDecomposer::new(
            extractor(),
            Arc::new(IntentClassifier::new(&ClassifierConfig::default()).unwrap()),
            Arc::new(RoutingPolicy::default()),
            CompletenessWeights::default(),
        )
    }

    fn decompose(query: &str) -> Decomposition {
        let d = decomposer();
        let parent = d.extractor.extract(query);
        d.decompose(query, &parent).unwrap()
    }

    #[test]
    fn test_per_company_split() {
        let result = decompose("Compare GS and MS revenue trends");
        assert_eq!(result.strategy, DecompositionStrategy::PerCompany);
        let companies: Vec<_> = result
            .sub_tasks
            .iter()
            .map(|t| t.metadata.company.as_deref().unwrap())
            .collect();
        assert_eq!(companies, vec!["GS", "MS"]);
        assert!(result.sub_tasks[0].topic.starts_with("GS: "));
    }

    #[test]
    fn test_per_company_inherits_year() {
        let result = decompose("Compare JPM, BAC and WFC net interest income in 2024");
        assert_eq!(result.strategy, DecompositionStrategy::PerCompany);
        assert_eq!(result.sub_tasks.len(), 3);
        for task in &result.sub_tasks {
            assert_eq!(task.metadata.year, Some(2024));
            assert_ne!(task.suggested_route, Route::Multi);
        }
    }

    #[test]
    fn test_per_period_split() {
        let result = decompose("How did JPM net income change between 2023 and 2024?");
        assert_eq!(result.strategy, DecompositionStrategy::PerPeriod);
        let years: Vec<_> = result.sub_tasks.iter().map(|t| t.metadata.year).collect();
        assert_eq!(years, vec![Some(2023), Some(2024)]);
        assert!(result
            .sub_tasks
            .iter()
            .all(|t| t.metadata.company.as_deref() == Some("JPM")));
    }

    #[test]
    fn test_enumerated_fragments_are_routed_independently() {
        let result = decompose("1. What was GS revenue in 2024\n2. What was MS net income in 2024");
        assert_eq!(result.strategy, DecompositionStrategy::Enumerated);
        assert_eq!(result.sub_tasks.len(), 2);
        assert_eq!(result.sub_tasks[0].metadata.company.as_deref(), Some("GS"));
        assert_eq!(result.sub_tasks[1].metadata.company.as_deref(), Some("MS"));
        assert_eq!(result.sub_tasks[1].suggested_route, Route::Cypher);
    }

    #[test]
    fn test_multi_question_inherits_parent_year() {
        let result = decompose("What was BAC's CET1 ratio in 2024? How did WFC deposits trend?");
        assert_eq!(result.strategy, DecompositionStrategy::MultiQuestion);
        assert_eq!(result.sub_tasks.len(), 2);
        let second = &result.sub_tasks[1];
        assert_eq!(second.metadata.company.as_deref(), Some("WFC"));
        assert_eq!(second.metadata.year, Some(2024));
    }

    #[test]
    fn test_comparative_between_split() {
        let split = split_query(
            "What is the difference between deposit growth and loan growth?",
            &extractor(),
        );
        assert_eq!(split.strategy, DecompositionStrategy::Comparative);
        let topics: Vec<_> = split.fragments.iter().map(|f| f.topic.as_str()).collect();
        assert_eq!(topics, vec!["what is deposit growth", "what is loan growth"]);
    }

    #[test]
    fn test_conjunction_split() {
        let split = split_query(
            "what was the efficiency ratio and what drove the expense growth",
            &extractor(),
        );
        assert_eq!(split.strategy, DecompositionStrategy::Conjunction);
        assert_eq!(split.fragments.len(), 2);
    }

    #[test]
    fn test_fixed_phrases_not_split() {
        let split = split_query("what were the gains and losses on securities this year", &extractor());
        assert_eq!(split.strategy, DecompositionStrategy::Single);
    }

    #[test]
    fn test_short_query_is_single() {
        let result = decompose("GS revenue");
        assert_eq!(result.strategy, DecompositionStrategy::Single);
        assert_eq!(result.sub_tasks.len(), 1);
        assert_eq!(result.sub_tasks[0].topic, "GS revenue");
    }

    #[test]
    fn test_sub_task_cap() {
        let query = (1..=20)
            .map(|i| format!("{}. what was the number {}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let result = decompose(&query);
        assert_eq!(result.strategy, DecompositionStrategy::Enumerated);
        assert_eq!(result.sub_tasks.len(), MAX_SUB_TASKS);
    }
}
