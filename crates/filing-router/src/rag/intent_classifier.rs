//! Query Intent Classification
//!
//! Data-driven pattern tables: each intent owns a list of lexical cues and a
//! threshold. The score of an intent is the fraction of its patterns present in
//! the lowercased query. Rules are checked in table order and the first one
//! whose score clears its threshold wins, so the order encodes priority among
//! overlapping signals. No rule firing yields `OpenEnded` at a fixed low
//! confidence.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{compile_pattern, RouterResult};
use crate::types::QueryIntent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: QueryIntent,
    /// Score must be strictly greater than this to fire
    pub threshold: f32,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Checked top to bottom
    pub rules: Vec<IntentRule>,
    pub default_confidence: f32,
}

const MULTI_STEP_PATTERNS: &[&str] = &[
    // leading source clause: "From the balance sheet, ..."
    r"^\s*(?:from|in|within|according\s+to|based\s+on|using)\b[^,]*,",
    // directive after the clause: "..., show total assets"
    r",\s*(?:then\s+)?(?:show|find|get|extract|list|pull|give|what|how|which)\b",
];

const TABULAR_PATTERNS: &[&str] = &[
    r"\b(?:balance\s+sheets?|income\s+statements?|cash\s+flows?(?:\s+statements?)?|consolidated\s+statements?|statements?\s+of\s+(?:income|operations|condition|cash\s+flows))\b",
    r"\b(?:tables?|tabular|charts?|schedules?|exhibits?|numbers|figures|line\s+items?)\b",
    r"\b(?:financial\s+highlights|key\s+metrics|summary\s+data|selected\s+financial\s+data)\b|\bshow\s+(?:me\s+)?(?:the\s+)?(?:numbers|figures|data|metrics)\b",
];

const SECTION_PATTERNS: &[&str] = &[
    r"(?:\bmd&a|\bmanagement'?s\s+discussion|\brisk\s+factors?|\bbusiness\s+(?:section|overview)|\blegal\s+proceedings|\bcontrols\s+and\s+procedures|\bmarket\s+risk)\b",
    r"\b(?:item\s+\d+[a-z]?|sections?|part\s+(?:i|ii|iii|iv))\b",
    r"\b(?:from|in|within|under)\s+(?:the\s+)?(?:[\w&']+\s+){0,4}?(?:section|item\s+\d+[a-z]?|md&a|risk\s+factors?)\b",
];

const COMPARISON_PATTERNS: &[&str] = &[
    r"\b(?:compare[ds]?|comparing|comparison|contrast|versus|vs\.?|against|differences?|similarities|relative\s+to)\b",
    // two entities joined: "GS and MS", "JPM vs BAC"
    r"\b\w+\s+(?:and|&|vs\.?|versus)\s+\w+\b",
    r"\bbetween\s+\w+\s+and\s+\w+\b",
];

const EXPLANATION_PATTERNS: &[&str] = &[
    r"\b(?:explain|describe|discuss|analy[sz]e|elaborate|detail|summari[sz]e)\b",
    r"\b(?:how\s+(?:does|did|has|have|is|are)|why\s+(?:does|did|has|have|is|are|was|were)|what\s+(?:drove|caused|drives))\b",
    r"\b(?:strateg(?:y|ies)|approach|methodology|framework|outlook|polic(?:y|ies))\b",
    r"\b(?:factors?|reasons?|causes?|impacts?|drivers?)\b",
];

const SINGLE_FACT_PATTERNS: &[&str] = &[
    r"\bwhat\s+(?:is|was|were)\b",
    r"\b(?:cet1|tier\s+1|leverage|roe|roa|roi|efficiency|capital|liquidity\s+coverage)\s+ratio\b|\btotal\s+(?:assets|revenue|income|deposits|loans|equity)\b|\bnet\s+(?:income|revenue|interest\s+income|interest\s+margin)\b|\b(?:eps|earnings\s+per\s+share)\b",
    r"\b(?:ratio|rate|amount|value|number|figure|total)\b",
];

fn rule(intent: QueryIntent, threshold: f32, patterns: &[&str]) -> IntentRule {
    IntentRule {
        intent,
        threshold,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                rule(QueryIntent::MultiStep, 0.7, MULTI_STEP_PATTERNS),
                rule(QueryIntent::TabularData, 0.5, TABULAR_PATTERNS),
                rule(QueryIntent::SectionContent, 0.5, SECTION_PATTERNS),
                rule(QueryIntent::Comparison, 0.5, COMPARISON_PATTERNS),
                rule(QueryIntent::Explanation, 0.4, EXPLANATION_PATTERNS),
                rule(QueryIntent::SingleFact, 0.6, SINGLE_FACT_PATTERNS),
            ],
            default_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub intent: QueryIntent,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: QueryIntent,
    pub confidence: f32,
    /// Scores of the rules evaluated before (and including) the winner
    pub scores: Vec<IntentScore>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    intent: QueryIntent,
    threshold: f32,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn score(&self, text: &str) -> f32 {
        if self.patterns.is_empty() {
            return 0.0;
        }
        let matches = self.patterns.iter().filter(|re| re.is_match(text)).count();
        matches as f32 / self.patterns.len() as f32
    }
}

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<CompiledRule>,
    default_confidence: f32,
}

impl IntentClassifier {
    pub fn new(config: &ClassifierConfig) -> RouterResult<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let patterns = rule
                .patterns
                .iter()
                .enumerate()
                .map(|(i, p)| compile_pattern(p, &format!("{} pattern #{}", rule.intent, i)))
                .collect::<RouterResult<Vec<_>>>()?;
            rules.push(CompiledRule {
                intent: rule.intent,
                threshold: rule.threshold,
                patterns,
            });
        }
        Ok(Self {
            rules,
            default_confidence: config.default_confidence,
        })
    }

    pub fn classify(&self, query: &str) -> Classification {
        let text = query.to_lowercase();
        let mut scores = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let score = rule.score(&text);
            scores.push(IntentScore {
                intent: rule.intent,
                score,
            });
            if score > rule.threshold {
                return Classification {
                    intent: rule.intent,
                    confidence: score,
                    scores,
                };
            }
        }

        Classification {
            intent: QueryIntent::OpenEnded,
            confidence: self.default_confidence,
            scores,
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        // Built-in tables are compile-checked by the tests below
        Self::new(&ClassifierConfig::default()).expect("default classifier patterns are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> Classification {
        IntentClassifier::default().classify(query)
    }

    #[test]
    fn test_single_fact() {
        let c = classify("What is Wells Fargo's CET1 ratio in 2024?");
        assert_eq!(c.intent, QueryIntent::SingleFact);
        assert!(c.confidence > 0.6);
        let c = classify("What was JPM total assets in 2024?");
        assert_eq!(c.intent, QueryIntent::SingleFact);
    }

    #[test]
    fn test_comparison() {
        let c = classify("Compare GS and MS revenue trends");
        assert_eq!(c.intent, QueryIntent::Comparison);
        assert!(c.confidence > 0.5);
        assert_eq!(classify("JPM vs BAC deposits").intent, QueryIntent::Comparison);
    }

    #[test]
    fn test_tabular_beats_multi_step() {
        let c = classify("From BAC 2025 10-K filing, balance sheet table");
        assert_eq!(c.intent, QueryIntent::TabularData);
        // multi-step was evaluated first and scored one of two cues
        assert_eq!(c.scores[0].intent, QueryIntent::MultiStep);
        assert!((c.scores[0].score - 0.5).abs() < f32::EPSILON);

        let c = classify("Show me JPM's income statement numbers from 2024");
        assert_eq!(c.intent, QueryIntent::TabularData);
    }

    #[test]
    fn test_multi_step() {
        let c = classify("From MS 2025 MD&A section, what are key highlights?");
        assert_eq!(c.intent, QueryIntent::MultiStep);
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(
            classify("From the balance sheet, show total assets").intent,
            QueryIntent::MultiStep
        );
    }

    #[test]
    fn test_section_content() {
        assert_eq!(
            classify("What does the risk factors section say about liquidity?").intent,
            QueryIntent::SectionContent
        );
        assert_eq!(
            classify("Summaries in the MD&A about deposits").intent,
            QueryIntent::SectionContent
        );
    }

    #[test]
    fn test_explanation() {
        let c = classify("Explain BAC's risk management strategy");
        assert_eq!(c.intent, QueryIntent::Explanation);
        assert!((c.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_open_ended_default() {
        let c = classify("What are the main banking industry trends?");
        assert_eq!(c.intent, QueryIntent::OpenEnded);
        assert!((c.confidence - 0.3).abs() < f32::EPSILON);

        let c = classify("");
        assert_eq!(c.intent, QueryIntent::OpenEnded);
        assert_eq!(c.scores.len(), 6);
        assert!(c.scores.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn test_confidence_in_unit_range() {
        for q in [
            "compare compare compare versus vs against",
            "🚀",
            "MATCH (c:Company) RETURN c",
            "table table table table",
        ] {
            let c = classify(q);
            assert!((0.0..=1.0).contains(&c.confidence), "{}", q);
        }
    }

    #[test]
    fn test_pathological_length() {
        let long = "balance ".repeat(50_000);
        let c = classify(&long);
        assert!((0.0..=1.0).contains(&c.confidence));
    }

    #[test]
    fn test_reweighted_table() {
        let mut config = ClassifierConfig::default();
        // Put comparison ahead of everything and lower its bar
        let pos = config
            .rules
            .iter()
            .position(|r| r.intent == QueryIntent::Comparison)
            .unwrap();
        let mut comparison = config.rules.remove(pos);
        comparison.threshold = 0.2;
        config.rules.insert(0, comparison);
        let classifier = IntentClassifier::new(&config).unwrap();
        assert_eq!(
            classifier.classify("balance sheet table versus last year").intent,
            QueryIntent::Comparison
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let config = ClassifierConfig {
            rules: vec![IntentRule {
                intent: QueryIntent::SingleFact,
                threshold: 0.5,
                patterns: vec!["(unclosed".to_string()],
            }],
            default_confidence: 0.3,
        };
        assert!(matches!(
            IntentClassifier::new(&config),
            Err(crate::error::RouterError::Pattern { .. })
        ));
    }
}
