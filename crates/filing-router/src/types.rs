use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Routes and intents
// ============================================================================

/// Retrieval strategy a query is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Structured graph lookup keyed by company/year/quarter/doc_type
    Cypher,
    /// Semantic search narrowed by structured filters
    Hybrid,
    /// Pure vector similarity search
    Rag,
    /// Parallel decomposition into independently routed sub-tasks
    Multi,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Cypher, Route::Hybrid, Route::Rag, Route::Multi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cypher => "cypher",
            Self::Hybrid => "hybrid",
            Self::Rag => "rag",
            Self::Multi => "multi",
        }
    }

    /// Lenient parse used on completion-service output.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cypher" | "structured" | "graph" => Some(Self::Cypher),
            "hybrid" => Some(Self::Hybrid),
            "rag" | "semantic" | "vector" => Some(Self::Rag),
            "multi" | "parallel" => Some(Self::Multi),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    SingleFact,    // "What is BAC's CET1 ratio?"
    TabularData,   // "Show balance sheet table"
    SectionContent, // "From MD&A section, what..."
    Explanation,   // "Explain risk management strategy"
    Comparison,    // "Compare GS and MS"
    OpenEnded,     // "What are banking trends?"
    MultiStep,     // "From balance sheet, show assets"
}

impl QueryIntent {
    pub const ALL: [QueryIntent; 7] = [
        QueryIntent::SingleFact,
        QueryIntent::TabularData,
        QueryIntent::SectionContent,
        QueryIntent::Explanation,
        QueryIntent::Comparison,
        QueryIntent::OpenEnded,
        QueryIntent::MultiStep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleFact => "single_fact",
            Self::TabularData => "tabular_data",
            Self::SectionContent => "section_content",
            Self::Explanation => "explanation",
            Self::Comparison => "comparison",
            Self::OpenEnded => "open_ended",
            Self::MultiStep => "multi_step",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Extracted metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Q1),
            2 => Some(Self::Q2),
            3 => Some(Self::Q3),
            4 => Some(Self::Q4),
            _ => None,
        }
    }

    /// Accepts "Q3", "q3", "3", "Quarter 3".
    pub fn parse(value: &str) -> Option<Self> {
        let digit = value.chars().filter(|c| c.is_ascii_digit()).collect::<String>();
        if digit.len() != 1 {
            return None;
        }
        let upper = value.trim().to_uppercase();
        let shape_ok = upper.len() == 1
            || upper.starts_with('Q')
            || upper.starts_with("QUARTER");
        if !shape_ok {
            return None;
        }
        digit.parse::<u8>().ok().and_then(Self::from_number)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Q1 => "Q1",
            Self::Q2 => "Q2",
            Self::Q3 => "Q3",
            Self::Q4 => "Q4",
        };
        f.write_str(s)
    }
}

/// Filing form or named section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
    #[serde(rename = "8-K")]
    EightK,
    #[serde(rename = "MD&A")]
    Mdna,
    #[serde(rename = "Risk Factors")]
    RiskFactors,
    #[serde(rename = "Business")]
    Business,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenK => "10-K",
            Self::TenQ => "10-Q",
            Self::EightK => "8-K",
            Self::Mdna => "MD&A",
            Self::RiskFactors => "Risk Factors",
            Self::Business => "Business",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '&')
            .collect();
        match normalized.as_str() {
            "10K" => Some(Self::TenK),
            "10Q" => Some(Self::TenQ),
            "8K" => Some(Self::EightK),
            "MD&A" | "MDA" | "MDNA" | "ITEM7" => Some(Self::Mdna),
            "RISKFACTORS" | "RISKFACTOR" | "ITEM1A" => Some(Self::RiskFactors),
            "BUSINESS" | "BUSINESSOVERVIEW" | "ITEM1" => Some(Self::Business),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sparse structured filters pulled out of a query. `None` always means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    /// Canonical ticker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<Quarter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocType>,
}

impl ExtractedMetadata {
    pub fn is_empty(&self) -> bool {
        self.company.is_none()
            && self.year.is_none()
            && self.quarter.is_none()
            && self.doc_type.is_none()
    }

    /// Fill every unset field from `parent`.
    pub fn inherit(mut self, parent: &ExtractedMetadata) -> Self {
        if self.company.is_none() {
            self.company = parent.company.clone();
        }
        self.year = self.year.or(parent.year);
        self.quarter = self.quarter.or(parent.quarter);
        self.doc_type = self.doc_type.or(parent.doc_type);
        self
    }
}

// ============================================================================
// Routing plan
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub topic: String,
    pub metadata: ExtractedMetadata,
    pub suggested_route: Route,
}

/// Which stage produced a plan field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Pattern,
    Completion,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProvenance {
    pub route: FieldSource,
    pub fallback: FieldSource,
    pub metadata: FieldSource,
    pub sub_tasks: FieldSource,
    pub reasoning: FieldSource,
}

impl PlanProvenance {
    pub fn uniform(source: FieldSource) -> Self {
        Self {
            route: source,
            fallback: source,
            metadata: source,
            sub_tasks: source,
            reasoning: source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Classifying,
    Routing,
    Decomposing,
    Arbitrating,
    Done,
}

/// One append-only record of what a stage contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub stage: Stage,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub route: Route,
    /// At most two alternates, never containing `route`
    pub fallback: Vec<Route>,
    pub metadata: ExtractedMetadata,
    /// Only populated when `route == Multi`
    pub sub_tasks: Vec<SubTask>,
    pub reasoning: String,
    pub intent: QueryIntent,
    pub confidence: f32,
    pub completeness: f32,
    pub provenance: PlanProvenance,
    pub trail: Vec<TrailEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const MAX_FALLBACKS: usize = 2;

impl RoutingPlan {
    /// The universal safe plan: semantic search with hybrid as the only alternate.
    pub fn safe_default(note: impl Into<String>) -> Self {
        let note = note.into();
        Self {
            route: Route::Rag,
            fallback: vec![Route::Hybrid],
            metadata: ExtractedMetadata::default(),
            sub_tasks: Vec::new(),
            reasoning: format!("Fallback due to routing error: {}", note),
            intent: QueryIntent::OpenEnded,
            confidence: 0.0,
            completeness: 0.0,
            provenance: PlanProvenance::uniform(FieldSource::Default),
            trail: vec![TrailEntry {
                stage: Stage::Done,
                detail: "safe default plan".to_string(),
            }],
            error: Some(note),
        }
    }

    pub fn record(&mut self, stage: Stage, detail: impl Into<String>) {
        self.trail.push(TrailEntry {
            stage,
            detail: detail.into(),
        });
    }

    /// Equality over every field except the trail.
    pub fn same_decision(&self, other: &RoutingPlan) -> bool {
        self.route == other.route
            && self.fallback == other.fallback
            && self.metadata == other.metadata
            && self.sub_tasks == other.sub_tasks
            && self.reasoning == other.reasoning
            && self.intent == other.intent
            && self.confidence == other.confidence
            && self.completeness == other.completeness
            && self.provenance == other.provenance
            && self.error == other.error
    }

    /// True when the structural invariants hold.
    pub fn is_well_formed(&self) -> bool {
        self.fallback.len() <= MAX_FALLBACKS
            && !self.fallback.contains(&self.route)
            && self
                .fallback
                .iter()
                .enumerate()
                .all(|(i, r)| !self.fallback[..i].contains(r))
            && (self.route == Route::Multi || self.sub_tasks.is_empty())
    }
}

/// Drop duplicates and the primary route, keep at most two entries.
pub fn sanitize_fallback(route: Route, candidates: impl IntoIterator<Item = Route>) -> Vec<Route> {
    let mut out = Vec::with_capacity(MAX_FALLBACKS);
    for candidate in candidates {
        if candidate == route || out.contains(&candidate) {
            continue;
        }
        out.push(candidate);
        if out.len() == MAX_FALLBACKS {
            break;
        }
    }
    out
}
