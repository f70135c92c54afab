//! Metadata Extraction
//!
//! Pulls structured filters (company ticker, fiscal year, quarter, form or
//! section) out of free text with ordered pattern lists. The first match in
//! priority order wins; absence of a match leaves the field unset.

use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};

use super::company_aliases::CompanyAliases;
use crate::error::{RouterError, RouterResult};
use crate::types::{DocType, ExtractedMetadata, Quarter};

// Dataset window is 2020-2039; widen this if older filings are ever indexed.
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20[2-3]\d)\b").expect("year regex is valid"));

static QUARTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:q([1-4])|quarter\s+([1-4])|(first|second|third|fourth)\s+quarter)\b")
        .expect("quarter regex is valid")
});

static DOC_TYPE_PATTERNS: LazyLock<Vec<(Regex, DocType)>> = LazyLock::new(|| {
    [
        (r"(?i)\b10-?K\b", DocType::TenK),
        (r"(?i)\b10-?Q\b", DocType::TenQ),
        (r"(?i)\b8-?K\b", DocType::EightK),
        (
            r"(?i)\bMD&A\b|\bmanagement'?s\s+discussion\s+and\s+analysis\b|\bitem\s+7\b",
            DocType::Mdna,
        ),
        (r"(?i)\brisk\s+factors?\b|\bitem\s+1a\b", DocType::RiskFactors),
        (r"(?i)\bbusiness\s+(?:section|overview)\b|\bitem\s+1\b", DocType::Business),
    ]
    .into_iter()
    .map(|(p, d)| (Regex::new(p).expect("doc type regex is valid"), d))
    .collect()
});

/// Company patterns derived from an alias table, tried in order.
#[derive(Debug, Clone)]
struct CompanyPatterns {
    /// Multi-word names, case-insensitive ("Wells Fargo", "bank of america")
    names: Option<Regex>,
    /// Canonical tickers of two or more letters, case-sensitive ("GS", "BAC")
    tickers: Option<Regex>,
    /// Single-word names, only accepted when capitalized in the query ("Goldman")
    short_names: Option<Regex>,
}

impl CompanyPatterns {
    fn build(aliases: &CompanyAliases) -> RouterResult<Self> {
        let mut names = Vec::new();
        let mut tickers = Vec::new();
        let mut short_names = Vec::new();

        for (alias, ticker) in aliases.entries() {
            if alias == ticker {
                if ticker.chars().count() >= 2 {
                    tickers.push(alias.to_string());
                }
            } else if alias.contains(' ') {
                names.push(alias.to_string());
            } else if alias.chars().count() >= 3 {
                short_names.push(alias.to_string());
            }
        }

        Ok(Self {
            names: alternation(names, true, "company names")?,
            tickers: alternation(tickers, false, "company tickers")?,
            short_names: alternation(short_names, true, "company short names")?,
        })
    }

    fn iter(&self) -> impl Iterator<Item = (&Regex, bool)> {
        [
            (self.names.as_ref(), false),
            (self.tickers.as_ref(), false),
            (self.short_names.as_ref(), true),
        ]
        .into_iter()
        .filter_map(|(re, capitalized)| re.map(|re| (re, capitalized)))
    }
}

/// One regex matching any of `words`, longest first so the longest alias wins.
fn alternation(mut words: Vec<String>, case_insensitive: bool, context: &str) -> RouterResult<Option<Regex>> {
    if words.is_empty() {
        return Ok(None);
    }
    words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    words.dedup();

    let body = words
        .iter()
        .map(|w| word_pattern(w))
        .collect::<Vec<_>>()
        .join("|");

    RegexBuilder::new(&format!("(?:{})", body))
        .case_insensitive(case_insensitive)
        .build()
        .map(Some)
        .map_err(|source| RouterError::Pattern {
            context: context.to_string(),
            source,
        })
}

fn word_pattern(word: &str) -> String {
    let escaped = word
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let lead = if word.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    let tail = if word.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    format!("{}{}{}", lead, escaped, tail)
}

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    aliases: Arc<CompanyAliases>,
    companies: CompanyPatterns,
}

impl MetadataExtractor {
    pub fn new(aliases: Arc<CompanyAliases>) -> RouterResult<Self> {
        let companies = CompanyPatterns::build(&aliases)?;
        Ok(Self { aliases, companies })
    }

    pub fn aliases(&self) -> &CompanyAliases {
        &self.aliases
    }

    pub fn extract(&self, query: &str) -> ExtractedMetadata {
        ExtractedMetadata {
            company: self.company(query),
            year: self.year(query),
            quarter: self.quarter(query),
            doc_type: self.doc_type(query),
        }
    }

    /// First company mention in pattern priority order, as a canonical ticker.
    pub fn company(&self, query: &str) -> Option<String> {
        for (re, capitalized) in self.companies.iter() {
            let hit = re
                .find_iter(query)
                .find(|m| !capitalized || starts_uppercase(m.as_str()));
            if let Some(m) = hit {
                return self.aliases.normalize(m.as_str());
            }
        }
        None
    }

    /// Every distinct company mentioned, in order of appearance.
    pub fn companies(&self, query: &str) -> Vec<String> {
        let mut hits: Vec<(usize, String)> = Vec::new();
        for (re, capitalized) in self.companies.iter() {
            for m in re.find_iter(query) {
                if capitalized && !starts_uppercase(m.as_str()) {
                    continue;
                }
                // A ticker inside an already-matched name is not a second mention
                if hits.iter().any(|(start, _)| *start == m.start()) {
                    continue;
                }
                if let Some(ticker) = self.aliases.normalize(m.as_str()) {
                    hits.push((m.start(), ticker));
                }
            }
        }
        hits.sort_by_key(|(start, _)| *start);

        let mut out: Vec<String> = Vec::new();
        for (_, ticker) in hits {
            if !out.contains(&ticker) {
                out.push(ticker);
            }
        }
        out
    }

    pub fn year(&self, query: &str) -> Option<u16> {
        YEAR_RE
            .captures(query)
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Every distinct year mentioned, in order of appearance.
    pub fn years(&self, query: &str) -> Vec<u16> {
        let mut out: Vec<u16> = Vec::new();
        for cap in YEAR_RE.captures_iter(query) {
            if let Some(year) = cap.get(1).and_then(|m| m.as_str().parse().ok()) {
                if !out.contains(&year) {
                    out.push(year);
                }
            }
        }
        out
    }

    pub fn quarter(&self, query: &str) -> Option<Quarter> {
        let cap = QUARTER_RE.captures(query)?;
        if let Some(n) = cap.get(1).or_else(|| cap.get(2)) {
            return n.as_str().parse().ok().and_then(Quarter::from_number);
        }
        match cap.get(3)?.as_str().to_lowercase().as_str() {
            "first" => Some(Quarter::Q1),
            "second" => Some(Quarter::Q2),
            "third" => Some(Quarter::Q3),
            "fourth" => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn doc_type(&self, query: &str) -> Option<DocType> {
        DOC_TYPE_PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(query))
            .map(|(_, doc_type)| *doc_type)
    }
}

fn starts_uppercase(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_uppercase())
}
