//! Company Alias Table
//!
//! Maps surface forms of bank names (full names, abbreviations, tickers, with or
//! without corporate suffixes) to one canonical ticker. Built once and shared
//! read-only behind an `Arc`; never mutated after construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{RouterError, RouterResult};

static SUFFIX_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?:^|[\s,])(?:CORPORATION|CORP\.?|INCORPORATED|INC\.?|L\.?L\.?C\.?|COMPANY|CO\.?|BANCORPORATION|BANCORP|FINANCIAL|BANKING|BANK|GROUP|HOLDINGS|N\.?A\.?)\s*$",
    )
    .expect("suffix regex is valid")
});

static WHITESPACE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\s+").expect("whitespace regex is valid"));

/// One canonical ticker and the names it is known by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasGroup {
    pub ticker: String,
    pub aliases: Vec<String>,
}

/// Seed list, in lookup order.
const SEED_ALIASES: &[(&str, &[&str])] = &[
    // Major banks
    ("WFC", &["WELLS FARGO", "WELLS FARGO & COMPANY", "WELLS FARGO BANK", "WELLS"]),
    (
        "JPM",
        &["JPMORGAN", "JP MORGAN", "JPMORGAN CHASE", "JP MORGAN CHASE", "JPMORGAN CHASE & CO", "CHASE"],
    ),
    ("BAC", &["BANK OF AMERICA", "BANK OF AMERICA CORPORATION", "BOFA", "BOA"]),
    ("GS", &["GOLDMAN SACHS", "GOLDMAN SACHS GROUP", "GOLDMAN SACHS & CO", "GOLDMAN"]),
    ("MS", &["MORGAN STANLEY", "MORGAN STANLEY & CO"]),
    ("C", &["CITIGROUP", "CITIBANK", "CITI"]),
    // Regional banks
    ("ZION", &["ZIONS BANCORPORATION", "ZIONS BANK", "ZIONS"]),
    ("KEY", &["KEYCORP", "KEY BANK", "KEYBANK"]),
    ("TFC", &["TRUIST", "TRUIST FINANCIAL", "TRUIST FINANCIAL CORPORATION"]),
    ("FITB", &["FIFTH THIRD", "FIFTH THIRD BANK", "FIFTH THIRD BANCORP"]),
    ("RF", &["REGIONS", "REGIONS BANK", "REGIONS FINANCIAL", "REGIONS FINANCIAL CORPORATION"]),
    (
        "BK",
        &["BANK OF NEW YORK MELLON", "BNY MELLON", "THE BANK OF NEW YORK MELLON", "MELLON"],
    ),
    ("MTB", &["M&T BANK", "MT BANK", "M&T BANK CORPORATION"]),
    // Community banks
    ("CBSH", &["COMMERCE BANCSHARES", "COMMERCE BANK"]),
    ("BPOP", &["POPULAR", "POPULAR BANK", "POPULAR INC"]),
    ("CFR", &["CULLEN/FROST", "FROST BANK"]),
    ("CFG", &["CITIZENS FINANCIAL", "CITIZENS BANK"]),
    ("CMA", &["COMERICA", "COMERICA BANK"]),
    ("EWBC", &["EAST WEST", "EAST WEST BANK"]),
    ("FCNCA", &["FIRST CITIZENS", "FIRST CITIZENS BANCSHARES"]),
    ("FHN", &["FIRST HORIZON", "FIRST HORIZON BANK"]),
    ("ONB", &["OLD NATIONAL", "OLD NATIONAL BANK"]),
    ("PB", &["PROSPERITY", "PROSPERITY BANK", "PROSPERITY BANCSHARES"]),
    ("PNFP", &["PINNACLE", "PINNACLE FINANCIAL"]),
    ("SNV", &["SYNOVUS", "SYNOVUS BANK"]),
    ("SSB", &["SOUTHSTATE", "SOUTHSTATE BANK"]),
    ("UMBF", &["UMB", "UMB BANK", "UMB FINANCIAL"]),
    ("USB", &["US BANK", "U.S. BANK", "US BANCORP", "U.S. BANCORP"]),
    ("WAL", &["WESTERN ALLIANCE"]),
    ("WBS", &["WEBSTER", "WEBSTER BANK"]),
    ("WTFC", &["WINTRUST", "WINTRUST FINANCIAL"]),
    ("BOKF", &["BOK FINANCIAL"]),
];

/// Stems this short are matched as whole words only.
const SHORT_STEM_CHARS: usize = 3;

/// Checked literally, after every other strategy has failed.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("BofA", "BAC"),
    ("B of A", "BAC"),
    ("WF", "WFC"),
    ("JPMC", "JPM"),
    ("Chase", "JPM"),
    ("GSachs", "GS"),
];

#[derive(Debug, Clone)]
pub struct CompanyAliases {
    /// (ALIAS, TICKER) in lookup order
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
    /// Canonical tickers in seed order
    tickers: Vec<String>,
    abbreviations: Vec<(String, String)>,
}

impl CompanyAliases {
    /// Build a table from alias groups. Every ticker is also an alias of itself.
    pub fn from_groups(groups: Vec<AliasGroup>) -> RouterResult<Self> {
        let mut entries: Vec<(String, String)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut tickers: Vec<String> = Vec::new();

        for group in groups {
            let ticker = collapse(&group.ticker.to_uppercase());
            if ticker.is_empty() {
                return Err(RouterError::Config("alias group with empty ticker".into()));
            }
            if !tickers.contains(&ticker) {
                tickers.push(ticker.clone());
            }

            let names = group
                .aliases
                .iter()
                .map(|a| collapse(&a.to_uppercase()))
                .chain(std::iter::once(ticker.clone()));

            for alias in names {
                if alias.is_empty() {
                    continue;
                }
                match index.get(&alias) {
                    Some(&i) if entries[i].1 != ticker => {
                        return Err(RouterError::Config(format!(
                            "alias '{}' maps to both {} and {}",
                            alias, entries[i].1, ticker
                        )));
                    }
                    Some(_) => {}
                    None => {
                        index.insert(alias.clone(), entries.len());
                        entries.push((alias, ticker.clone()));
                    }
                }
            }
        }

        let abbreviations = ABBREVIATIONS
            .iter()
            .filter(|(_, t)| tickers.iter().any(|known| known == t))
            .map(|(a, t)| (a.to_string(), t.to_string()))
            .collect();

        Ok(Self {
            entries,
            index,
            tickers,
            abbreviations,
        })
    }

    /// Load alias groups from a JSON file shaped `[{"ticker": "...", "aliases": [...]}]`.
    pub fn from_file(path: &Path) -> RouterResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RouterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let groups: Vec<AliasGroup> = serde_json::from_str(&content)?;
        let table = Self::from_groups(groups)?;
        tracing::info!(
            path = %path.display(),
            aliases = table.entries.len(),
            tickers = table.tickers.len(),
            "[CompanyAliases] Loaded company alias table"
        );
        Ok(table)
    }

    pub fn seed_groups() -> Vec<AliasGroup> {
        SEED_ALIASES
            .iter()
            .map(|(ticker, aliases)| AliasGroup {
                ticker: ticker.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            })
            .collect()
    }

    /// Resolve a free-text company name to its canonical ticker.
    ///
    /// Exact lookup on the raw name and again after each stripped suffix,
    /// substring match over the table in lookup order, then the literal
    /// abbreviation list. Returns `None` rather than guessing.
    pub fn normalize(&self, name: &str) -> Option<String> {
        let raw = name.trim();
        if raw.is_empty() {
            return None;
        }

        let upper = collapse(&raw.to_uppercase());
        if let Some(&i) = self.index.get(&upper) {
            return Some(self.entries[i].1.clone());
        }

        // "US BANK N.A." must stop at "US BANK" before "BANK" goes too
        let mut cleaned = upper;
        while let Some(stripped) = strip_one_suffix(&cleaned) {
            cleaned = stripped;
            if let Some(&i) = self.index.get(&cleaned) {
                return Some(self.entries[i].1.clone());
            }
        }

        if cleaned.chars().count() >= 2 {
            if let Some(ticker) = self.fuzzy_match(&cleaned) {
                return Some(ticker);
            }
        }

        self.abbreviations
            .iter()
            .find(|(abbr, _)| abbr == raw)
            .map(|(_, ticker)| ticker.clone())
    }

    fn fuzzy_match(&self, cleaned: &str) -> Option<String> {
        // Aliases inside the input must sit on word boundaries ("C" must not hit "ACME")
        let padded = format!(" {} ", cleaned);
        // Short stems only match whole words of an alias ("US" must not hit "SYNOVUS")
        let whole_word = cleaned.chars().count() <= SHORT_STEM_CHARS;
        self.entries
            .iter()
            .find(|(alias, _)| {
                let inside_alias = if whole_word {
                    format!(" {} ", alias).contains(&padded)
                } else {
                    alias.contains(cleaned)
                };
                inside_alias || padded.contains(&format!(" {} ", alias))
            })
            .map(|(_, ticker)| ticker.clone())
    }

    /// Every known surface form of `ticker`, including the ticker itself.
    pub fn aliases_for(&self, ticker: &str) -> Vec<&str> {
        let ticker = ticker.trim().to_uppercase();
        self.entries
            .iter()
            .filter(|(_, t)| *t == ticker)
            .map(|(alias, _)| alias.as_str())
            .collect()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn is_ticker(&self, candidate: &str) -> bool {
        self.tickers.iter().any(|t| t == candidate)
    }

    /// (ALIAS, TICKER) pairs in lookup order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, t)| (a.as_str(), t.as_str()))
    }

    pub fn abbreviations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.abbreviations.iter().map(|(a, t)| (a.as_str(), t.as_str()))
    }
}

impl Default for CompanyAliases {
    fn default() -> Self {
        // The seed list is static and conflict-free
        Self::from_groups(Self::seed_groups()).expect("seed alias table is consistent")
    }
}

fn collapse(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Remove one trailing corporate suffix, or `None` when there is none left.
fn strip_one_suffix(upper: &str) -> Option<String> {
    let stripped = SUFFIX_RE.replace(upper, "");
    let stripped = collapse(
        stripped.trim_end_matches(|c: char| c == '&' || c == ',' || c.is_whitespace()),
    );
    (stripped != upper).then_some(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CompanyAliases {
        CompanyAliases::default()
    }

    #[test]
    fn test_exact_and_case_insensitive() {
        let t = table();
        assert_eq!(t.normalize("Wells Fargo").as_deref(), Some("WFC"));
        assert_eq!(t.normalize("  wells   fargo ").as_deref(), Some("WFC"));
        assert_eq!(t.normalize("JPM").as_deref(), Some("JPM"));
        assert_eq!(t.normalize("bac").as_deref(), Some("BAC"));
    }

    #[test]
    fn test_suffix_stripping() {
        let t = table();
        assert_eq!(t.normalize("Zions Bancorporation, N.A.").as_deref(), Some("ZION"));
        assert_eq!(t.normalize("Truist Financial Corp.").as_deref(), Some("TFC"));
        assert_eq!(t.normalize("Goldman Sachs Group, Inc.").as_deref(), Some("GS"));
    }

    #[test]
    fn test_fuzzy_substring() {
        let t = table();
        assert_eq!(t.normalize("Bank of America Merrill").as_deref(), Some("BAC"));
        assert_eq!(t.normalize("Morgan Stanley Wealth").as_deref(), Some("MS"));
        assert_eq!(t.normalize("Synov").as_deref(), Some("SNV"));
    }

    #[test]
    fn test_stripping_stops_at_first_exact_alias() {
        let t = table();
        assert_eq!(t.normalize("US Bank N.A.").as_deref(), Some("USB"));
        assert_eq!(t.normalize("Wells Fargo Bank, N.A.").as_deref(), Some("WFC"));
        assert_eq!(t.normalize("Fifth Third Bank, Inc.").as_deref(), Some("FITB"));
    }

    #[test]
    fn test_short_stems_need_whole_words() {
        let t = table();
        assert_eq!(t.normalize("AN"), None);
        assert_eq!(t.normalize("ELL"), None);
        assert_eq!(t.normalize("US").as_deref(), Some("USB"));
        assert_eq!(t.normalize("NEW").as_deref(), Some("BK"));
    }

    #[test]
    fn test_abbreviation_literal() {
        let t = table();
        assert_eq!(t.normalize("B of A").as_deref(), Some("BAC"));
    }

    #[test]
    fn test_no_match_is_none() {
        let t = table();
        assert_eq!(t.normalize(""), None);
        assert_eq!(t.normalize("   "), None);
        assert_eq!(t.normalize("Acme Widgets"), None);
        // Only suffixes: nothing left to match
        assert_eq!(t.normalize("Bank"), None);
    }

    #[test]
    fn test_every_alias_round_trips() {
        let t = table();
        for ticker in t.tickers() {
            let aliases = t.aliases_for(ticker);
            assert!(!aliases.is_empty(), "{} has no aliases", ticker);
            for alias in aliases {
                assert_eq!(
                    t.normalize(alias).as_deref(),
                    Some(ticker.as_str()),
                    "alias {} did not map back to {}",
                    alias,
                    ticker
                );
                assert_eq!(
                    t.normalize(&alias.to_lowercase()).as_deref(),
                    Some(ticker.as_str())
                );
            }
        }
    }

    #[test]
    fn test_normalize_is_idempotent_on_tickers() {
        let t = table();
        for ticker in t.tickers() {
            let once = t.normalize(ticker).unwrap();
            assert_eq!(t.normalize(&once).as_deref(), Some(ticker.as_str()));
        }
    }

    #[test]
    fn test_conflicting_groups_rejected() {
        let groups = vec![
            AliasGroup { ticker: "AAA".into(), aliases: vec!["ACME".into()] },
            AliasGroup { ticker: "BBB".into(), aliases: vec!["acme".into()] },
        ];
        assert!(matches!(
            CompanyAliases::from_groups(groups),
            Err(RouterError::Config(_))
        ));
    }

    #[test]
    fn test_alternate_table() {
        let groups = vec![AliasGroup {
            ticker: "ACME".into(),
            aliases: vec!["Acme Widgets".into()],
        }];
        let t = CompanyAliases::from_groups(groups).unwrap();
        assert_eq!(t.normalize("acme widgets inc").as_deref(), Some("ACME"));
        assert_eq!(t.normalize("Wells Fargo"), None);
        // Abbreviations for tickers outside the table are dropped
        assert_eq!(t.abbreviations().count(), 0);
    }

    #[test]
    fn test_deterministic_lookup_order() {
        let t = table();
        let first: Vec<_> = t.entries().take(3).collect();
        assert_eq!(first[0], ("WELLS FARGO", "WFC"));
        assert_eq!(t.tickers()[0], "WFC");
    }
}
