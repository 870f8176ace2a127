//! Search-phrase table: which query string to send for a tool and tier.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use scout_core::{Difficulty, ALL_TOOLS, KNOWN_TOOLS};
use serde::Deserialize;
use thiserror::Error;

const BUILTIN_TERMS: &str = include_str!("../rules/search_terms.yaml");

#[derive(Debug, Error)]
pub enum TermTableError {
    #[error("reading search terms from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing search terms: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolTerms {
    pub generic: String,
    #[serde(default)]
    pub tiers: BTreeMap<Difficulty, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchTermTable {
    tools: BTreeMap<String, ToolTerms>,
}

/// One search term a job will run, tagged with the tool it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTerm {
    pub tool: String,
    pub term: String,
}

impl SearchTermTable {
    pub fn builtin() -> Result<Self, TermTableError> {
        Self::from_yaml(BUILTIN_TERMS)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, TermTableError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, TermTableError> {
        let raw = fs::read_to_string(path).map_err(|source| TermTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Loads `path` when given, the embedded table otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, TermTableError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn tool(&self, tool: &str) -> Option<&ToolTerms> {
        self.tools.get(tool)
    }

    /// Picks the query string for an interactive search.
    ///
    /// A non-blank `query` is always prefixed with the tool name. Otherwise a
    /// recognised tier with table entries yields one of its phrases at
    /// random, and anything else falls back to the tool's generic phrase.
    pub fn build_query(&self, tool: &str, query: Option<&str>, difficulty: Option<&str>) -> String {
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            return format!("{tool} {query}");
        }

        let entry = self.tools.get(tool);
        let tier_phrase = difficulty
            .and_then(Difficulty::from_tier)
            .and_then(|tier| entry?.tiers.get(&tier))
            .and_then(|phrases| phrases.choose(&mut rand::rng()));
        if let Some(phrase) = tier_phrase {
            return phrase.clone();
        }

        entry
            .map(|terms| terms.generic.clone())
            .unwrap_or_else(|| format!("{tool} tutorial"))
    }

    /// Every phrase a scrape job for `tool` should search, in tier order.
    /// `all` expands to each known tool; duplicates within a tool are dropped.
    pub fn terms_for_job(&self, tool: &str) -> Vec<JobTerm> {
        let tools: Vec<&str> = if tool == ALL_TOOLS {
            KNOWN_TOOLS.to_vec()
        } else {
            vec![tool]
        };

        let mut out = Vec::new();
        for tool in tools {
            let Some(entry) = self.tools.get(tool) else {
                out.push(JobTerm {
                    tool: tool.to_string(),
                    term: format!("{tool} tutorial"),
                });
                continue;
            };

            let mut seen: Vec<&str> = Vec::new();
            for tier in Difficulty::ALL {
                for phrase in entry.tiers.get(&tier).into_iter().flatten() {
                    if seen.contains(&phrase.as_str()) {
                        continue;
                    }
                    seen.push(phrase.as_str());
                    out.push(JobTerm {
                        tool: tool.to_string(),
                        term: phrase.clone(),
                    });
                }
            }
            if seen.is_empty() {
                out.push(JobTerm {
                    tool: tool.to_string(),
                    term: entry.generic.clone(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SearchTermTable {
        SearchTermTable::builtin().unwrap()
    }

    #[test]
    fn builtin_table_covers_known_tools() {
        let table = table();
        for tool in KNOWN_TOOLS {
            let entry = table.tool(tool).unwrap();
            assert_eq!(entry.tiers.len(), 3, "{tool}");
        }
    }

    #[test]
    fn explicit_query_is_prefixed_with_tool() {
        assert_eq!(
            table().build_query("zapier", Some("gmail to slack"), Some("advanced")),
            "zapier gmail to slack"
        );
    }

    #[test]
    fn tier_picks_a_phrase_from_that_tier() {
        let table = table();
        let phrases = &table.tool("n8n").unwrap().tiers[&Difficulty::Intermediate];
        for _ in 0..20 {
            let q = table.build_query("n8n", None, Some("Intermediate"));
            assert!(phrases.contains(&q), "{q}");
        }
    }

    #[test]
    fn all_tier_and_unknown_tool_fall_back_to_generic() {
        let table = table();
        assert_eq!(table.build_query("make", None, Some("all")), "make.com tutorial");
        assert_eq!(table.build_query("make", Some("   "), None), "make.com tutorial");
        assert_eq!(table.build_query("ifttt", None, Some("beginner")), "ifttt tutorial");
    }

    #[test]
    fn job_terms_expand_all_and_skip_duplicates() {
        let table = table();
        let all = table.terms_for_job("all");
        let tools: Vec<&str> = all.iter().map(|t| t.tool.as_str()).collect();
        for tool in KNOWN_TOOLS {
            assert!(tools.contains(&tool));
        }

        let n8n = table.terms_for_job("n8n");
        assert_eq!(n8n.len(), 11);
        assert_eq!(n8n[0].term, "n8n tutorial beginner");

        let unknown = table.terms_for_job("ifttt");
        assert_eq!(
            unknown,
            vec![JobTerm {
                tool: "ifttt".into(),
                term: "ifttt tutorial".into()
            }]
        );
    }

    #[test]
    fn table_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.yaml");
        fs::write(
            &path,
            "tools:\n  airtable:\n    generic: airtable automations\n",
        )
        .unwrap();
        let table = SearchTermTable::load(Some(&path)).unwrap();
        assert_eq!(table.build_query("airtable", None, Some("beginner")), "airtable automations");
        assert!(matches!(
            SearchTermTable::from_path(&dir.path().join("missing.yaml")),
            Err(TermTableError::Io { .. })
        ));
    }
}
