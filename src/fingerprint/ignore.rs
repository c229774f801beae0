//! Exclusion rules for build contexts
//!
//! Two kinds of rules decide whether a path takes part in the fingerprint:
//! the fixed deny-list (matched anywhere in the path, like `tar --exclude`)
//! and `.dockerignore` patterns (anchored at the context root).

use crate::error::{KilnError, KilnResult};
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Vendor paths that are always excluded from the fingerprint
pub const DEFAULT_EXCLUDES: &[&str] = &["vendor/composer", "vendor/autoload.php"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Unanchored path exclusions
#[derive(Debug, Clone)]
pub struct DenyList {
    entries: Vec<Vec<String>>,
}

impl DenyList {
    /// The built-in deny-list plus caller additions
    pub fn with_extra(extra: &[String]) -> Self {
        let entries = DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().cloned())
            .map(|entry| {
                entry
                    .split('/')
                    .filter(|part| !part.is_empty() && *part != ".")
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|parts| !parts.is_empty())
            .collect();
        Self { entries }
    }

    /// True when the entry's components appear anywhere in `rel`
    pub fn matches(&self, rel: &Path) -> bool {
        let parts = path_parts(rel);
        self.entries.iter().any(|entry| {
            parts.len() >= entry.len()
                && parts
                    .windows(entry.len())
                    .any(|window| window.iter().zip(entry).all(|(a, b)| a == b))
        })
    }
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
}

/// Parsed `.dockerignore` rules
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Parse ignore-file content. Invalid patterns are skipped.
    pub fn parse(content: &str) -> Self {
        let mut rules = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (negated, raw) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };

            let cleaned = clean_pattern(raw);
            if cleaned.is_empty() {
                continue;
            }

            match Pattern::new(&cleaned) {
                Ok(pattern) => rules.push(Rule { pattern, negated }),
                Err(e) => warn!("Skipping invalid ignore pattern '{}': {}", raw, e),
            }
        }

        debug!("Parsed {} ignore rules", rules.len());
        Self { rules }
    }

    /// Load rules from an ignore file
    pub fn load(path: &Path) -> KilnResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KilnError::io(format!("reading ignore file {}", path.display()), e))?;
        Ok(Self::parse(&content))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule re-includes paths
    pub fn has_negations(&self) -> bool {
        self.rules.iter().any(|r| r.negated)
    }

    /// Evaluate `rel` (relative to the context root). Last matching rule wins;
    /// a rule matching a parent directory applies to everything below it.
    pub fn is_excluded(&self, rel: &Path) -> bool {
        let parts = path_parts(rel);
        if parts.is_empty() {
            return false;
        }

        let candidates: Vec<String> = (1..=parts.len()).map(|n| parts[..n].join("/")).collect();

        let mut excluded = false;
        for rule in &self.rules {
            if candidates
                .iter()
                .any(|c| rule.pattern.matches_with(c, MATCH_OPTIONS))
            {
                excluded = !rule.negated;
            }
        }
        excluded
    }
}

fn clean_pattern(raw: &str) -> String {
    let parts: Vec<&str> = raw
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    parts.join("/")
}

fn path_parts(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
