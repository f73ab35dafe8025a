//! Path weight rules and matching.
//!
//! Rules map a request path to the weight charged against the quota.
//! Matching runs in two passes:
//! 1. any rule whose pattern equals the path exactly
//! 2. rules in declaration order, where a pattern ending in `*` is a prefix
//!    (`/api/*`) and any other pattern is an unanchored regular expression
//!
//! The first match wins, and a path nothing matches costs [`DEFAULT_WEIGHT`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Weight charged when no rule matches.
pub const DEFAULT_WEIGHT: u64 = 1;

/// One configured pattern and its weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathWeightRule {
    pub pattern: String,
    pub weight: u64,
}

#[derive(Debug, Clone)]
enum Matcher {
    /// No regex metacharacters; as a regex it is a substring test.
    Literal(String),
    Prefix(String),
    Pattern(Regex),
    /// A pattern that failed to compile; it matches nothing.
    Never,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: String,
    matcher: Matcher,
    weight: u64,
}

/// Resolves request paths to weights using compiled rules.
#[derive(Debug, Clone, Default)]
pub struct PathWeights {
    rules: Vec<CompiledRule>,
}

impl PathWeights {
    /// Compile `rules`, keeping their order. Malformed regexes never match.
    pub fn new(rules: &[PathWeightRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| CompiledRule {
                pattern: rule.pattern.clone(),
                matcher: Self::compile(&rule.pattern),
                weight: rule.weight,
            })
            .collect();

        Self { rules }
    }

    fn compile(pattern: &str) -> Matcher {
        if let Some(prefix) = pattern.strip_suffix('*') {
            return Matcher::Prefix(prefix.to_string());
        }

        if !pattern.chars().any(is_regex_meta) {
            return Matcher::Literal(pattern.to_string());
        }

        match Regex::new(pattern) {
            Ok(re) => Matcher::Pattern(re),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Ignoring malformed weight pattern");
                Matcher::Never
            }
        }
    }

    /// Whether any rules are configured.
    pub fn is_enabled(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Weight for `path`.
    pub fn resolve(&self, path: &str) -> u64 {
        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.pattern == path)
        {
            return rule.weight;
        }

        let matched = self.rules.iter().find(|rule| match &rule.matcher {
            Matcher::Literal(literal) => path.contains(literal.as_str()),
            Matcher::Never => false,
            Matcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Matcher::Pattern(re) => re.is_match(path),
        });

        match matched {
            Some(rule) => {
                debug!(path = %path, weight = rule.weight, "Matched path weight rule");
                rule.weight
            }
            None => DEFAULT_WEIGHT,
        }
    }
}

/// Characters that make a pattern a regular expression rather than a literal path.
fn is_regex_meta(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
    )
}
