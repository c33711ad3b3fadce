//! Permission pattern parsing and matching.
//!
//! Pattern grammar:
//! - `tool:<glob>` matches the tool name; a bare `<glob>` with no prefix
//!   is shorthand for `tool:<glob>`
//! - `arg:<key>[:<value-pattern>]` matches a stringified argument value;
//!   `arg:<key>` alone means "key present with any value"
//! - `category:<name>` matches the tool's category name
//! - Comma concatenation requires every clause to match
//!
//! Value patterns are globs unless they look like a regex (leading `^`,
//! trailing `$`, alternation, or escapes), in which case they are matched
//! as an unanchored regex. An invalid regex never matches; it is not an
//! error.

use globset::Glob;
use regex::Regex;
use serde_json::Value;

/// What a pattern clause constrains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseKind {
    Tool,
    Arg,
    Category,
}

/// One comma-separated clause of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternClause {
    pub kind: ClauseKind,
    /// Argument key (empty for tool/category clauses)
    pub key: String,
    /// Value pattern
    pub value: String,
}

/// Parse a pattern into its clauses.
pub fn parse_pattern(pattern: &str) -> Vec<PatternClause> {
    pattern
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if let Some(rest) = part.strip_prefix("tool:") {
                PatternClause {
                    kind: ClauseKind::Tool,
                    key: String::new(),
                    value: rest.to_string(),
                }
            } else if let Some(rest) = part.strip_prefix("arg:") {
                match rest.split_once(':') {
                    Some((key, value)) => PatternClause {
                        kind: ClauseKind::Arg,
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                    None => PatternClause {
                        kind: ClauseKind::Arg,
                        key: rest.to_string(),
                        value: "*".to_string(),
                    },
                }
            } else if let Some(rest) = part.strip_prefix("category:") {
                PatternClause {
                    kind: ClauseKind::Category,
                    key: String::new(),
                    value: rest.to_string(),
                }
            } else {
                // Bare pattern is shorthand for tool:<glob>
                PatternClause {
                    kind: ClauseKind::Tool,
                    key: String::new(),
                    value: part.to_string(),
                }
            }
        })
        .collect()
}

/// Whether a value pattern should be treated as a regex.
fn looks_like_regex(pattern: &str) -> bool {
    pattern.starts_with('^')
        || pattern.ends_with('$')
        || pattern.contains('(')
        || pattern.contains('|')
        || pattern.contains('\\')
}

/// Match a single value against a glob-or-regex pattern.
fn value_matches(pattern: &str, value: &str) -> bool {
    if looks_like_regex(pattern) {
        return match Regex::new(pattern) {
            Ok(regex) => regex.is_match(value),
            Err(_) => false,
        };
    }

    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(_) => pattern == value,
    }
}

/// Stringify an argument value for matching: strings stay raw, scalars
/// use their JSON text, and composites serialize compactly.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Match a full pattern against a tool call. Every clause must hold.
pub fn matches(pattern: &str, tool_name: &str, category: Option<&str>, args: &Value) -> bool {
    let clauses = parse_pattern(pattern);
    if clauses.is_empty() {
        return false;
    }

    clauses.iter().all(|clause| match clause.kind {
        ClauseKind::Tool => value_matches(&clause.value, tool_name),
        ClauseKind::Category => category
            .map(|cat| value_matches(&clause.value, cat))
            .unwrap_or(false),
        ClauseKind::Arg => args
            .get(&clause.key)
            .map(|v| value_matches(&clause.value, &stringify(v)))
            .unwrap_or(false),
    })
}

/// Lexicographic specificity used to order matching rules:
/// exact tool > tool glob > category, with each argument clause adding
/// weight (exact args more than glob args).
pub fn specificity(pattern: &str) -> i32 {
    let mut score = 0;
    for clause in parse_pattern(pattern) {
        match clause.kind {
            ClauseKind::Tool => {
                score += if clause.value.contains('*') || clause.value.contains('?') {
                    10
                } else {
                    20
                };
            }
            ClauseKind::Category => score += 1,
            ClauseKind::Arg => {
                score += if clause.value.contains('*') || clause.value.contains('?') {
                    5
                } else {
                    8
                };
            }
        }
    }
    score
}
