//! Shared label-matcher type and the per-backend query grammars that rewrite
//! selectors with it.
//!
//! [`logql`] and [`promql`] each own a distinct AST and parser; the two
//! grammars differ enough (pipeline-of-stages vs. nested call/binary-op
//! trees) that a shared visitor would cost more than it saves. What they do
//! share is [`LabelMatcher`]/[`MatchOp`] and the injection algorithm's
//! override-vs-append semantics, which each module's `inject` function
//! implements against its own selector type.

pub mod logql;
pub mod promql;

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};

/// Comparison operator carried by a [`LabelMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `=~`
    EqRe,
    /// `!~`
    NeqRe,
}

impl MatchOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::EqRe => "=~",
            Self::NeqRe => "!~",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Neq),
            "=~" => Some(Self::EqRe),
            "!~" => Some(Self::NeqRe),
            _ => None,
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(name, operator, value)` label matcher.
///
/// Regex matchers (`=~`, `!~`) carry a pre-compiled pattern, built once when
/// the matcher is parsed out of configuration and never rebuilt. Two
/// matchers are equal iff their full triple (name, operator, raw value) is
/// equal; the compiled regex is derived, not part of identity.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
    compiled: Option<Arc<Regex>>,
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}
impl Eq for LabelMatcher {}

impl LabelMatcher {
    /// Build a matcher, compiling its regex eagerly if the operator requires one.
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let compiled = match op {
            MatchOp::EqRe | MatchOp::NeqRe => {
                let anchored = format!("^(?:{value})$");
                Some(Arc::new(Regex::new(&anchored).map_err(|e| {
                    Error::ConfigInvalid(format!("invalid regex in matcher {name}{op}\"{value}\": {e}"))
                })?))
            }
            MatchOp::Eq | MatchOp::Neq => None,
        };
        Ok(Self { name, op, value, compiled })
    }

    /// The compiled pattern, if this is a regex matcher.
    #[must_use]
    pub fn regex(&self) -> Option<&Regex> {
        self.compiled.as_deref()
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Parse a single `name<op>"value"` fragment (no surrounding braces) into a matcher.
///
/// This is the common grammar piece both `logql` and `promql` selectors
/// share (`{env="prod", cluster=~"us-.*"}`), so it lives here rather than
/// being duplicated in both parsers.
pub fn parse_matcher_fragment(fragment: &str) -> Result<LabelMatcher> {
    let fragment = fragment.trim();
    // Operators must be checked longest-first so `=~` isn't mistaken for `=`.
    const OPS: [&str; 4] = ["!~", "=~", "!=", "="];
    let mut found: Option<(usize, &str)> = None;
    for op in OPS {
        if let Some(idx) = fragment.find(op) {
            match found {
                Some((prev_idx, _)) if prev_idx <= idx => {}
                _ => found = Some((idx, op)),
            }
        }
    }
    let (idx, op_str) = found
        .ok_or_else(|| Error::QueryUnparseable(format!("no operator in matcher fragment: {fragment}")))?;

    let name = fragment[..idx].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(Error::QueryUnparseable(format!("invalid label name: {name}")));
    }
    let raw_value = fragment[idx + op_str.len()..].trim();
    let value = unquote(raw_value)
        .ok_or_else(|| Error::QueryUnparseable(format!("unquoted matcher value: {raw_value}")))?;

    let op = MatchOp::from_str(op_str)
        .ok_or_else(|| Error::QueryUnparseable(format!("unknown matcher operator: {op_str}")))?;

    LabelMatcher::new(name, op, value)
}

/// Split a braces-stripped matcher list on top-level commas and parse each fragment.
///
/// `selector_body` is the content between `{` and `}` (or, for LBAC config
/// fragments, a standalone list with no braces at all).
pub fn parse_matcher_list(selector_body: &str) -> Result<Vec<LabelMatcher>> {
    let body = selector_body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(body, ',')
        .into_iter()
        .map(|fragment| parse_matcher_fragment(&fragment))
        .collect()
}

/// Split on `sep` at nesting depth zero, ignoring separators inside quotes or
/// brackets/braces/parens.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '(' | '[' | '{' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' if !in_quotes => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

/// Strip a single layer of matching double quotes, if present.
fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

/// Apply the injection algorithm to one selector's matcher list in place:
/// for every matcher in `enforced`, override a same-named existing matcher in
/// place (preserving its position), or append it if no such matcher exists.
/// Appended matchers retain the order of `enforced`.
pub fn inject_matchers(selector: &mut Vec<LabelMatcher>, enforced: &[LabelMatcher]) {
    for matcher in enforced {
        if let Some(existing) = selector.iter_mut().find(|m| m.name == matcher.name) {
            *existing = matcher.clone();
        } else {
            selector.push(matcher.clone());
        }
    }
}
