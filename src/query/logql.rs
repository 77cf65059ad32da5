//! A LogQL-shaped grammar: `{matchers}` possibly wrapped in a range-aggregation
//! function call and/or followed by a pipeline of filter/format stages.
//!
//! Grounded on `internal/stacks/loki/loki.go`'s `EnforceLBAC`: locate the
//! query's single label selector (`pipeline.Left.Mts` there; our
//! [`LogQuery::matchers`] here), rewrite its matcher list in place, and leave
//! every other token of the expression untouched. We don't build a full
//! LogQL pipeline AST: stages like `| json` or `| line_format "..."` are
//! opaque text to this gateway, since LBAC only ever touches the selector.

use super::{inject_matchers, parse_matcher_list, LabelMatcher};
use crate::error::{Error, Result};

/// A parsed log query: the text before the selector, the selector's matcher
/// list, and the text after the selector (pipeline stages, range duration,
/// closing parens of an aggregation wrapper, etc).
#[derive(Debug, Clone)]
pub struct LogQuery {
    prefix: String,
    matchers: Vec<LabelMatcher>,
    suffix: String,
}

impl LogQuery {
    /// Parse `raw` into prefix/selector/suffix. An empty string is the empty
    /// selector some routes accept as a legal default.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self {
                prefix: String::new(),
                matchers: Vec::new(),
                suffix: String::new(),
            });
        }

        let (open, close) = find_selector_braces(raw)
            .ok_or_else(|| Error::QueryUnsupportedShape("no label selector found".to_string()))?;

        let prefix = raw[..open].to_string();
        let body = &raw[open + 1..close];
        let matchers = parse_matcher_list(body)?;
        let suffix = raw[close + 1..].to_string();

        Ok(Self { prefix, matchers, suffix })
    }

    /// Apply the label injection algorithm: override matchers sharing a name
    /// with an enforced matcher in place, append the rest.
    pub fn inject(&mut self, enforced: &[LabelMatcher]) {
        inject_matchers(&mut self.matchers, enforced);
    }

    /// Re-serialize to the backend's query parameter value.
    #[must_use]
    pub fn serialize(&self) -> String {
        let body = self
            .matchers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{body}}}{}", self.prefix, self.suffix)
    }

    /// The current matcher list, for inspection in tests.
    #[must_use]
    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }
}

/// Locate the first unquoted `{`...`}` pair at brace-nesting depth zero,
/// returning its byte offsets. Returns `None` if the braces are absent or
/// unbalanced.
fn find_selector_braces(raw: &str) -> Option<(usize, usize)> {
    let bytes = raw.as_bytes();
    let mut in_quotes = false;
    let mut open: Option<usize> = None;
    let mut depth = 0i32;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'\\' if in_quotes => i += 1, // skip escaped char
            b'{' if !in_quotes => {
                if open.is_none() {
                    open = Some(i);
                }
                depth += 1;
            }
            b'}' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    if let Some(o) = open {
                        return Some((o, i));
                    }
                }
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MatchOp;

    #[test]
    fn parses_bare_selector() {
        let q = LogQuery::parse(r#"{app="x"}"#).unwrap();
        assert_eq!(q.matchers().len(), 1);
        assert_eq!(q.matchers()[0].name, "app");
    }

    #[test]
    fn parses_selector_with_pipeline() {
        let q = LogQuery::parse(r#"{app="x"} | json | line_format "{{.foo}}""#).unwrap();
        assert_eq!(q.matchers().len(), 1);
        assert!(q.serialize().ends_with(r#"| json | line_format "{{.foo}}""#));
    }

    #[test]
    fn parses_range_aggregation_wrapper() {
        let q = LogQuery::parse(r#"count_over_time({app="x"}[5m])"#).unwrap();
        assert_eq!(q.matchers().len(), 1);
        assert_eq!(q.serialize(), r#"count_over_time({app="x"}[5m])"#);
    }

    #[test]
    fn empty_query_is_legal() {
        let q = LogQuery::parse("").unwrap();
        assert!(q.matchers().is_empty());
        assert_eq!(q.serialize(), "{}");
    }

    #[test]
    fn rejects_missing_selector() {
        let err = LogQuery::parse("just some text").unwrap_err();
        assert!(matches!(err, Error::QueryUnsupportedShape(_)));
    }

    #[test]
    fn rejects_unbalanced_braces() {
        assert!(LogQuery::parse("{[invalid").is_err());
    }

    #[test]
    fn inject_overrides_user_supplied_label() {
        let mut q = LogQuery::parse(r#"{app="x",env="dev"}"#).unwrap();
        let enforced = vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()];
        q.inject(&enforced);
        assert_eq!(q.serialize(), r#"{app="x",env="prod"}"#);
    }

    #[test]
    fn inject_appends_when_absent() {
        let mut q = LogQuery::parse(r#"{app="x"}"#).unwrap();
        let enforced = vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()];
        q.inject(&enforced);
        assert_eq!(q.serialize(), r#"{app="x",env="prod"}"#);
    }

    #[test]
    fn injection_is_idempotent() {
        let mut q = LogQuery::parse(r#"{app="x"}"#).unwrap();
        let enforced = vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()];
        q.inject(&enforced);
        let once = q.serialize();
        let mut reparsed = LogQuery::parse(&once).unwrap();
        reparsed.inject(&enforced);
        assert_eq!(reparsed.serialize(), once);
    }
}
