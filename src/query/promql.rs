//! A PromQL-shaped grammar: arbitrarily nested calls, aggregations, and
//! binary expressions wrapping zero or more vector selectors.
//!
//! Grounded on `internal/stacks/mimir/mimir.go`'s `getSelectors`, which walks
//! the parsed expression with `parser.Inspect` and collects every
//! `*parser.VectorSelector` node. We don't materialize a full expression
//! tree: tracking operator precedence and associativity buys us nothing the
//! rewriter needs. Instead [`MetricQuery::parse`] scans the query left to
//! right and records the byte span of every vector-selector site (metric
//! name, optional `{matchers}`, optional `[range]`/`offset` suffix which is
//! skipped over untouched) while correctly *not* mistaking a function name,
//! an aggregation's `by (...)`/`without (...)` label list, or a binary
//! operator modifier's `on (...)`/`ignoring (...)` list for a selector.

use super::{inject_matchers, parse_matcher_list, LabelMatcher};
use crate::error::{Error, Result};

/// One vector-selector site found in the query string.
#[derive(Debug, Clone)]
struct SelectorSpan {
    /// Byte range of the whole selector (metric name through closing brace,
    /// or just the metric name/bare braces if there is no brace/no name).
    start: usize,
    end: usize,
    metric_name: Option<String>,
    had_braces: bool,
    matchers: Vec<LabelMatcher>,
}

/// A parsed metric query: the original text plus every selector site found
/// in it, ready to be rewritten and re-spliced.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    raw: String,
    selectors: Vec<SelectorSpan>,
}

impl MetricQuery {
    /// Scan `raw` for every vector-selector site.
    pub fn parse(raw: &str) -> Result<Self> {
        let selectors = scan_selectors(raw)?;
        Ok(Self { raw: raw.to_string(), selectors })
    }

    /// Number of vector selectors found. Zero means a pure scalar expression.
    #[must_use]
    pub fn selector_count(&self) -> usize {
        self.selectors.len()
    }

    /// Apply the injection algorithm to every selector found in the query.
    pub fn inject(&mut self, enforced: &[LabelMatcher]) {
        for selector in &mut self.selectors {
            inject_matchers(&mut selector.matchers, enforced);
        }
    }

    /// Re-serialize, splicing each rewritten selector back into the original text.
    #[must_use]
    pub fn serialize(&self) -> String {
        if self.selectors.is_empty() {
            return self.raw.clone();
        }
        let mut out = String::with_capacity(self.raw.len());
        let mut cursor = 0usize;
        for selector in &self.selectors {
            out.push_str(&self.raw[cursor..selector.start]);
            out.push_str(&render_selector(selector));
            cursor = selector.end;
        }
        out.push_str(&self.raw[cursor..]);
        out
    }
}

fn render_selector(selector: &SelectorSpan) -> String {
    let name = selector.metric_name.as_deref().unwrap_or("");
    let body = selector
        .matchers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if selector.had_braces || !selector.matchers.is_empty() {
        format!("{name}{{{body}}}")
    } else {
        name.to_string()
    }
}

const KEYWORDS: &[&str] = &[
    "by", "without", "on", "ignoring", "group_left", "group_right", "offset", "bool", "and", "or",
    "unless", "atan2",
];

const LABEL_LIST_KEYWORDS: &[&str] = &["by", "without", "on", "ignoring"];

fn scan_selectors(raw: &str) -> Result<Vec<SelectorSpan>> {
    let bytes = raw.as_bytes();
    let len = bytes.len();
    let mut selectors = Vec::new();
    let mut i = 0usize;

    while i < len {
        let c = bytes[i] as char;
        if c == '"' || c == '\'' {
            i = skip_string(raw, i)?;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let ident_start = i;
            let ident_end = read_ident(raw, i);
            let text = &raw[ident_start..ident_end];
            let lower = text.to_ascii_lowercase();
            let after_ident = skip_ws(raw, ident_end);

            if KEYWORDS.contains(&lower.as_str()) {
                if LABEL_LIST_KEYWORDS.contains(&lower.as_str())
                    && bytes.get(after_ident) == Some(&b'(')
                {
                    i = find_matching(raw, after_ident, '(', ')')? + 1;
                } else {
                    i = ident_end;
                }
                continue;
            }

            if bytes.get(after_ident) == Some(&b'(') {
                // Function or aggregation name, not a selector; recurse normally.
                i = ident_end;
                continue;
            }

            // Metric-name vector selector, optionally braced.
            let mut pos = after_ident;
            let mut had_braces = false;
            let mut matchers = Vec::new();
            if bytes.get(pos) == Some(&b'{') {
                let close = find_matching(raw, pos, '{', '}')?;
                matchers = parse_matcher_list(&raw[pos + 1..close])?;
                had_braces = true;
                pos = close + 1;
            }
            let selector_end = pos;
            pos = skip_ws(raw, pos);
            if bytes.get(pos) == Some(&b'[') {
                pos = find_matching(raw, pos, '[', ']')? + 1;
            }
            let after_range = skip_ws(raw, pos);
            if raw[after_range..].to_ascii_lowercase().starts_with("offset") {
                let kw_end = after_range + "offset".len();
                let dur_start = skip_ws(raw, kw_end);
                let dur_end = read_ident(raw, dur_start);
                if dur_end > dur_start {
                    pos = dur_end;
                }
            }

            selectors.push(SelectorSpan {
                start: ident_start,
                end: selector_end,
                metric_name: Some(text.to_string()),
                had_braces,
                matchers,
            });
            i = pos;
            continue;
        }
        if c == '{' {
            let close = find_matching(raw, i, '{', '}')?;
            let matchers = parse_matcher_list(&raw[i + 1..close])?;
            selectors.push(SelectorSpan {
                start: i,
                end: close + 1,
                metric_name: None,
                had_braces: true,
                matchers,
            });
            i = close + 1;
            continue;
        }
        i += 1;
    }

    Ok(selectors)
}

fn read_ident(raw: &str, start: usize) -> usize {
    let bytes = raw.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn skip_ws(raw: &str, start: usize) -> usize {
    let bytes = raw.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    i
}

fn skip_string(raw: &str, start: usize) -> Result<usize> {
    let bytes = raw.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(Error::QueryUnparseable("unterminated string literal".to_string()))
}

/// Find the index of the `close` character matching the `open` character at
/// byte offset `start`, accounting for nesting and quoted strings.
fn find_matching(raw: &str, start: usize, open: char, close: char) -> Result<usize> {
    let bytes = raw.as_bytes();
    debug_assert_eq!(bytes[start] as char, open);
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '"' || c == '\'' {
            i = skip_string(raw, i)?;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
        i += 1;
    }
    Err(Error::QueryUnparseable(format!("unbalanced '{open}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MatchOp;

    #[test]
    fn scalar_expression_has_no_selectors() {
        let q = MetricQuery::parse("1 + 1").unwrap();
        assert_eq!(q.selector_count(), 0);
        assert_eq!(q.serialize(), "1 + 1");
    }

    #[test]
    fn single_selector_with_braces() {
        let q = MetricQuery::parse(r#"http_requests_total{job="api"}"#).unwrap();
        assert_eq!(q.selector_count(), 1);
    }

    #[test]
    fn bare_metric_name_selector_gets_braces_on_injection() {
        let mut q = MetricQuery::parse("http_requests_total").unwrap();
        assert_eq!(q.selector_count(), 1);
        q.inject(&[LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()]);
        assert_eq!(q.serialize(), r#"http_requests_total{env="prod"}"#);
    }

    #[test]
    fn multi_selector_binary_expression_rewrites_both() {
        let mut q = MetricQuery::parse(
            r#"sum(rate(http_requests_total{job="api"}[5m])) / sum(rate(http_requests_total[5m]))"#,
        )
        .unwrap();
        assert_eq!(q.selector_count(), 2);
        q.inject(&[LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()]);
        let out = q.serialize();
        assert_eq!(out.matches(r#"env="prod""#).count(), 2);
        assert!(out.contains(r#"http_requests_total{job="api",env="prod"}"#));
        assert!(out.contains(r#"http_requests_total{env="prod"}"#));
    }

    #[test]
    fn aggregation_by_clause_label_names_are_not_selectors() {
        let q = MetricQuery::parse(r#"sum by (job, instance) (rate(up{job="x"}[5m]))"#).unwrap();
        assert_eq!(q.selector_count(), 1);
        assert_eq!(q.serialize(), r#"sum by (job, instance) (rate(up{job="x"}[5m]))"#);
    }

    #[test]
    fn binary_op_on_clause_is_not_a_selector() {
        let q = MetricQuery::parse(
            r#"up{job="a"} * on(instance) group_left() up{job="b"}"#,
        )
        .unwrap();
        assert_eq!(q.selector_count(), 2);
    }

    #[test]
    fn override_replaces_existing_label() {
        let mut q = MetricQuery::parse(r#"up{env="dev"}"#).unwrap();
        q.inject(&[LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()]);
        assert_eq!(q.serialize(), r#"up{env="prod"}"#);
    }

    #[test]
    fn unbalanced_braces_is_an_error() {
        assert!(MetricQuery::parse("up{job=\"x\"").is_err());
    }

    #[test]
    fn injection_is_idempotent() {
        let mut q = MetricQuery::parse(r#"up{job="x"}"#).unwrap();
        let enforced = vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()];
        q.inject(&enforced);
        let once = q.serialize();
        let mut again = MetricQuery::parse(&once).unwrap();
        again.inject(&enforced);
        assert_eq!(again.serialize(), once);
    }

    #[test]
    fn round_trip_when_enforced_set_is_empty() {
        let mut q = MetricQuery::parse(r#"up{job="x"}"#).unwrap();
        q.inject(&[]);
        assert_eq!(q.serialize(), r#"up{job="x"}"#);
    }
}
