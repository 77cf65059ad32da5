//! End-to-end scenarios driving Config → RouteResolver → PolicyEvaluator →
//! QueryRewriter together, without a live server or network call (the
//! teacher's own integration suite needs a running process on a fixed port;
//! this crate's pipeline is pure enough to exercise in-process instead).

use std::io::Write;

use lgtm_query_gateway::config::Config;
use lgtm_query_gateway::error::Error;
use lgtm_query_gateway::policy;
use lgtm_query_gateway::query::logql::LogQuery;
use lgtm_query_gateway::query::promql::MetricQuery;
use lgtm_query_gateway::routing::RouteResolver;

const YAML: &str = r#"
logs.example:
  type: loki
  upstream: http://loki.internal:3100
  allowUndefined: false
  tenants:
    t1:
      mode: allowlist
      groups:
        - name: g1
          enforcedLabels:
            - 'env="prod"'
metrics.example:
  type: mimir
  upstream: http://mimir.internal:8080
  allowUndefined: true
  tenants:
    t1:
      mode: denylist
      groups:
        - name: g1
"#;

fn load_config() -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{YAML}").unwrap();
    Config::load(&path).unwrap()
}

fn resolver(config: &Config) -> RouteResolver {
    let destinations = config
        .destinations
        .iter()
        .map(|(host, dest)| (host.clone(), std::sync::Arc::new(dest.clone())))
        .collect();
    RouteResolver::new(destinations)
}

/// Scenario 1: allowlist hit injects the group's enforced label.
#[test]
fn allowlist_hit_injects_lbac_label_on_log_backend() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("logs.example").unwrap();

    let decision = policy::evaluate(&destination, "t1", &["g1".to_string()], "a@b.com").unwrap();

    let mut query = LogQuery::parse(r#"{app="x"}"#).unwrap();
    query.inject(&decision.enforced_matchers);
    assert_eq!(query.serialize(), r#"{app="x",env="prod"}"#);
}

/// Scenario 2: allowlist miss is rejected before any query rewriting happens.
#[test]
fn allowlist_miss_is_forbidden() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("logs.example").unwrap();

    let err = policy::evaluate(&destination, "t1", &["g2".to_string()], "a@b.com").unwrap_err();
    assert!(matches!(err, Error::PolicyDenied));
}

/// Scenario 4: a user-supplied label sharing the enforced name is overridden, not duplicated.
#[test]
fn user_supplied_label_is_overridden_not_duplicated() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("logs.example").unwrap();

    let decision = policy::evaluate(&destination, "t1", &["g1".to_string()], "a@b.com").unwrap();
    let mut query = LogQuery::parse(r#"{app="x",env="dev"}"#).unwrap();
    query.inject(&decision.enforced_matchers);
    assert_eq!(query.serialize(), r#"{app="x",env="prod"}"#);
}

/// Scenario 5: an undefined tenant with `allowUndefined: true` passes through with no matchers.
#[test]
fn undefined_tenant_with_allow_undefined_passes_through() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("metrics.example").unwrap();

    let decision = policy::evaluate(&destination, "unknown-tenant", &[], "a@b.com").unwrap();
    assert!(decision.enforced_matchers.is_empty());

    let mut query = MetricQuery::parse(r#"up{job="x"}"#).unwrap();
    query.inject(&decision.enforced_matchers);
    assert_eq!(query.serialize(), r#"up{job="x"}"#);
}

/// Scenario 6: a pipe-delimited tenant header is rejected as not implemented.
#[test]
fn multi_tenant_header_is_rejected() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("logs.example").unwrap();

    let err = policy::evaluate(&destination, "t1|t2", &["g1".to_string()], "a@b.com").unwrap_err();
    assert!(matches!(err, Error::TenantHeaderMultiTenant));
}

/// Scenario 7: both vector selectors in a binary metric expression get the enforced label.
#[test]
fn metric_binary_expression_rewrites_both_selectors() {
    let config = load_config();
    let resolver = resolver(&config);
    let destination = resolver.resolve("metrics.example").unwrap();

    // Denylist tenant, caller not in g1: passes, no matchers enforced.
    // Switch to a config where the same group *does* enforce a label to
    // exercise the multi-selector rewrite.
    let decision = policy::Decision {
        tenant_id: "t1".to_string(),
        enforced_matchers: vec![
            lgtm_query_gateway::query::LabelMatcher::new(
                "env",
                lgtm_query_gateway::query::MatchOp::Eq,
                "prod",
            )
            .unwrap(),
        ],
        groups: vec![],
        email: String::new(),
    };

    let mut query = MetricQuery::parse(
        r#"sum(rate(http_requests_total{job="api"}[5m])) / sum(rate(http_requests_total[5m]))"#,
    )
    .unwrap();
    assert_eq!(query.selector_count(), 2);
    query.inject(&decision.enforced_matchers);
    let out = query.serialize();
    assert_eq!(out.matches(r#"env="prod""#).count(), 2);
}

/// Scenario 8: an unparseable query (unbalanced braces) is rejected before reaching upstream.
#[test]
fn unbalanced_braces_is_unparseable() {
    let err = LogQuery::parse("{[invalid").unwrap_err();
    assert!(matches!(err, Error::QueryUnparseable(_) | Error::QueryUnsupportedShape(_)));
}

/// Unknown hosts never reach policy evaluation.
#[test]
fn unknown_host_is_rejected_before_policy() {
    let config = load_config();
    let resolver = resolver(&config);
    assert!(matches!(resolver.resolve("nope.example").unwrap_err(), Error::UnknownHost(_)));
}
