//! Tenant access-control decision: allow/deny plus the enforced label set.
//!
//! Grounded on `internal/gateway/permissions.go`'s `checkPermissions`: header
//! extraction, tenant lookup, group-membership test via `slicesContains`, and
//! the allow/deny gate, generalized to also compute the LBAC matcher set
//! `E` that [`crate::query`] will inject, since this crate folds the
//! original's separate rewrite-time re-check into one evaluation.

use crate::config::{Destination, Mode};
use crate::error::{Error, Result};
use crate::query::LabelMatcher;

/// Header carrying the tenant identifier on every request.
pub const TENANT_HEADER: &str = "x-scope-orgid";

/// Result of a successful policy evaluation: what to record in the request
/// context for the rewriter and the log line.
#[derive(Debug, Clone)]
pub struct Decision {
    pub tenant_id: String,
    pub enforced_matchers: Vec<LabelMatcher>,
    pub groups: Vec<String>,
    pub email: String,
}

/// Evaluate access for `tenant_header` against `destination`, given the
/// caller's verified `groups`/`email`.
///
/// # Errors
///
/// - [`Error::TenantHeaderMissing`] if `tenant_header` is empty.
/// - [`Error::TenantHeaderMultiTenant`] if it contains `|` (multi-tenant list).
/// - [`Error::TenantUnknown`] if the tenant is absent and the destination
///   does not allow undefined tenants.
/// - [`Error::PolicyDenied`] if group membership fails the tenant's mode.
pub fn evaluate(
    destination: &Destination,
    tenant_header: &str,
    groups: &[String],
    email: &str,
) -> Result<Decision> {
    if tenant_header.is_empty() {
        return Err(Error::TenantHeaderMissing);
    }
    if tenant_header.contains('|') {
        return Err(Error::TenantHeaderMultiTenant);
    }

    let Some(tenant) = destination.tenants.get(tenant_header) else {
        return if destination.allow_undefined {
            Ok(Decision {
                tenant_id: tenant_header.to_string(),
                enforced_matchers: Vec::new(),
                groups: groups.to_vec(),
                email: email.to_string(),
            })
        } else {
            Err(Error::TenantUnknown)
        };
    };

    let mut enforced_matchers = Vec::new();
    let mut member = false;
    for group in &tenant.groups {
        if group.matches(groups) {
            member = true;
            enforced_matchers.extend(group.matchers.iter().cloned());
        }
    }

    let allowed = match tenant.mode {
        Mode::AllowList => member,
        Mode::DenyList => !member,
    };
    if !allowed {
        return Err(Error::PolicyDenied);
    }

    Ok(Decision {
        tenant_id: tenant_header.to_string(),
        enforced_matchers,
        groups: groups.to_vec(),
        email: email.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Group, StackType, Tenant};
    use crate::query::MatchOp;
    use std::collections::HashMap;

    fn destination(mode: Mode, group_names: &[&str], allow_undefined: bool) -> Destination {
        let groups = group_names
            .iter()
            .map(|name| Group {
                name: (*name).to_string(),
                enforced_labels: Vec::new(),
                matchers: vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()],
            })
            .collect();
        let mut tenants = HashMap::new();
        tenants.insert("t1".to_string(), Tenant { mode, groups });
        Destination {
            stack: StackType::Loki,
            upstream: "http://loki.internal:3100".parse().unwrap(),
            allow_undefined,
            tenants,
        }
    }

    #[test]
    fn missing_header_is_bad_request() {
        let dest = destination(Mode::AllowList, &["g1"], false);
        let err = evaluate(&dest, "", &["g1".to_string()], "a@b.com").unwrap_err();
        assert!(matches!(err, Error::TenantHeaderMissing));
    }

    #[test]
    fn pipe_delimited_header_is_not_implemented() {
        let dest = destination(Mode::AllowList, &["g1"], false);
        let err = evaluate(&dest, "t1|t2", &["g1".to_string()], "a@b.com").unwrap_err();
        assert!(matches!(err, Error::TenantHeaderMultiTenant));
    }

    #[test]
    fn allowlist_passes_when_member() {
        let dest = destination(Mode::AllowList, &["g1"], false);
        let decision = evaluate(&dest, "t1", &["g1".to_string()], "a@b.com").unwrap();
        assert_eq!(decision.enforced_matchers.len(), 1);
    }

    #[test]
    fn allowlist_denies_when_not_member() {
        let dest = destination(Mode::AllowList, &["g1"], false);
        let err = evaluate(&dest, "t1", &["g2".to_string()], "a@b.com").unwrap_err();
        assert!(matches!(err, Error::PolicyDenied));
    }

    #[test]
    fn denylist_denies_when_member() {
        let dest = destination(Mode::DenyList, &["g1"], false);
        let err = evaluate(&dest, "t1", &["g1".to_string()], "a@b.com").unwrap_err();
        assert!(matches!(err, Error::PolicyDenied));
    }

    #[test]
    fn denylist_passes_when_not_member() {
        let dest = destination(Mode::DenyList, &["g1"], false);
        let decision = evaluate(&dest, "t1", &["other".to_string()], "a@b.com").unwrap();
        assert!(decision.enforced_matchers.is_empty());
    }

    #[test]
    fn undefined_tenant_allowed_passes_through_with_no_matchers() {
        let dest = destination(Mode::AllowList, &["g1"], true);
        let decision = evaluate(&dest, "unknown-tenant", &[], "a@b.com").unwrap();
        assert!(decision.enforced_matchers.is_empty());
    }

    #[test]
    fn undefined_tenant_disallowed_is_forbidden() {
        let dest = destination(Mode::AllowList, &["g1"], false);
        let err = evaluate(&dest, "unknown-tenant", &[], "a@b.com").unwrap_err();
        assert!(matches!(err, Error::TenantUnknown));
    }
}
