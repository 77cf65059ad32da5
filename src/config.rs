//! Configuration management.
//!
//! The config file is a mapping of inbound hostname to [`Destination`], the
//! same `yaml:",inline"` shape as `internal/config/config.go`. Grounded on the
//! teacher's `Config::load` (figment Yaml + prefixed env overlay), adapted
//! for this crate's flat top-level mapping instead of a nested `Config` struct.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::query::{parse_matcher_list, LabelMatcher};

/// Root configuration: every configured destination, keyed by the `Host`
/// header clients will send to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Config {
    pub destinations: HashMap<String, Destination>,
}

/// What backend protocol a destination's upstream speaks. Determines which
/// [`crate::query`] grammar and [`crate::backend`] route table apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackType {
    Loki,
    Prometheus,
    Mimir,
    Tempo,
    Pyroscope,
}

/// Allow/deny mode a tenant's groups are evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[serde(rename = "allowlist")]
    AllowList,
    #[serde(rename = "denylist")]
    DenyList,
}

/// One destination: an upstream observability backend plus the tenants
/// allowed to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type")]
    pub stack: StackType,
    pub upstream: Url,
    #[serde(default)]
    pub allow_undefined: bool,
    #[serde(default)]
    pub tenants: HashMap<String, Tenant>,
}

/// A tenant's policy: which mode governs its groups, and the groups
/// themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub mode: Mode,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// A named group of callers, carrying the label matchers enforced on every
/// query a member of this group issues.
///
/// `enforced_labels` is the YAML-authored form: each entry is a LogQL/PromQL
/// selector fragment (`env="prod"`), with or without surrounding braces; the
/// teacher's `Group.UnmarshalYAML` tolerates both by wrapping bare fragments
/// before parsing. `matchers` is derived from it at load time and is what
/// [`crate::policy`] and [`crate::query`] actually consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, rename = "enforcedLabels")]
    pub enforced_labels: Vec<String>,
    #[serde(skip)]
    pub matchers: Vec<LabelMatcher>,
}

impl Group {
    /// Parse `enforced_labels` into compiled matchers, wrapping any fragment
    /// that lacks surrounding braces. Called once at load time.
    fn compile(&mut self) -> Result<()> {
        let mut matchers = Vec::with_capacity(self.enforced_labels.len());
        for fragment in &self.enforced_labels {
            let wrapped = if fragment.trim_start().starts_with('{') {
                fragment.clone()
            } else {
                format!("{{{fragment}}}")
            };
            let body = wrapped
                .trim()
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| {
                    Error::ConfigInvalid(format!(
                        "group {}: unbalanced enforcedLabels fragment {fragment:?}",
                        self.name
                    ))
                })?;
            matchers.extend(parse_matcher_list(body).map_err(|e| {
                Error::ConfigInvalid(format!("group {}: {e}", self.name))
            })?);
        }
        self.matchers = matchers;
        Ok(())
    }

    /// Whether `caller_groups` (claims from the identity token) contains this group's name.
    #[must_use]
    pub fn matches(&self, caller_groups: &[String]) -> bool {
        caller_groups.iter().any(|g| g == &self.name)
    }
}

impl Config {
    /// Load configuration from a YAML file, overlaid with `GATEWAY_`-prefixed
    /// environment variables (`__` splitting nested keys), then validate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the file is missing, fails to
    /// parse, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigInvalid(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;

        config.compile_groups()?;
        config.validate()?;
        Ok(config)
    }

    fn compile_groups(&mut self) -> Result<()> {
        for destination in self.destinations.values_mut() {
            for tenant in destination.tenants.values_mut() {
                for group in &mut tenant.groups {
                    group.compile()?;
                }
            }
        }
        Ok(())
    }

    /// Enforce the invariants the gateway relies on at request time:
    /// group names unique within a tenant, and (implicitly, via the
    /// `HashMap` keying) destination hostnames and tenant IDs unique.
    fn validate(&self) -> Result<()> {
        for (host, destination) in &self.destinations {
            for (tenant_id, tenant) in &destination.tenants {
                let mut seen = std::collections::HashSet::new();
                for group in &tenant.groups {
                    if !seen.insert(&group.name) {
                        return Err(Error::ConfigInvalid(format!(
                            "destination {host}, tenant {tenant_id}: duplicate group name {:?}",
                            group.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a destination by the inbound `Host` header.
    #[must_use]
    pub fn destination(&self, host: &str) -> Option<&Destination> {
        self.destinations.get(host)
    }
}
