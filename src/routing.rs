//! Host-header route resolution: the first step of the request pipeline.
//!
//! Grounded on `internal/gateway/balancer.go`'s `CustomBalancer`: a static
//! `Host → target` map built once at startup, and a `checkTarget` step that
//! 404s unknown hosts before anything else runs. This crate's pipeline runs
//! every step inside one handler (see [`crate::server`]) rather than as
//! separate axum middleware, so `RouteResolver` is a plain lookup type
//! called directly from there instead of an `axum::middleware::from_fn` layer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Destination;
use crate::error::{Error, Result};

/// Read-only `Host → Destination` registry, built once from [`crate::config::Config`].
pub struct RouteResolver {
    destinations: HashMap<String, Arc<Destination>>,
}

impl RouteResolver {
    #[must_use]
    pub fn new(destinations: HashMap<String, Arc<Destination>>) -> Self {
        Self { destinations }
    }

    /// Resolve `host` to its configured destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHost`] if no destination is configured for `host`.
    pub fn resolve(&self, host: &str) -> Result<Arc<Destination>> {
        self.destinations
            .get(host)
            .cloned()
            .ok_or_else(|| Error::UnknownHost(host.to_string()))
    }
}
