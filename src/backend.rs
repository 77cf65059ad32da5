//! Per-backend route tables: which query parameter (if any) carries a
//! rewritable selector for a given request path.
//!
//! Grounded on `internal/stacks/mimir/mimir.go`'s `Handle`/`PatchQuery`
//! route-constant switch, and the log-side route table from the
//! specification's equivalent listing (the Go `loki` package's `Handle`
//! dispatches on path the same way but wasn't available to copy verbatim).

use crate::config::StackType;
use crate::error::{Error, Result};

/// What to do with a request's query parameter for this path/method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Rewrite the named query parameter's selector.
    Rewrite(&'static str),
    /// Forward unchanged: no selector to enforce on this route.
    PassThrough,
}

const LOKI_LABEL_VALUES_PREFIX: &str = "/loki/api/v1/label/";

/// Look up how `path`/`method` should be treated for a Loki-stack destination.
///
/// # Errors
///
/// Returns [`Error::BackendNotImplemented`] for routes this gateway
/// deliberately does not support: any selector-bearing route issued as POST
/// (the selector would ride in the form body, which this gateway never
/// inspects — rewriting only the URL would let an unenforced query reach the
/// backend), plus series POST bodies and tail/websocket specifically.
pub fn loki_route(path: &str, method: &axum::http::Method) -> Result<RouteAction> {
    use axum::http::Method;

    if path.starts_with(LOKI_LABEL_VALUES_PREFIX) {
        return Ok(RouteAction::PassThrough);
    }

    match path {
        "/loki/api/v1/query"
        | "/loki/api/v1/query_range"
        | "/loki/api/v1/labels"
        | "/loki/api/v1/index/stats"
        | "/loki/api/v1/index/volume"
        | "/loki/api/v1/index/volume_range"
        | "/loki/api/v1/patterns"
            if *method == Method::GET =>
        {
            Ok(RouteAction::Rewrite("query"))
        }
        "/loki/api/v1/query"
        | "/loki/api/v1/query_range"
        | "/loki/api/v1/labels"
        | "/loki/api/v1/index/stats"
        | "/loki/api/v1/index/volume"
        | "/loki/api/v1/index/volume_range"
        | "/loki/api/v1/patterns" => Err(Error::BackendNotImplemented(
            "query via POST body".to_string(),
        )),

        "/loki/api/v1/series" if *method == Method::GET => Ok(RouteAction::Rewrite("match")),
        "/loki/api/v1/series" => Err(Error::BackendNotImplemented(
            "series query via POST body".to_string(),
        )),

        "/loki/api/v1/tail" => Err(Error::BackendNotImplemented("log tail websocket".to_string())),

        other => Err(Error::UnprocessableDestination(format!("unrecognized loki route: {other}"))),
    }
}

/// Look up how `path`/`method` should be treated for a Mimir/Prometheus-stack destination.
///
/// # Errors
///
/// Returns [`Error::BackendNotImplemented`] for the remote-read API,
/// label-value cardinality (both explicitly unimplemented upstream), and any
/// selector-bearing route issued as POST (the selector would ride in the
/// form body, which this gateway never inspects).
pub fn metric_route(path: &str, method: &axum::http::Method) -> Result<RouteAction> {
    use axum::http::Method;

    match path {
        "/prometheus/api/v1/query"
        | "/prometheus/api/v1/query_range"
        | "/prometheus/api/v1/query_exemplars"
        | "/prometheus/api/v1/format_query"
            if *method == Method::GET =>
        {
            Ok(RouteAction::Rewrite("query"))
        }
        "/prometheus/api/v1/query"
        | "/prometheus/api/v1/query_range"
        | "/prometheus/api/v1/query_exemplars"
        | "/prometheus/api/v1/format_query" => {
            Err(Error::BackendNotImplemented("query via POST body".to_string()))
        }

        "/prometheus/api/v1/series" | "/prometheus/api/v1/labels" if *method == Method::GET => {
            Ok(RouteAction::Rewrite("match[]"))
        }
        "/prometheus/api/v1/series" | "/prometheus/api/v1/labels" => Err(
            Error::BackendNotImplemented("series/labels query via POST body".to_string()),
        ),

        "/prometheus/api/v1/cardinality/active_series"
        | "/prometheus/api/v1/cardinality/label_names"
            if *method == Method::GET =>
        {
            Ok(RouteAction::Rewrite("selector"))
        }
        "/prometheus/api/v1/cardinality/active_series"
        | "/prometheus/api/v1/cardinality/label_names" => Err(Error::BackendNotImplemented(
            "cardinality query via POST body".to_string(),
        )),

        "/prometheus/api/v1/metadata" | "/prometheus/api/v1/status/buildinfo" => {
            Ok(RouteAction::PassThrough)
        }

        "/prometheus/api/v1/read" => Err(Error::BackendNotImplemented("remote read".to_string())),
        "/prometheus/api/v1/cardinality/label_values" => {
            Err(Error::BackendNotImplemented("label value cardinality".to_string()))
        }

        other => Err(Error::UnprocessableDestination(format!("unrecognized metric route: {other}"))),
    }
}

/// Dispatch to the right route table for `stack`. Trace and Profile
/// destinations have no query grammar to rewrite at all.
///
/// # Errors
///
/// Propagates the per-route errors above, or [`Error::BackendNotImplemented`]
/// unconditionally for Tempo/Pyroscope destinations.
pub fn route(stack: StackType, path: &str, method: &axum::http::Method) -> Result<RouteAction> {
    match stack {
        StackType::Loki => loki_route(path, method),
        StackType::Mimir | StackType::Prometheus => metric_route(path, method),
        StackType::Tempo => Err(Error::BackendNotImplemented("trace backend".to_string())),
        StackType::Pyroscope => Err(Error::BackendNotImplemented("profile backend".to_string())),
    }
}
