//! The gateway itself: router assembly, the request pipeline, and graceful
//! shutdown.
//!
//! Grounded on `gateway/server.rs`'s `Gateway::new`/`Gateway::run`: the broadcast
//! shutdown channel, `tokio::signal` handling for `Ctrl+C`/`SIGTERM`, and the
//! semaphore-backed in-flight drain, plus `gateway/router.rs`'s `AppState`
//! plus layered-middleware `create_router`. The middleware chain itself
//! (RouteResolver → TokenVerifier → PolicyEvaluator → QueryRewriter →
//! UpstreamProxy) is sequenced inside one handler rather than five axum
//! layers: every step after route resolution needs the prior step's output,
//! and the rewriter's parameter name depends on the resolved backend and
//! path, which a generic middleware can't express without its own dispatch
//! table, so request_handler *is* that dispatch, calling each component in
//! the specified order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::backend::{self, RouteAction};
use crate::config::{Config, Destination, StackType};
use crate::error::{Error, Result};
use crate::identity::TokenVerifier;
use crate::policy::{self, TENANT_HEADER};
use crate::query::logql::LogQuery;
use crate::query::promql::MetricQuery;
use crate::query::LabelMatcher;
use crate::routing::RouteResolver;
use crate::upstream::UpstreamProxy;

/// Large initial permit count; each in-flight request holds one until it
/// completes. Shutdown drains by reacquiring all of them.
const INFLIGHT_PERMITS: u32 = 10_000;

/// Shared, read-only state handed to every request task.
struct AppState {
    resolver: RouteResolver,
    verifier: TokenVerifier,
    upstream: UpstreamProxy,
    inflight: Arc<tokio::sync::Semaphore>,
}

/// The assembled gateway, ready to `run`.
pub struct Gateway {
    addr: SocketAddr,
    state: Arc<AppState>,
    drain_duration: Duration,
}

impl Gateway {
    /// Build a gateway from a loaded config and the identity provider
    /// settings resolved from CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is not registered.
    pub fn new(
        config: Config,
        port: u16,
        provider: &str,
        tenant_id: &str,
        client_id: &str,
        disable_token_validation: bool,
        drain_duration: Duration,
    ) -> Result<Self> {
        let verifier = if disable_token_validation {
            TokenVerifier::bypass()
        } else {
            TokenVerifier::new(provider, tenant_id, client_id)?
        };

        let destinations: HashMap<String, Arc<Destination>> = config
            .destinations
            .into_iter()
            .map(|(host, dest)| (host, Arc::new(dest)))
            .collect();

        let state = Arc::new(AppState {
            resolver: RouteResolver::new(destinations),
            verifier,
            upstream: UpstreamProxy::new(),
            inflight: Arc::new(tokio::sync::Semaphore::new(INFLIGHT_PERMITS as usize)),
        });

        Ok(Self {
            addr: SocketAddr::new([0, 0, 0, 0].into(), port),
            state,
            drain_duration,
        })
    }

    /// Run the gateway until a shutdown signal arrives, then drain in-flight
    /// requests for up to `drain_duration` before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let app = Router::new()
            .fallback(any(request_handler))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state));

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind {}: {e}", self.addr)))?;
        info!(addr = %self.addr, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!(timeout = ?self.drain_duration, "draining in-flight requests");
        match tokio::time::timeout(self.drain_duration, self.state.inflight.acquire_many(INFLIGHT_PERMITS))
            .await
        {
            Ok(Ok(_permits)) => info!("all in-flight requests completed"),
            Ok(Err(_)) => warn!("in-flight semaphore closed unexpectedly during drain"),
            Err(_) => {
                let remaining =
                    INFLIGHT_PERMITS.saturating_sub(self.state.inflight.available_permits() as u32);
                warn!(remaining_requests = remaining, "drain timeout reached, proceeding with shutdown");
            }
        }

        Ok(())
    }
}

/// Drives one request through the full RouteResolver → TokenVerifier →
/// PolicyEvaluator → QueryRewriter → UpstreamProxy pipeline.
async fn request_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    use axum::response::IntoResponse;

    let Ok(_permit) = state.inflight.try_acquire() else {
        return Error::Internal("server is draining".to_string()).into_response();
    };

    match handle(&state, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: &AppState, mut req: Request) -> Result<Response> {
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let destination = state.resolver.resolve(&host)?;

    let token = req
        .headers()
        .get("x-id-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let claims = state.verifier.verify(&token).await?;

    let tenant_header = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let decision = policy::evaluate(&destination, &tenant_header, &claims.groups, &claims.email)?;

    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let action = backend::route(destination.stack, &path, &method)?;

    if let RouteAction::Rewrite(param) = action {
        rewrite_query(&mut req, destination.stack, param, &decision)?;
    }

    state.upstream.forward(req, &destination.upstream).await
}

/// Rewrite a single backend selector value against the enforced matcher set.
fn rewrite_one(stack: StackType, raw_value: &str, enforced: &[LabelMatcher]) -> Result<String> {
    match stack {
        StackType::Loki => {
            let mut query = LogQuery::parse(raw_value)?;
            query.inject(enforced);
            Ok(query.serialize())
        }
        StackType::Mimir | StackType::Prometheus => {
            let mut query = MetricQuery::parse(raw_value)?;
            query.inject(enforced);
            Ok(query.serialize())
        }
        StackType::Tempo | StackType::Pyroscope => {
            Err(Error::BackendNotImplemented("non-query-rewritable backend".to_string()))
        }
    }
}

/// Rewrite every occurrence of `param` in the request's query string in
/// place (a route like metric `series`/`labels` legally repeats `match[]`
/// once per selector), preserving the relative order and position of every
/// query parameter. A parameter absent entirely is treated as the empty
/// selector and appended once, same as a single present-but-empty value.
fn rewrite_query(
    req: &mut Request,
    stack: StackType,
    param: &str,
    decision: &policy::Decision,
) -> Result<()> {
    if decision.enforced_matchers.is_empty() {
        return Ok(());
    }

    let mut url = Url::parse(&format!("http://placeholder{}", req.uri()))
        .map_err(|e| Error::Internal(format!("unparseable request URI: {e}")))?;

    let original_pairs: Vec<(String, String)> =
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();

    let mut rewritten_pairs = Vec::with_capacity(original_pairs.len().max(1));
    let mut found_param = false;
    for (k, v) in &original_pairs {
        if k == param {
            found_param = true;
            let rewritten = rewrite_one(stack, v, &decision.enforced_matchers)?;
            rewritten_pairs.push((k.clone(), rewritten));
        } else {
            rewritten_pairs.push((k.clone(), v.clone()));
        }
    }
    if !found_param {
        let rewritten = rewrite_one(stack, "", &decision.enforced_matchers)?;
        rewritten_pairs.push((param.to_string(), rewritten));
    }

    {
        let mut serializer = url.query_pairs_mut();
        serializer.clear();
        for (k, v) in &rewritten_pairs {
            serializer.append_pair(k, v);
        }
    }

    let new_path_and_query = match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(
        new_path_and_query
            .parse()
            .map_err(|e| Error::Internal(format!("failed to rebuild request URI: {e}")))?,
    );
    *req.uri_mut() = axum::http::Uri::from_parts(parts)
        .map_err(|e| Error::Internal(format!("failed to rebuild request URI: {e}")))?;
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MatchOp;
    use axum::http::Method;

    fn make_request(uri: &str) -> Request {
        Request::builder().method(Method::GET).uri(uri).body(axum::body::Body::empty()).unwrap()
    }

    #[test]
    fn rewrite_query_injects_into_loki_query_param() {
        let mut req = make_request(r#"/loki/api/v1/query?query={app="x"}&limit=100"#);
        let decision = policy::Decision {
            tenant_id: "t1".to_string(),
            enforced_matchers: vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()],
            groups: vec![],
            email: String::new(),
        };
        rewrite_query(&mut req, StackType::Loki, "query", &decision).unwrap();
        let query = req.uri().query().unwrap().to_string();
        assert!(query.contains("env"));
        assert!(query.contains("limit=100"));
    }

    #[test]
    fn rewrite_query_is_noop_when_no_enforced_matchers() {
        let mut req = make_request(r#"/loki/api/v1/query?query={app="x"}"#);
        let decision = policy::Decision {
            tenant_id: "t1".to_string(),
            enforced_matchers: vec![],
            groups: vec![],
            email: String::new(),
        };
        let before = req.uri().clone();
        rewrite_query(&mut req, StackType::Loki, "query", &decision).unwrap();
        assert_eq!(req.uri(), &before);
    }

    #[test]
    fn rewrite_query_rewrites_every_repeated_match_occurrence() {
        let mut req = make_request(
            r#"/prometheus/api/v1/series?match[]=up{job="a"}&match[]=down{job="b"}"#,
        );
        let decision = policy::Decision {
            tenant_id: "t1".to_string(),
            enforced_matchers: vec![LabelMatcher::new("env", MatchOp::Eq, "prod").unwrap()],
            groups: vec![],
            email: String::new(),
        };
        rewrite_query(&mut req, StackType::Prometheus, "match[]", &decision).unwrap();

        let url = Url::parse(&format!("http://placeholder{}", req.uri())).unwrap();
        let matches: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "match[]")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].contains(r#"job="a""#) && matches[0].contains(r#"env="prod""#));
        assert!(matches[1].contains(r#"job="b""#) && matches[1].contains(r#"env="prod""#));
    }
}
