//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the relay handler
//! - Wire up middleware (tracing, request ID, tracking, timeout)
//! - Bind server to a plain or TLS listener
//! - Forward requests to the upstream host service

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Extension, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{RelayConfig, TlsConfig};
use crate::http::request::request_id_middleware;
use crate::observability::metrics;
use crate::tracking::{tracking_middleware, TlsConnection, Tracker, TrackingContext};

/// Grace period for in-flight TLS connections on shutdown.
const TLS_DRAIN_SECS: u64 = 10;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Option<Authority>,
    pub ignore_paths: Arc<Vec<String>>,
}

/// HTTP server for the tracking relay.
pub struct HttpServer {
    router: Router,
    config: RelayConfig,
}

impl HttpServer {
    /// Create a new HTTP server delivering beacons over HTTP.
    pub fn new(config: RelayConfig) -> Self {
        let tracker = Arc::new(Tracker::from_config(&config.tracking));
        Self::with_tracker(config, tracker)
    }

    /// Create a new HTTP server with a prepared tracker.
    pub fn with_tracker(config: RelayConfig, tracker: Arc<Tracker>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let upstream = match Authority::from_str(&config.upstream.address) {
            Ok(authority) => Some(authority),
            Err(e) => {
                tracing::error!(address = %config.upstream.address, error = %e, "Invalid upstream address");
                None
            }
        };

        let state = AppState {
            client,
            upstream,
            ignore_paths: Arc::new(config.tracking.ignore_paths.clone()),
        };

        let router = Self::build_router(&config, state, tracker);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &RelayConfig, state: AppState, tracker: Arc<Tracker>) -> Router {
        Router::new()
            .route("/{*path}", any(relay_handler))
            .route("/", any(relay_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.upstream.request_timeout_secs)))
            .layer(middleware::from_fn_with_state(tracker, tracking_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for serving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the server, accepting plain TCP connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server terminating TLS on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        let app = self
            .router
            .layer(Extension(TlsConnection))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Whether `path` falls under one of the untracked prefixes.
fn is_ignored_path(ignore_paths: &[String], path: &str) -> bool {
    ignore_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Forwards the request to the upstream host service.
async fn relay_handler(
    State(state): State<AppState>,
    tracking: TrackingContext,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();

    if is_ignored_path(&state.ignore_paths, request.uri().path()) {
        tracking.ignore();
    }

    let Some(upstream) = state.upstream.clone() else {
        metrics::record_request(&method, 502, start_time);
        return (StatusCode::BAD_GATEWAY, "Upstream not configured").into_response();
    };

    let (mut parts, body) = request.into_parts();
    // The upstream pool speaks HTTP/1.1 regardless of the client's version.
    parts.version = Version::HTTP_11;
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(upstream);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build upstream URI");
            metrics::record_request(&method, 502, start_time);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream URI").into_response();
        }
    };

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(error = %e, "Upstream error");
            metrics::record_request(&method, 502, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
