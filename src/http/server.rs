//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the session endpoint and `/health`
//! - Wire up middleware (request ID, tracing, body limit)
//! - Serve until the shutdown broadcast fires

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::http::handlers;
use crate::http::request::X_REQUEST_ID;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub keep_alive: Duration,
}

/// HTTP front end of the bridge.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, bridge: Arc<Bridge>) -> Self {
        let state = AppState {
            bridge,
            keep_alive: Duration::from_secs(config.keep_alive_secs),
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The submit deadline lives in [`Bridge`], not in a layer.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let endpoint = post(handlers::submit)
            .get(handlers::stream)
            .delete(handlers::terminate);

        Router::new()
            .route(&config.path, endpoint)
            .route("/health", get(handlers::health))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        let request_id = request
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        tracing::info_span!(
                            "http",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.max_body_bytes)),
            )
    }

    /// Serve on `listener` until `shutdown` fires, then finish in-flight
    /// requests and open streams.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
