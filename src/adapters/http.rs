// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! HTTP query API over the latest pipeline snapshot

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::OutputAdapter;
use crate::config::HttpConfig;
use crate::core::{PipelineHandle, StateEvent};
use crate::error::PulseError;

/// How long stopping waits for open connections to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Read-only HTTP adapter. Events are served from the pipeline snapshot,
/// so `send` has nothing to do.
pub struct HttpAdapter {
    host: String,
    port: u16,
    cors: bool,
    pipeline: PipelineHandle,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl HttpAdapter {
    pub fn new(config: &HttpConfig, pipeline: PipelineHandle) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            cors: config.cors,
            pipeline,
            shutdown: None,
            server: None,
            local_addr: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// API routes
pub fn router(pipeline: PipelineHandle, cors: bool) -> Router {
    let router = Router::new()
        .route("/api/status", get(status))
        .route("/api/tokens", get(tokens))
        .route("/api/health", get(health))
        .route("/api/sessions", get(sessions));

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(pipeline)
}

async fn status(State(pipeline): State<PipelineHandle>) -> Response {
    match pipeline.current() {
        Some(event) => Json(event).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No status available" })),
        )
            .into_response(),
    }
}

async fn tokens(State(pipeline): State<PipelineHandle>) -> Response {
    Json(pipeline.snapshot().tokens).into_response()
}

async fn health(State(pipeline): State<PipelineHandle>) -> Response {
    let snapshot = pipeline.snapshot();
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "running": snapshot.health.running,
        "started_at": snapshot.health.started_at,
        "events_received": snapshot.health.events_received,
        "events_published": snapshot.health.events_published,
        "adapters": snapshot.health.adapters,
        "plugins": snapshot.plugins,
    }))
    .into_response()
}

async fn sessions(State(pipeline): State<PipelineHandle>) -> Response {
    Json(pipeline.snapshot().sessions).into_response()
}

#[async_trait]
impl OutputAdapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&mut self) -> Result<()> {
        if self.shutdown.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| PulseError::bind("http", &addr, e))?;
        let local_addr = listener.local_addr()?;
        info!("HTTP API listening on http://{}", local_addr);

        let app = router(self.pipeline.clone(), self.cors);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("HTTP server error: {}", e);
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.server = Some(server);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Stop accepting, let in-flight requests finish, and wait for the server task.
    async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                warn!("HTTP server did not drain in time, aborting");
                server.abort();
                let _ = server.await;
            }
            info!("HTTP API stopped");
        }
        self.local_addr = None;
        Ok(())
    }

    async fn send(&self, _event: &StateEvent) -> Result<()> {
        Ok(())
    }
}
