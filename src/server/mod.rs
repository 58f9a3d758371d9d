//! HTTP ingress.
//!
//! Two endpoints: `POST /api/github/hook` receives and classifies GitHub
//! webhook deliveries, and `GET /` answers liveness probes. All real work
//! happens asynchronously in queue workers; the hook handler only verifies,
//! classifies, and enqueues.

pub mod webhook;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::controller::workers::WorkerContext;
use crate::github::GitHubClient;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    ctx: WorkerContext,
    client: Arc<GitHubClient>,
    /// Shared secret for webhook signature verification.
    webhook_secret: Vec<u8>,
    /// The running GitHub App's id, used to skip self-created check runs.
    app_id: u64,
}

impl AppState {
    pub fn new(
        ctx: WorkerContext,
        client: Arc<GitHubClient>,
        webhook_secret: impl Into<Vec<u8>>,
        app_id: u64,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                ctx,
                client,
                webhook_secret: webhook_secret.into(),
                app_id,
            }),
        }
    }

    pub fn ctx(&self) -> &WorkerContext {
        &self.inner.ctx
    }

    pub fn client(&self) -> &Arc<GitHubClient> {
        &self.inner.client
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn app_id(&self) -> u64 {
        self.inner.app_id
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/github/hook", post(webhook::webhook_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}
