use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::Pipeline;
use crate::runner::CommandRunner;
use crate::types::ScanRequest;

pub struct AppState<R> {
    pipeline: Arc<Pipeline<R>>,
    inner: Arc<RwLock<ServerState>>,
}

// Manual impl: `R` itself need not be `Clone`.
impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    results: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub state: String, // "idle" | "running" | "done"
}

impl Status {
    fn idle() -> Self {
        Self {
            state: "idle".into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<ScanRequest>,
}

impl<R: CommandRunner + 'static> AppState<R> {
    pub fn new(pipeline: Pipeline<R>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            inner: Arc::new(RwLock::new(ServerState {
                status: Status::idle(),
                results: None,
            })),
        }
    }
}

pub fn router<R: CommandRunner + 'static>(state: AppState<R>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status::<R>))
        .route("/scan", post(post_scan::<R>))
        .route("/results", get(get_results::<R>))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server<R: CommandRunner + 'static>(bind: &str, pipeline: Pipeline<R>) -> Result<()> {
    let app = router(AppState::new(pipeline));
    info!("serving scan API on http://{}", bind);
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status<R: CommandRunner + 'static>(State(app): State<AppState<R>>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results<R: CommandRunner + 'static>(State(app): State<AppState<R>>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_scan<R: CommandRunner + 'static>(
    State(app): State<AppState<R>>,
    Json(req): Json<BatchRequest>,
) -> impl IntoResponse {
    let total = req.items.len() as u64;
    {
        let mut s = app.inner.write().await;
        if s.status.state == "running" {
            return (StatusCode::CONFLICT, "a batch is already running").into_response();
        }
        s.status = Status {
            total,
            processed: 0,
            failed: 0,
            state: "running".into(),
        };
        s.results = None;
    }

    let app2 = app.clone();
    tokio::spawn(async move {
        let mut results = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let result = app2.pipeline.process(item).await;
            let failed = !result.outcome.is_success();
            results.push(result.to_json());
            let mut s = app2.inner.write().await;
            s.status.processed += 1;
            if failed {
                s.status.failed += 1;
            }
        }
        let mut s = app2.inner.write().await;
        s.status.state = "done".into();
        s.results = Some(results);
    });

    (
        StatusCode::ACCEPTED,
        Json(Status {
            total,
            processed: 0,
            failed: 0,
            state: "running".into(),
        }),
    )
        .into_response()
}
