use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::pipeline;
use crate::source::ProgressSource;
use crate::store::{AnalyticsFilter, AnalyticsStore};

#[derive(Clone)]
pub struct AppState<S, T> {
    pub source: S,
    pub store: T,
}

pub fn router<S, T>(state: AppState<S, T>) -> Router
where
    S: ProgressSource,
    T: AnalyticsStore,
{
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/calculate-analytics", post(calculate_handler::<S, T>))
        .route("/api/analytics", get(analytics_handler::<S, T>))
        .with_state(state)
}

pub async fn serve<S, T>(addr: SocketAddr, state: AppState<S, T>) -> anyhow::Result<()>
where
    S: ProgressSource,
    T: AnalyticsStore,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Analytics API listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down analytics API");
        })
        .await?;
    Ok(())
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

async fn calculate_handler<S, T>(State(state): State<AppState<S, T>>) -> Response
where
    S: ProgressSource,
    T: AnalyticsStore,
{
    match pipeline::calculate(&state.source, &state.store, Utc::now()).await {
        Ok(summary) => Json(json!({
            "success": true,
            "message": "Analytics calculated and stored successfully",
            "data": summary,
        }))
        .into_response(),
        Err(err) => {
            error!("Analytics calculation error: {}", err);
            failure(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    school_id: Option<String>,
    teacher_id: Option<String>,
}

async fn analytics_handler<S, T>(
    State(state): State<AppState<S, T>>,
    Query(params): Query<AnalyticsParams>,
) -> Response
where
    S: ProgressSource,
    T: AnalyticsStore,
{
    let filter = AnalyticsFilter {
        school_id: params.school_id.filter(|s| !s.is_empty()),
        teacher_id: params.teacher_id.filter(|s| !s.is_empty()),
    };

    let result = match params.kind.as_deref().unwrap_or("class_averages") {
        "class_averages" => state
            .store
            .class_averages(&filter)
            .await
            .map(|docs| json!(docs)),
        "school_analytics" => state
            .store
            .school_analytics(&filter)
            .await
            .map(|docs| json!(docs)),
        _ => return failure(StatusCode::BAD_REQUEST, "Invalid analytics type"),
    };

    match result {
        Ok(data) => Json(json!({ "success": true, "data": data })).into_response(),
        Err(err) => {
            error!("Analytics API error: {}", err);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch analytics data",
            )
        }
    }
}
