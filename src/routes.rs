use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::AppResult;
use crate::models::{GenerateRequest, Presets, RunSnapshot};
use crate::orchestrator::{ImageReport, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/presets", get(get_presets))
        .route("/api/run", get(get_run))
        .route("/api/run/generate", post(generate))
        .route("/api/run/images", post(regenerate_missing_images))
        .route("/api/run/concepts/:index/image", post(generate_image_for))
        .route("/api/run/reset", post(reset))
        .route("/api/run/error/dismiss", post(dismiss_error))
        .route("/api/run/archive", get(download_archive))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([header::CONTENT_DISPOSITION]),
        )
        .with_state(state)
}

pub async fn get_presets() -> Json<Presets> {
    Json(Presets::default())
}

pub async fn get_run(State(state): State<AppState>) -> Json<RunSnapshot> {
    Json(state.orchestrator.snapshot())
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateRequest>) -> AppResult<Json<RunSnapshot>> {
    tracing::info!("🧵 Generate requested: {} references, mode {:?}", body.images.len(), body.mode);
    Ok(Json(state.orchestrator.generate(body).await?))
}

pub async fn regenerate_missing_images(State(state): State<AppState>) -> AppResult<(StatusCode, Json<RunSnapshot>)> {
    state.orchestrator.regenerate_missing_images()?;
    Ok((StatusCode::ACCEPTED, Json(state.orchestrator.snapshot())))
}

pub async fn generate_image_for(Path(index): Path<usize>, State(state): State<AppState>) -> AppResult<Json<ImageReport>> {
    tracing::info!("🎯 Image requested for concept index {}", index);
    Ok(Json(state.orchestrator.generate_image_for(index).await?))
}

pub async fn reset(State(state): State<AppState>) -> Json<RunSnapshot> {
    state.orchestrator.reset();
    Json(state.orchestrator.snapshot())
}

pub async fn dismiss_error(State(state): State<AppState>) -> Json<RunSnapshot> {
    state.orchestrator.dismiss_error();
    Json(state.orchestrator.snapshot())
}

pub async fn download_archive(State(state): State<AppState>) -> AppResult<Response> {
    let archive = state.orchestrator.export_archive().await?;
    let disposition = format!("attachment; filename=\"{}\"", archive.filename);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/zip".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        archive.bytes,
    )
        .into_response())
}
