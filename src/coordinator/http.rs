//! HTTP API
//!
//! JSON endpoints for accounts, features and votes, plus `/health` and the
//! Prometheus `/metrics` page. Errors render as `{"detail": "..."}`.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use super::accounts::{Accounts, NewUser};
use super::extract::{FeatureId, JsonBody};
use super::registry::{FeatureRegistry, NewFeature};
use crate::common::auth_middleware::{auth_middleware, AuthExtension};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{MetricsRegistry, Result};
use crate::store::FeaturePatch;

/// Request bodies here are small JSON documents
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FeatureRegistry>,
    pub accounts: Arc<Accounts>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn create_router(state: AppState) -> Router {
    let tokens = state.accounts.tokens().clone();
    let metrics = state.metrics.clone();

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_page))
        // Accounts
        .route("/api/users/register", post(register))
        .route("/api/users/me", get(me))
        .route("/api/token", post(obtain_token))
        .route("/api/token/refresh", post(refresh_token))
        // Features
        .route("/api/features", get(list_features).post(create_feature))
        .route(
            "/api/features/:id",
            get(get_feature)
                .put(update_feature)
                .patch(update_feature)
                .delete(delete_feature),
        )
        // Votes
        .route("/api/features/:id/upvote", post(upvote))
        .route("/api/features/:id/unvote", post(unvote))
        .with_state(state)
        .layer(middleware::from_fn_with_state(tokens, auth_middleware))
        .layer(middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

async fn metrics_page(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

// ============================================================================
// Accounts
// ============================================================================

async fn register(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<NewUser>,
) -> Result<impl IntoResponse> {
    let user = state.accounts.register(input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<impl IntoResponse> {
    let user = state.accounts.me(auth.require()?).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    username: String,
    password: String,
}

async fn obtain_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<TokenRequest>,
) -> Result<impl IntoResponse> {
    let pair = state.accounts.login(&req.username, &req.password).await?;
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh: String,
}

async fn refresh_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> Result<impl IntoResponse> {
    let access = state.accounts.refresh(&req.refresh)?;
    Ok(Json(json!({ "access": access })))
}

// ============================================================================
// Features
// ============================================================================

fn viewer(auth: &AuthExtension) -> Option<Uuid> {
    auth.0.as_ref().map(|ctx| ctx.user_id)
}

async fn list_features(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<impl IntoResponse> {
    let features = state.registry.list(viewer(&auth)).await?;
    Ok(Json(features))
}

async fn create_feature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    JsonBody(input): JsonBody<NewFeature>,
) -> Result<impl IntoResponse> {
    let feature = state.registry.create(auth.require()?, input).await?;
    Ok((StatusCode::CREATED, Json(feature)))
}

async fn get_feature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    FeatureId(id): FeatureId,
) -> Result<impl IntoResponse> {
    let feature = state.registry.get(id, viewer(&auth)).await?;
    Ok(Json(feature))
}

async fn update_feature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    FeatureId(id): FeatureId,
    JsonBody(patch): JsonBody<FeaturePatch>,
) -> Result<impl IntoResponse> {
    let feature = state.registry.update(id, patch, auth.require()?).await?;
    Ok(Json(feature))
}

async fn delete_feature(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    FeatureId(id): FeatureId,
) -> Result<impl IntoResponse> {
    state.registry.delete(id, auth.require()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Votes
// ============================================================================

async fn upvote(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    FeatureId(id): FeatureId,
) -> Result<impl IntoResponse> {
    let vote = state.registry.upvote(auth.require()?, id).await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

async fn unvote(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthExtension>,
    FeatureId(id): FeatureId,
) -> Result<impl IntoResponse> {
    state.registry.unvote(auth.require()?, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
