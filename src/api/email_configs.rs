//! Handlers for e-mail configurations

use super::{ApiError, ApiState};
use crate::auth::Principal;
use crate::email_configs::{CreateEmailConfig, UpdateEmailConfig};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde_json::json;

pub async fn list_configs(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state.email_configs.list(&user).await?;
    Ok((StatusCode::OK, Json(configs)))
}

pub async fn simple_list(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state.email_configs.simple_list(&user).await?;
    Ok((StatusCode::OK, Json(configs)))
}

pub async fn get_config(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(config_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.email_configs.get(&user, config_id).await?;
    Ok((StatusCode::OK, Json(config)))
}

pub async fn create_config(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Json(payload): Json<CreateEmailConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.email_configs.create(&user, payload).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_config(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(config_id): Path<i32>,
    Json(payload): Json<UpdateEmailConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.email_configs.update(&user, config_id, payload).await?;
    Ok((StatusCode::OK, Json(config)))
}

pub async fn delete_config(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(config_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state.email_configs.delete(&user, config_id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "deleted" }))))
}

/// Checks the SMTP connection, then sends a test mail to the receiver
pub async fn test_config(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(config_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state.email_configs.test(&user, config_id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "sent" }))))
}
