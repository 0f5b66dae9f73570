//! Administrator endpoints: domain blacklist and subscription quotas

use super::{ApiError, ApiState};
use crate::auth::Principal;
use crate::db::repo::BlacklistPatch;
use crate::tasks::double_option;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreateBlacklistDomain {
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBlacklistDomain {
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SetQuota {
    pub max_subscriptions: u32,
}

pub async fn list_blacklist(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_admin()?;
    let domains = state.filter.list().await?;
    Ok((StatusCode::OK, Json(domains)))
}

pub async fn create_blacklist(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Json(payload): Json<CreateBlacklistDomain>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_admin()?;
    let row = state
        .filter
        .create(&payload.domain, payload.description, payload.is_active)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update_blacklist(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateBlacklistDomain>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_admin()?;
    let patch = BlacklistPatch {
        domain: payload.domain,
        description: payload.description,
        is_active: payload.is_active,
    };
    let row = state.filter.update(id, patch).await?;
    Ok((StatusCode::OK, Json(row)))
}

pub async fn delete_blacklist(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_admin()?;
    state.filter.delete(id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "deleted" }))))
}

pub async fn set_user_quota(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(user_id): Path<i64>,
    Json(payload): Json<SetQuota>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_admin()?;
    let info = state
        .subscriptions
        .set_quota(user_id, payload.max_subscriptions)
        .await?;
    Ok((StatusCode::OK, Json(info)))
}
