//! Handlers for public tasks and subscriptions

use super::{ApiError, ApiState};
use crate::auth::Principal;
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
pub struct SubscribeWithEmail {
    pub email_config_id: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscription {
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub email_config_id: Option<Option<i32>>,
}

pub async fn public_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.subscriptions.public_tasks(user.user_id).await?;
    Ok((StatusCode::OK, Json(tasks)))
}

pub async fn subscription_info(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.subscriptions.info(user.user_id).await?;
    Ok((StatusCode::OK, Json(info)))
}

pub async fn toggle(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.subscriptions.toggle(user.user_id, task_id).await?;
    Ok((StatusCode::OK, Json(result)))
}

pub async fn subscribe_with_email(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
    Json(payload): Json<SubscribeWithEmail>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .subscriptions
        .subscribe_with_email(user.user_id, task_id, payload.email_config_id)
        .await?;
    Ok((StatusCode::OK, Json(subscription)))
}

pub async fn list_subscriptions(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let subscriptions = state.subscriptions.list(user.user_id).await?;
    Ok((StatusCode::OK, Json(subscriptions)))
}

pub async fn update_subscription(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(subscription_id): Path<i32>,
    Json(payload): Json<UpdateSubscription>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .subscriptions
        .update(
            user.user_id,
            subscription_id,
            payload.is_active,
            payload.email_config_id,
        )
        .await?;
    Ok((StatusCode::OK, Json(subscription)))
}

pub async fn delete_subscription(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(subscription_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .subscriptions
        .delete(user.user_id, subscription_id)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "status": "unsubscribed" }))))
}
