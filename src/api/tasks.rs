//! Handlers for monitor tasks and their logs

use super::{ApiError, ApiState};
use crate::auth::Principal;
use crate::tasks::{CreateTask, UpdateTask};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<u64>,
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.tasks.list(&user).await?;
    Ok((StatusCode::OK, Json(tasks)))
}

pub async fn get_task(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.tasks.get(&user, task_id).await?;
    Ok((StatusCode::OK, Json(task)))
}

pub async fn create_task(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Json(payload): Json<CreateTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.tasks.create(&user, payload).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
    Json(payload): Json<UpdateTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.tasks.update(&user, task_id, payload).await?;
    Ok((StatusCode::OK, Json(task)))
}

pub async fn delete_task(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state.tasks.delete(&user, task_id).await?;
    Ok((StatusCode::OK, Json(json!({ "status": "deleted" }))))
}

/// Fetches the page once and returns what the selector extracts
pub async fn test_task(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.tasks.test(&user, task_id).await?;
    Ok((StatusCode::OK, Json(result)))
}

pub async fn task_logs(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Path(task_id): Path<i32>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state
        .tasks
        .logs(&user, task_id, query.page, query.limit)
        .await?;
    Ok((StatusCode::OK, Json(logs)))
}

pub async fn latest_logs(
    State(state): State<ApiState>,
    Extension(user): Extension<Principal>,
    Query(query): Query<LatestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.tasks.latest_logs(&user, query.limit).await?;
    Ok((StatusCode::OK, Json(logs)))
}
