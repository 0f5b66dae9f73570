//! Maps `AppError` onto HTTP responses

use crate::error::AppError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::Validation(_) | AppError::SelectorNotFound(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::DomainBlocked { .. } | AppError::TaskNotPublic | AppError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::QuotaExceeded { .. } => StatusCode::CONFLICT,
            AppError::EmailConfigRequired => StatusCode::BAD_REQUEST,
            AppError::FetchFailed(_) | AppError::Mail(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self.0 {
            AppError::Internal(err) => {
                tracing::error!("Internal server error: {:#}", err);
                "An internal server error occurred".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({ "error": self.0.kind(), "detail": detail });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Validation("x".into()), 422),
            (AppError::DomainBlocked { pattern: "*.x.com".into() }, 403),
            (AppError::Unauthorized("x".into()), 401),
            (AppError::Forbidden("x".into()), 403),
            (AppError::not_found("Task 1"), 404),
            (AppError::QuotaExceeded { max: 1 }, 409),
            (AppError::TaskNotPublic, 403),
            (AppError::EmailConfigRequired, 400),
            (AppError::SelectorNotFound("//p".into()), 422),
            (AppError::FetchFailed("x".into()), 502),
            (AppError::Internal(anyhow::anyhow!("boom")), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status().as_u16(), expected);
        }
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let response = ApiError(AppError::Internal(anyhow::anyhow!("secret db path"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
