use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain is blacklisted: {pattern}")]
    DomainBlocked { pattern: String },

    #[error("Selector matched nothing: {0}")]
    SelectorNotFound(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Subscription quota exceeded ({max} allowed)")]
    QuotaExceeded { max: u32 },

    #[error("Task is not public")]
    TaskNotPublic,

    #[error("An active email configuration is required to subscribe")]
    EmailConfigRequired,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short machine-readable kind used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DomainBlocked { .. } => "domain_blocked",
            AppError::SelectorNotFound(_) => "selector_not_found",
            AppError::FetchFailed(_) => "fetch_failed",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::TaskNotPublic => "task_not_public",
            AppError::EmailConfigRequired => "email_config_required",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation_error",
            AppError::Mail(_) => "mail_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }
}

impl From<page_client::Error> for AppError {
    fn from(e: page_client::Error) -> Self {
        match e {
            page_client::Error::SelectorNotFound(selector) => AppError::SelectorNotFound(selector),
            page_client::Error::InvalidSelector(msg) => {
                AppError::Validation(format!("invalid selector: {}", msg))
            }
            other => AppError::FetchFailed(other.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(e: sea_orm::DbErr) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
