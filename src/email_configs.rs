//! Owner-scoped SMTP configurations

use crate::auth::Principal;
use crate::db::entities::email_configs;
use crate::db::repo::{EmailConfigPatch, NewEmailConfig, Repo};
use crate::error::{AppError, AppResult};
use crate::notifier::Dispatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEmailConfig {
    pub name: String,
    pub smtp_server: String,
    #[serde(default = "default_port")]
    pub smtp_port: i64,
    pub smtp_user: String,
    pub smtp_password: String,
    pub receiver_email: String,
    #[serde(default = "default_true")]
    pub is_ssl: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_port() -> i64 {
    465
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEmailConfig {
    pub name: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<i64>,
    pub smtp_user: Option<String>,
    /// Empty or absent keeps the stored password
    pub smtp_password: Option<String>,
    pub receiver_email: Option<String>,
    pub is_ssl: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailConfigSummary {
    pub id: i32,
    pub name: String,
    pub receiver_email: String,
}

pub struct EmailConfigService {
    repo: Arc<Repo>,
    dispatcher: Arc<Dispatcher>,
}

impl EmailConfigService {
    pub fn new(repo: Arc<Repo>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { repo, dispatcher }
    }

    pub async fn list(&self, principal: &Principal) -> AppResult<Vec<email_configs::Model>> {
        Ok(self.repo.list_email_configs(principal.user_id).await?)
    }

    /// Active configs only, for selection lists
    pub async fn simple_list(&self, principal: &Principal) -> AppResult<Vec<EmailConfigSummary>> {
        let configs = self.repo.list_active_email_configs(principal.user_id).await?;
        Ok(configs
            .into_iter()
            .map(|c| EmailConfigSummary {
                id: c.id,
                name: c.name,
                receiver_email: c.receiver_email,
            })
            .collect())
    }

    pub async fn get(&self, principal: &Principal, id: i32) -> AppResult<email_configs::Model> {
        let config = self
            .repo
            .get_email_config(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Email config {}", id)))?;
        if config.owner_id != principal.user_id {
            return Err(AppError::Forbidden(format!(
                "email config {} belongs to another user",
                id
            )));
        }
        Ok(config)
    }

    pub async fn create(
        &self,
        principal: &Principal,
        input: CreateEmailConfig,
    ) -> AppResult<email_configs::Model> {
        let config = self
            .repo
            .create_email_config(NewEmailConfig {
                owner_id: principal.user_id,
                name: required("name", &input.name)?,
                smtp_server: required("smtp_server", &input.smtp_server)?,
                smtp_port: validate_port(input.smtp_port)?,
                smtp_user: required("smtp_user", &input.smtp_user)?,
                smtp_password: required("smtp_password", &input.smtp_password)?,
                receiver_email: validate_email(&input.receiver_email)?,
                is_ssl: input.is_ssl,
                is_active: input.is_active,
            })
            .await?;
        info!(
            "Email config {} created by user {}",
            config.id, principal.user_id
        );
        Ok(config)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: i32,
        input: UpdateEmailConfig,
    ) -> AppResult<email_configs::Model> {
        self.get(principal, id).await?;

        let patch = EmailConfigPatch {
            name: input.name.as_deref().map(|v| required("name", v)).transpose()?,
            smtp_server: input
                .smtp_server
                .as_deref()
                .map(|v| required("smtp_server", v))
                .transpose()?,
            smtp_port: input.smtp_port.map(validate_port).transpose()?,
            smtp_user: input
                .smtp_user
                .as_deref()
                .map(|v| required("smtp_user", v))
                .transpose()?,
            smtp_password: input.smtp_password.filter(|p| !p.is_empty()),
            receiver_email: input.receiver_email.as_deref().map(validate_email).transpose()?,
            is_ssl: input.is_ssl,
            is_active: input.is_active,
        };

        self.repo
            .update_email_config(id, patch)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Email config {}", id)))
    }

    pub async fn delete(&self, principal: &Principal, id: i32) -> AppResult<()> {
        self.get(principal, id).await?;
        if !self.repo.delete_email_config(id).await? {
            return Err(AppError::not_found(format!("Email config {}", id)));
        }
        info!("Email config {} deleted by user {}", id, principal.user_id);
        Ok(())
    }

    pub async fn test(&self, principal: &Principal, id: i32) -> AppResult<()> {
        let config = self.get(principal, id).await?;
        self.dispatcher.send_test(&config).await
    }
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

fn validate_port(port: i64) -> AppResult<i32> {
    if (1..=65535).contains(&port) {
        Ok(port as i32)
    } else {
        Err(AppError::Validation(format!(
            "smtp_port must be between 1 and 65535, got {}",
            port
        )))
    }
}

fn validate_email(address: &str) -> AppResult<String> {
    let address = address.trim();
    address
        .parse::<lettre::Address>()
        .map(|parsed| parsed.to_string())
        .map_err(|e| {
            AppError::Validation(format!("'{}' is not a valid email address: {}", address, e))
        })
}
