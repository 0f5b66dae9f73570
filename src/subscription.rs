//! Subscriptions to public tasks and per-user quotas

use crate::db::entities::{email_configs, subscriptions};
use crate::db::repo::{QuotaCheck, Repo};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub current_subscriptions: u64,
    pub max_subscriptions: u32,
    pub remaining_slots: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: subscriptions::Model,
    pub task_name: String,
    pub task_url: String,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicTaskView {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub interval_seconds: i32,
    pub owner_id: i64,
    pub owner_name: Option<String>,
    pub subscription_count: u64,
    pub user_subscribed: bool,
    pub last_check: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleResult {
    pub subscribed: bool,
    pub subscription: subscriptions::Model,
}

pub struct SubscriptionManager {
    repo: Arc<Repo>,
    default_quota: u32,
}

impl SubscriptionManager {
    pub fn new(repo: Arc<Repo>, default_quota: u32) -> Self {
        Self {
            repo,
            default_quota,
        }
    }

    pub async fn quota(&self, user_id: i64) -> AppResult<u32> {
        Ok(self
            .repo
            .get_user_quota(user_id)
            .await?
            .unwrap_or(self.default_quota))
    }

    pub async fn info(&self, user_id: i64) -> AppResult<SubscriptionInfo> {
        let max = self.quota(user_id).await?;
        let current = self.repo.count_active_subscriptions(user_id).await?;
        Ok(SubscriptionInfo {
            current_subscriptions: current,
            max_subscriptions: max,
            remaining_slots: u64::from(max).saturating_sub(current),
        })
    }

    /// Subscribe, unsubscribe or resubscribe depending on the current state
    pub async fn toggle(&self, user_id: i64, task_id: i32) -> AppResult<ToggleResult> {
        self.public_task(task_id).await?;

        let existing = self.repo.find_subscription(user_id, task_id).await?;
        let activate = match &existing {
            Some(sub) => !sub.is_active,
            None => {
                if self.repo.list_email_configs(user_id).await?.is_empty() {
                    return Err(AppError::EmailConfigRequired);
                }
                true
            }
        };

        let subscription = self.save(user_id, task_id, activate, None).await?;
        info!(
            "User {} {} task [{}]",
            user_id,
            if activate { "subscribed to" } else { "unsubscribed from" },
            task_id
        );
        Ok(ToggleResult {
            subscribed: activate,
            subscription,
        })
    }

    /// Subscribe (or resubscribe) with an explicit notification config
    pub async fn subscribe_with_email(
        &self,
        user_id: i64,
        task_id: i32,
        email_config_id: i32,
    ) -> AppResult<subscriptions::Model> {
        self.public_task(task_id).await?;
        self.owned_config(user_id, email_config_id).await?;

        let subscription = self
            .save(user_id, task_id, true, Some(Some(email_config_id)))
            .await?;
        info!(
            "User {} subscribed to task [{}] with email config {}",
            user_id, task_id, email_config_id
        );
        Ok(subscription)
    }

    pub async fn update(
        &self,
        user_id: i64,
        subscription_id: i32,
        is_active: Option<bool>,
        email_config_id: Option<Option<i32>>,
    ) -> AppResult<subscriptions::Model> {
        let sub = self.owned_subscription(user_id, subscription_id).await?;
        if let Some(Some(config_id)) = email_config_id {
            self.owned_config(user_id, config_id).await?;
        }

        let is_active = is_active.unwrap_or(sub.is_active);
        self.save(user_id, sub.task_id, is_active, email_config_id)
            .await
    }

    pub async fn delete(&self, user_id: i64, subscription_id: i32) -> AppResult<()> {
        let sub = self.owned_subscription(user_id, subscription_id).await?;
        self.repo.delete_subscription(sub.id).await?;
        info!("User {} removed subscription {}", user_id, sub.id);
        Ok(())
    }

    pub async fn list(&self, user_id: i64) -> AppResult<Vec<SubscriptionView>> {
        let rows = self.repo.list_subscriptions_by_user(user_id).await?;
        Ok(rows
            .into_iter()
            .map(|(subscription, task)| SubscriptionView {
                subscription,
                task_name: task.name,
                task_url: task.url,
                owner_name: task.owner_name,
            })
            .collect())
    }

    /// Public, active tasks annotated for the viewing user
    pub async fn public_tasks(&self, user_id: i64) -> AppResult<Vec<PublicTaskView>> {
        let tasks = self.repo.list_public_tasks().await?;
        let counts = self.repo.count_active_subscriptions_per_task().await?;
        let subscribed = self.repo.subscribed_task_ids(user_id).await?;

        Ok(tasks
            .into_iter()
            .map(|task| PublicTaskView {
                subscription_count: counts.get(&task.id).copied().unwrap_or(0),
                user_subscribed: subscribed.contains(&task.id),
                id: task.id,
                name: task.name,
                url: task.url,
                interval_seconds: task.interval_seconds,
                owner_id: task.owner_id,
                owner_name: task.owner_name,
                last_check: task.last_check,
            })
            .collect())
    }

    pub async fn set_quota(&self, user_id: i64, max_subscriptions: u32) -> AppResult<SubscriptionInfo> {
        self.repo.set_user_quota(user_id, max_subscriptions).await?;
        info!("Quota of user {} set to {}", user_id, max_subscriptions);
        self.info(user_id).await
    }

    async fn save(
        &self,
        user_id: i64,
        task_id: i32,
        is_active: bool,
        email_config_id: Option<Option<i32>>,
    ) -> AppResult<subscriptions::Model> {
        let max = self.quota(user_id).await?;
        match self
            .repo
            .save_subscription(user_id, task_id, is_active, email_config_id, max)
            .await?
        {
            QuotaCheck::Done(sub) => Ok(sub),
            QuotaCheck::Exceeded => Err(AppError::QuotaExceeded { max }),
        }
    }

    async fn public_task(&self, task_id: i32) -> AppResult<()> {
        let task = self
            .repo
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {}", task_id)))?;
        if !task.is_public {
            return Err(AppError::TaskNotPublic);
        }
        Ok(())
    }

    async fn owned_config(&self, user_id: i64, config_id: i32) -> AppResult<email_configs::Model> {
        let config = self
            .repo
            .get_email_config(config_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Email config {}", config_id)))?;
        if config.owner_id != user_id {
            return Err(AppError::Forbidden(format!(
                "email config {} belongs to another user",
                config_id
            )));
        }
        Ok(config)
    }

    async fn owned_subscription(
        &self,
        user_id: i64,
        subscription_id: i32,
    ) -> AppResult<subscriptions::Model> {
        let sub = self
            .repo
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Subscription {}", subscription_id)))?;
        if sub.subscriber_id != user_id {
            return Err(AppError::Forbidden(format!(
                "subscription {} belongs to another user",
                subscription_id
            )));
        }
        Ok(sub)
    }
}
