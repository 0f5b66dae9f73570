use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use std::collections::{HashMap, HashSet};

use super::entities::{
    blacklist_domains, email_configs, monitor_logs, monitor_tasks, subscriptions, user_quotas,
};

/// Fields of a task to be created
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: i64,
    pub owner_name: Option<String>,
    pub name: String,
    pub url: String,
    pub selector: String,
    pub interval_seconds: i32,
    pub is_active: bool,
    pub is_public: bool,
    pub email_config_id: Option<i32>,
}

/// Partial task update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub interval_seconds: Option<i32>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    pub email_config_id: Option<Option<i32>>,
}

/// Result of one executed check, written by [`Repo::record_check`]
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub check_time: NaiveDateTime,
    pub is_changed: bool,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub error_message: Option<String>,
    /// Digest of the new snapshot; `None` for failed checks, which only touch `last_check`
    pub new_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEmailConfig {
    pub owner_id: i64,
    pub name: String,
    pub smtp_server: String,
    pub smtp_port: i32,
    pub smtp_user: String,
    pub smtp_password: String,
    pub receiver_email: String,
    pub is_ssl: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EmailConfigPatch {
    pub name: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub receiver_email: Option<String>,
    pub is_ssl: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct BlacklistPatch {
    pub domain: Option<String>,
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Outcome of a write that is bounded by the subscriber's quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaCheck<T> {
    Done(T),
    Exceeded,
}

pub struct Repo {
    db: DatabaseConnection,
}

impl Repo {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn ping(&self) -> Result<()> {
        self.db.ping().await.context("Database ping failed")
    }

    // ==================== Tasks ====================

    pub async fn create_task(&self, new: NewTask) -> Result<monitor_tasks::Model> {
        let now = Local::now().naive_local();

        let task = monitor_tasks::ActiveModel {
            owner_id: Set(new.owner_id),
            owner_name: Set(new.owner_name),
            name: Set(new.name),
            url: Set(new.url),
            selector: Set(new.selector),
            interval_seconds: Set(new.interval_seconds),
            is_active: Set(new.is_active),
            is_public: Set(new.is_public),
            email_config_id: Set(new.email_config_id),
            last_check: Set(None),
            last_content_hash: Set(None),
            last_content: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        task.insert(&self.db)
            .await
            .context("Failed to create monitor task")
    }

    pub async fn get_task(&self, task_id: i32) -> Result<Option<monitor_tasks::Model>> {
        monitor_tasks::Entity::find_by_id(task_id)
            .one(&self.db)
            .await
            .context("Failed to get monitor task")
    }

    /// Tasks of one owner, or every task when `owner_id` is `None`
    pub async fn list_tasks(&self, owner_id: Option<i64>) -> Result<Vec<monitor_tasks::Model>> {
        let mut query = monitor_tasks::Entity::find();
        if let Some(owner_id) = owner_id {
            query = query.filter(monitor_tasks::Column::OwnerId.eq(owner_id));
        }
        query
            .order_by_desc(monitor_tasks::Column::CreatedAt)
            .order_by_desc(monitor_tasks::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list monitor tasks")
    }

    pub async fn list_active_tasks(&self) -> Result<Vec<monitor_tasks::Model>> {
        monitor_tasks::Entity::find()
            .filter(monitor_tasks::Column::IsActive.eq(true))
            .order_by_asc(monitor_tasks::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list active monitor tasks")
    }

    pub async fn list_public_tasks(&self) -> Result<Vec<monitor_tasks::Model>> {
        monitor_tasks::Entity::find()
            .filter(monitor_tasks::Column::IsPublic.eq(true))
            .filter(monitor_tasks::Column::IsActive.eq(true))
            .order_by_desc(monitor_tasks::Column::CreatedAt)
            .order_by_desc(monitor_tasks::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list public monitor tasks")
    }

    /// Apply a partial update. Returns `None` if the task does not exist.
    pub async fn update_task(
        &self,
        task_id: i32,
        patch: TaskPatch,
    ) -> Result<Option<monitor_tasks::Model>> {
        let Some(task) = self.get_task(task_id).await? else {
            return Ok(None);
        };

        let mut active: monitor_tasks::ActiveModel = task.into_active_model();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(url) = patch.url {
            active.url = Set(url);
        }
        if let Some(selector) = patch.selector {
            active.selector = Set(selector);
        }
        if let Some(interval) = patch.interval_seconds {
            active.interval_seconds = Set(interval);
        }
        if let Some(is_active) = patch.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_public) = patch.is_public {
            active.is_public = Set(is_public);
        }
        if let Some(email_config_id) = patch.email_config_id {
            active.email_config_id = Set(email_config_id);
        }
        active.updated_at = Set(Local::now().naive_local());

        active
            .update(&self.db)
            .await
            .context("Failed to update monitor task")
            .map(Some)
    }

    /// Delete a task together with its logs and subscriptions.
    /// Returns false if the task did not exist.
    pub async fn delete_task(&self, task_id: i32) -> Result<bool> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin transaction")?;

        monitor_logs::Entity::delete_many()
            .filter(monitor_logs::Column::TaskId.eq(task_id))
            .exec(&txn)
            .await
            .context("Failed to delete task logs")?;

        subscriptions::Entity::delete_many()
            .filter(subscriptions::Column::TaskId.eq(task_id))
            .exec(&txn)
            .await
            .context("Failed to delete task subscriptions")?;

        let result = monitor_tasks::Entity::delete_by_id(task_id)
            .exec(&txn)
            .await
            .context("Failed to delete monitor task")?;

        txn.commit().await.context("Failed to commit transaction")?;

        Ok(result.rows_affected > 0)
    }

    /// Write the log row and the task's snapshot fields in one transaction.
    ///
    /// Returns false, writing nothing, if the task was deleted in the meantime.
    pub async fn record_check(&self, task_id: i32, record: CheckRecord) -> Result<bool> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let Some(task) = monitor_tasks::Entity::find_by_id(task_id)
            .one(&txn)
            .await
            .context("Failed to query monitor task")?
        else {
            txn.rollback().await.context("Failed to roll back")?;
            return Ok(false);
        };

        let log = monitor_logs::ActiveModel {
            task_id: Set(task_id),
            check_time: Set(record.check_time),
            is_changed: Set(record.is_changed),
            old_content: Set(record.old_content),
            new_content: Set(record.new_content.clone()),
            error_message: Set(record.error_message),
            ..Default::default()
        };
        log.insert(&txn)
            .await
            .context("Failed to insert monitor log")?;

        let mut active: monitor_tasks::ActiveModel = task.into_active_model();
        active.last_check = Set(Some(record.check_time));
        if let Some(hash) = record.new_hash {
            active.last_content_hash = Set(Some(hash));
            active.last_content = Set(record.new_content);
        }
        active
            .update(&txn)
            .await
            .context("Failed to update task after check")?;

        txn.commit().await.context("Failed to commit transaction")?;
        Ok(true)
    }

    // ==================== Logs ====================

    /// One page (1-based) of a task's logs, newest first, plus the total count
    pub async fn list_logs(
        &self,
        task_id: i32,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<monitor_logs::Model>, u64)> {
        let paginator = monitor_logs::Entity::find()
            .filter(monitor_logs::Column::TaskId.eq(task_id))
            .order_by_desc(monitor_logs::Column::CheckTime)
            .order_by_desc(monitor_logs::Column::Id)
            .paginate(&self.db, limit.max(1));

        let total = paginator
            .num_items()
            .await
            .context("Failed to count monitor logs")?;
        let logs = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .context("Failed to list monitor logs")?;

        Ok((logs, total))
    }

    /// Most recent logs across one owner's tasks (every task when `owner_id` is `None`)
    pub async fn latest_logs(
        &self,
        owner_id: Option<i64>,
        limit: u64,
    ) -> Result<Vec<(monitor_logs::Model, monitor_tasks::Model)>> {
        let mut query = monitor_logs::Entity::find().find_also_related(monitor_tasks::Entity);
        if let Some(owner_id) = owner_id {
            query = query.filter(monitor_tasks::Column::OwnerId.eq(owner_id));
        }

        query
            .order_by_desc(monitor_logs::Column::CheckTime)
            .order_by_desc(monitor_logs::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .context("Failed to list latest monitor logs")
            .map(|results| {
                results
                    .into_iter()
                    .filter_map(|(log, task)| task.map(|t| (log, t)))
                    .collect()
            })
    }

    // ==================== Email configs ====================

    pub async fn create_email_config(&self, new: NewEmailConfig) -> Result<email_configs::Model> {
        let now = Local::now().naive_local();

        let config = email_configs::ActiveModel {
            owner_id: Set(new.owner_id),
            name: Set(new.name),
            smtp_server: Set(new.smtp_server),
            smtp_port: Set(new.smtp_port),
            smtp_user: Set(new.smtp_user),
            smtp_password: Set(new.smtp_password),
            receiver_email: Set(new.receiver_email),
            is_ssl: Set(new.is_ssl),
            is_active: Set(new.is_active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        config
            .insert(&self.db)
            .await
            .context("Failed to create email config")
    }

    pub async fn get_email_config(&self, config_id: i32) -> Result<Option<email_configs::Model>> {
        email_configs::Entity::find_by_id(config_id)
            .one(&self.db)
            .await
            .context("Failed to get email config")
    }

    pub async fn list_email_configs(&self, owner_id: i64) -> Result<Vec<email_configs::Model>> {
        email_configs::Entity::find()
            .filter(email_configs::Column::OwnerId.eq(owner_id))
            .order_by_asc(email_configs::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list email configs")
    }

    /// Active configs of an owner, lowest id first
    pub async fn list_active_email_configs(
        &self,
        owner_id: i64,
    ) -> Result<Vec<email_configs::Model>> {
        email_configs::Entity::find()
            .filter(email_configs::Column::OwnerId.eq(owner_id))
            .filter(email_configs::Column::IsActive.eq(true))
            .order_by_asc(email_configs::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list active email configs")
    }

    /// Most recently created active config of an owner
    pub async fn latest_active_email_config(
        &self,
        owner_id: i64,
    ) -> Result<Option<email_configs::Model>> {
        email_configs::Entity::find()
            .filter(email_configs::Column::OwnerId.eq(owner_id))
            .filter(email_configs::Column::IsActive.eq(true))
            .order_by_desc(email_configs::Column::CreatedAt)
            .order_by_desc(email_configs::Column::Id)
            .one(&self.db)
            .await
            .context("Failed to get latest active email config")
    }

    pub async fn update_email_config(
        &self,
        config_id: i32,
        patch: EmailConfigPatch,
    ) -> Result<Option<email_configs::Model>> {
        let Some(config) = self.get_email_config(config_id).await? else {
            return Ok(None);
        };

        let mut active: email_configs::ActiveModel = config.into_active_model();
        if let Some(name) = patch.name {
            active.name = Set(name);
        }
        if let Some(server) = patch.smtp_server {
            active.smtp_server = Set(server);
        }
        if let Some(port) = patch.smtp_port {
            active.smtp_port = Set(port);
        }
        if let Some(user) = patch.smtp_user {
            active.smtp_user = Set(user);
        }
        if let Some(password) = patch.smtp_password {
            active.smtp_password = Set(password);
        }
        if let Some(receiver) = patch.receiver_email {
            active.receiver_email = Set(receiver);
        }
        if let Some(is_ssl) = patch.is_ssl {
            active.is_ssl = Set(is_ssl);
        }
        if let Some(is_active) = patch.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Local::now().naive_local());

        active
            .update(&self.db)
            .await
            .context("Failed to update email config")
            .map(Some)
    }

    /// Delete a config and clear every task/subscription reference to it
    pub async fn delete_email_config(&self, config_id: i32) -> Result<bool> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin transaction")?;

        subscriptions::Entity::update_many()
            .col_expr(
                subscriptions::Column::EmailConfigId,
                Expr::value(Option::<i32>::None),
            )
            .filter(subscriptions::Column::EmailConfigId.eq(config_id))
            .exec(&txn)
            .await
            .context("Failed to detach email config from subscriptions")?;

        monitor_tasks::Entity::update_many()
            .col_expr(
                monitor_tasks::Column::EmailConfigId,
                Expr::value(Option::<i32>::None),
            )
            .filter(monitor_tasks::Column::EmailConfigId.eq(config_id))
            .exec(&txn)
            .await
            .context("Failed to detach email config from tasks")?;

        let result = email_configs::Entity::delete_by_id(config_id)
            .exec(&txn)
            .await
            .context("Failed to delete email config")?;

        txn.commit().await.context("Failed to commit transaction")?;

        Ok(result.rows_affected > 0)
    }

    // ==================== Subscriptions ====================

    pub async fn get_subscription(&self, sub_id: i32) -> Result<Option<subscriptions::Model>> {
        subscriptions::Entity::find_by_id(sub_id)
            .one(&self.db)
            .await
            .context("Failed to get subscription")
    }

    pub async fn find_subscription(
        &self,
        subscriber_id: i64,
        task_id: i32,
    ) -> Result<Option<subscriptions::Model>> {
        subscriptions::Entity::find()
            .filter(subscriptions::Column::SubscriberId.eq(subscriber_id))
            .filter(subscriptions::Column::TaskId.eq(task_id))
            .one(&self.db)
            .await
            .context("Failed to find subscription")
    }

    /// Create or update the (subscriber, task) subscription.
    ///
    /// When the write would turn an absent or inactive subscription into an
    /// active one, the subscriber's active count is checked against
    /// `max_active` inside the same transaction.
    pub async fn save_subscription(
        &self,
        subscriber_id: i64,
        task_id: i32,
        is_active: bool,
        email_config_id: Option<Option<i32>>,
        max_active: u32,
    ) -> Result<QuotaCheck<subscriptions::Model>> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let existing = subscriptions::Entity::find()
            .filter(subscriptions::Column::SubscriberId.eq(subscriber_id))
            .filter(subscriptions::Column::TaskId.eq(task_id))
            .one(&txn)
            .await
            .context("Failed to find subscription")?;

        let was_active = existing.as_ref().is_some_and(|s| s.is_active);
        if is_active && !was_active {
            let active_count = count_active_subscriptions(&txn, subscriber_id).await?;
            if active_count >= u64::from(max_active) {
                txn.rollback().await.context("Failed to roll back")?;
                return Ok(QuotaCheck::Exceeded);
            }
        }

        let saved = match existing {
            Some(sub) => {
                let mut active: subscriptions::ActiveModel = sub.into_active_model();
                active.is_active = Set(is_active);
                if let Some(email_config_id) = email_config_id {
                    active.email_config_id = Set(email_config_id);
                }
                active
                    .update(&txn)
                    .await
                    .context("Failed to update subscription")?
            }
            None => {
                let sub = subscriptions::ActiveModel {
                    subscriber_id: Set(subscriber_id),
                    task_id: Set(task_id),
                    is_active: Set(is_active),
                    email_config_id: Set(email_config_id.flatten()),
                    created_at: Set(Local::now().naive_local()),
                    ..Default::default()
                };
                sub.insert(&txn)
                    .await
                    .context("Failed to create subscription")?
            }
        };

        txn.commit().await.context("Failed to commit transaction")?;
        Ok(QuotaCheck::Done(saved))
    }

    /// Subscriptions of a user joined with their tasks
    pub async fn list_subscriptions_by_user(
        &self,
        subscriber_id: i64,
    ) -> Result<Vec<(subscriptions::Model, monitor_tasks::Model)>> {
        subscriptions::Entity::find()
            .filter(subscriptions::Column::SubscriberId.eq(subscriber_id))
            .order_by_desc(subscriptions::Column::CreatedAt)
            .order_by_desc(subscriptions::Column::Id)
            .find_also_related(monitor_tasks::Entity)
            .all(&self.db)
            .await
            .context("Failed to list subscriptions by user")
            .map(|results| {
                results
                    .into_iter()
                    .filter_map(|(sub, task)| task.map(|t| (sub, t)))
                    .collect()
            })
    }

    pub async fn list_active_subscriptions_by_task(
        &self,
        task_id: i32,
    ) -> Result<Vec<subscriptions::Model>> {
        subscriptions::Entity::find()
            .filter(subscriptions::Column::TaskId.eq(task_id))
            .filter(subscriptions::Column::IsActive.eq(true))
            .order_by_asc(subscriptions::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list subscriptions by task")
    }

    pub async fn count_active_subscriptions(&self, subscriber_id: i64) -> Result<u64> {
        count_active_subscriptions(&self.db, subscriber_id).await
    }

    /// Active subscriber count per task
    pub async fn count_active_subscriptions_per_task(&self) -> Result<HashMap<i32, u64>> {
        #[derive(FromQueryResult)]
        struct TaskCount {
            task_id: i32,
            count: i64,
        }

        let rows = subscriptions::Entity::find()
            .select_only()
            .column(subscriptions::Column::TaskId)
            .column_as(Expr::col(subscriptions::Column::Id).count(), "count")
            .filter(subscriptions::Column::IsActive.eq(true))
            .group_by(subscriptions::Column::TaskId)
            .into_model::<TaskCount>()
            .all(&self.db)
            .await
            .context("Failed to count subscriptions per task")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.task_id, r.count.max(0) as u64))
            .collect())
    }

    /// Ids of the tasks a user is actively subscribed to
    pub async fn subscribed_task_ids(&self, subscriber_id: i64) -> Result<HashSet<i32>> {
        let subs = subscriptions::Entity::find()
            .filter(subscriptions::Column::SubscriberId.eq(subscriber_id))
            .filter(subscriptions::Column::IsActive.eq(true))
            .all(&self.db)
            .await
            .context("Failed to list subscribed tasks")?;
        Ok(subs.into_iter().map(|s| s.task_id).collect())
    }

    pub async fn delete_subscription(&self, sub_id: i32) -> Result<bool> {
        let result = subscriptions::Entity::delete_by_id(sub_id)
            .exec(&self.db)
            .await
            .context("Failed to delete subscription")?;
        Ok(result.rows_affected > 0)
    }

    // ==================== Quotas ====================

    pub async fn get_user_quota(&self, user_id: i64) -> Result<Option<u32>> {
        let quota = user_quotas::Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .context("Failed to get user quota")?;
        Ok(quota.map(|q| q.max_subscriptions.max(0) as u32))
    }

    /// Set a user's quota override (atomic upsert)
    pub async fn set_user_quota(
        &self,
        user_id: i64,
        max_subscriptions: u32,
    ) -> Result<user_quotas::Model> {
        let quota = user_quotas::ActiveModel {
            user_id: Set(user_id),
            max_subscriptions: Set(i32::try_from(max_subscriptions).unwrap_or(i32::MAX)),
            updated_at: Set(Local::now().naive_local()),
        };

        // INSERT ... ON CONFLICT(user_id) DO UPDATE
        user_quotas::Entity::insert(quota)
            .on_conflict(
                OnConflict::column(user_quotas::Column::UserId)
                    .update_columns([
                        user_quotas::Column::MaxSubscriptions,
                        user_quotas::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .context("Failed to upsert user quota")?;

        user_quotas::Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .context("Failed to fetch upserted user quota")?
            .ok_or_else(|| anyhow::anyhow!("Quota for user {} not found after upsert", user_id))
    }

    // ==================== Blacklist ====================

    pub async fn list_blacklist(&self) -> Result<Vec<blacklist_domains::Model>> {
        blacklist_domains::Entity::find()
            .order_by_asc(blacklist_domains::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list blacklist domains")
    }

    pub async fn list_active_blacklist_patterns(&self) -> Result<Vec<String>> {
        let rows = blacklist_domains::Entity::find()
            .filter(blacklist_domains::Column::IsActive.eq(true))
            .order_by_asc(blacklist_domains::Column::Id)
            .all(&self.db)
            .await
            .context("Failed to list active blacklist domains")?;
        Ok(rows.into_iter().map(|r| r.domain).collect())
    }

    pub async fn find_blacklist_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<blacklist_domains::Model>> {
        blacklist_domains::Entity::find()
            .filter(blacklist_domains::Column::Domain.eq(domain))
            .one(&self.db)
            .await
            .context("Failed to find blacklist domain")
    }

    pub async fn create_blacklist_domain(
        &self,
        domain: String,
        description: Option<String>,
        is_active: bool,
    ) -> Result<blacklist_domains::Model> {
        let row = blacklist_domains::ActiveModel {
            domain: Set(domain),
            description: Set(description),
            is_active: Set(is_active),
            created_at: Set(Local::now().naive_local()),
            ..Default::default()
        };
        row.insert(&self.db)
            .await
            .context("Failed to create blacklist domain")
    }

    pub async fn update_blacklist_domain(
        &self,
        id: i32,
        patch: BlacklistPatch,
    ) -> Result<Option<blacklist_domains::Model>> {
        let Some(row) = blacklist_domains::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("Failed to get blacklist domain")?
        else {
            return Ok(None);
        };

        let mut active: blacklist_domains::ActiveModel = row.into_active_model();
        if let Some(domain) = patch.domain {
            active.domain = Set(domain);
        }
        if let Some(description) = patch.description {
            active.description = Set(description);
        }
        if let Some(is_active) = patch.is_active {
            active.is_active = Set(is_active);
        }

        active
            .update(&self.db)
            .await
            .context("Failed to update blacklist domain")
            .map(Some)
    }

    pub async fn delete_blacklist_domain(&self, id: i32) -> Result<bool> {
        let result = blacklist_domains::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .context("Failed to delete blacklist domain")?;
        Ok(result.rows_affected > 0)
    }
}

async fn count_active_subscriptions<C: ConnectionTrait>(db: &C, subscriber_id: i64) -> Result<u64> {
    subscriptions::Entity::find()
        .filter(subscriptions::Column::SubscriberId.eq(subscriber_id))
        .filter(subscriptions::Column::IsActive.eq(true))
        .count(db)
        .await
        .context("Failed to count active subscriptions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_repo;
    use chrono::Duration;

    fn new_task(owner_id: i64) -> NewTask {
        NewTask {
            owner_id,
            owner_name: Some(format!("user{}", owner_id)),
            name: "Prices".to_string(),
            url: "https://example.com/prices".to_string(),
            selector: "//div[@id='price']".to_string(),
            interval_seconds: 60,
            is_active: true,
            is_public: true,
            email_config_id: None,
        }
    }

    fn new_config(owner_id: i64, name: &str) -> NewEmailConfig {
        NewEmailConfig {
            owner_id,
            name: name.to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 465,
            smtp_user: "bot@example.com".to_string(),
            smtp_password: "pw".to_string(),
            receiver_email: format!("{}@example.com", name),
            is_ssl: true,
            is_active: true,
        }
    }

    fn success(at: NaiveDateTime, content: &str, hash: &str, changed: bool) -> CheckRecord {
        CheckRecord {
            check_time: at,
            is_changed: changed,
            old_content: None,
            new_content: Some(content.to_string()),
            error_message: None,
            new_hash: Some(hash.to_string()),
        }
    }

    #[tokio::test]
    async fn test_record_check_updates_snapshot() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(1)).await.unwrap();
        let now = Local::now().naive_local();

        assert!(repo
            .record_check(task.id, success(now, "a", "h1", false))
            .await
            .unwrap());

        let task = repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.last_content_hash.as_deref(), Some("h1"));
        assert_eq!(task.last_content.as_deref(), Some("a"));
        assert_eq!(task.last_check, Some(now));
    }

    #[tokio::test]
    async fn test_failed_check_keeps_hash() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(1)).await.unwrap();
        let t0 = Local::now().naive_local();
        repo.record_check(task.id, success(t0, "a", "h1", false))
            .await
            .unwrap();

        let t1 = t0 + Duration::seconds(60);
        let failed = CheckRecord {
            check_time: t1,
            is_changed: false,
            old_content: None,
            new_content: None,
            error_message: Some("timeout".to_string()),
            new_hash: None,
        };
        repo.record_check(task.id, failed).await.unwrap();

        let task = repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.last_content_hash.as_deref(), Some("h1"));
        assert_eq!(task.last_check, Some(t1));

        let (logs, total) = repo.list_logs(task.id, 1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(logs[0].error_message.as_deref(), Some("timeout"));
        assert!(!logs[0].is_changed);
    }

    #[tokio::test]
    async fn test_record_check_for_deleted_task_writes_nothing() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(1)).await.unwrap();
        assert!(repo.delete_task(task.id).await.unwrap());

        let written = repo
            .record_check(task.id, success(Local::now().naive_local(), "a", "h", false))
            .await
            .unwrap();
        assert!(!written);
        let (logs, total) = repo.list_logs(task.id, 1, 10).await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_logs_paginate_newest_first() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(1)).await.unwrap();
        let t0 = Local::now().naive_local();
        for i in 0..5 {
            let at = t0 + Duration::seconds(i);
            repo.record_check(task.id, success(at, &i.to_string(), "h", false))
                .await
                .unwrap();
        }

        let (page1, total) = repo.list_logs(task.id, 1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].new_content.as_deref(), Some("4"));
        assert_eq!(page1[1].new_content.as_deref(), Some("3"));

        let (page3, _) = repo.list_logs(task.id, 3, 2).await.unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(page3[0].new_content.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(1)).await.unwrap();
        repo.record_check(task.id, success(Local::now().naive_local(), "a", "h", false))
            .await
            .unwrap();
        repo.save_subscription(2, task.id, true, None, 10)
            .await
            .unwrap();

        assert!(repo.delete_task(task.id).await.unwrap());
        assert!(repo.get_task(task.id).await.unwrap().is_none());
        assert!(repo.find_subscription(2, task.id).await.unwrap().is_none());
        assert!(repo.latest_logs(None, 10).await.unwrap().is_empty());
        assert!(!repo.delete_task(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_logs_scoped_to_owner() {
        let repo = test_repo().await;
        let mine = repo.create_task(new_task(1)).await.unwrap();
        let theirs = repo.create_task(new_task(2)).await.unwrap();
        let now = Local::now().naive_local();
        repo.record_check(mine.id, success(now, "m", "h", false))
            .await
            .unwrap();
        repo.record_check(theirs.id, success(now, "t", "h", false))
            .await
            .unwrap();

        let logs = repo.latest_logs(Some(1), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1.id, mine.id);
        assert_eq!(repo.latest_logs(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_email_config_detaches_references() {
        let repo = test_repo().await;
        let config = repo.create_email_config(new_config(1, "a")).await.unwrap();
        let mut task = new_task(1);
        task.email_config_id = Some(config.id);
        let task = repo.create_task(task).await.unwrap();
        repo.save_subscription(1, task.id, true, Some(Some(config.id)), 10)
            .await
            .unwrap();

        assert!(repo.delete_email_config(config.id).await.unwrap());

        let task = repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.email_config_id, None);
        let sub = repo.find_subscription(1, task.id).await.unwrap().unwrap();
        assert_eq!(sub.email_config_id, None);
        assert!(sub.is_active);
    }

    #[tokio::test]
    async fn test_save_subscription_enforces_quota() {
        let repo = test_repo().await;
        let t1 = repo.create_task(new_task(9)).await.unwrap();
        let t2 = repo.create_task(new_task(9)).await.unwrap();

        assert!(matches!(
            repo.save_subscription(1, t1.id, true, None, 1).await.unwrap(),
            QuotaCheck::Done(_)
        ));
        assert_eq!(
            repo.save_subscription(1, t2.id, true, None, 1).await.unwrap(),
            QuotaCheck::Exceeded
        );
        assert!(repo.find_subscription(1, t2.id).await.unwrap().is_none());

        // Re-saving an already active subscription does not count against the quota
        assert!(matches!(
            repo.save_subscription(1, t1.id, true, None, 1).await.unwrap(),
            QuotaCheck::Done(_)
        ));

        // Deactivation is always allowed and frees a slot
        repo.save_subscription(1, t1.id, false, None, 1)
            .await
            .unwrap();
        assert!(matches!(
            repo.save_subscription(1, t2.id, true, None, 1).await.unwrap(),
            QuotaCheck::Done(_)
        ));
        assert_eq!(repo.count_active_subscriptions(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscription_counts_per_task() {
        let repo = test_repo().await;
        let task = repo.create_task(new_task(9)).await.unwrap();
        repo.save_subscription(1, task.id, true, None, 10)
            .await
            .unwrap();
        repo.save_subscription(2, task.id, true, None, 10)
            .await
            .unwrap();
        repo.save_subscription(3, task.id, false, None, 10)
            .await
            .unwrap();

        let counts = repo.count_active_subscriptions_per_task().await.unwrap();
        assert_eq!(counts.get(&task.id), Some(&2));
        assert!(repo.subscribed_task_ids(1).await.unwrap().contains(&task.id));
        assert!(!repo.subscribed_task_ids(3).await.unwrap().contains(&task.id));
    }

    #[tokio::test]
    async fn test_user_quota_upsert() {
        let repo = test_repo().await;
        assert_eq!(repo.get_user_quota(5).await.unwrap(), None);
        repo.set_user_quota(5, 3).await.unwrap();
        repo.set_user_quota(5, 7).await.unwrap();
        assert_eq!(repo.get_user_quota(5).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_latest_active_email_config() {
        let repo = test_repo().await;
        let first = repo.create_email_config(new_config(1, "a")).await.unwrap();
        let second = repo.create_email_config(new_config(1, "b")).await.unwrap();
        let mut inactive = new_config(1, "c");
        inactive.is_active = false;
        repo.create_email_config(inactive).await.unwrap();

        let latest = repo.latest_active_email_config(1).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        let active = repo.list_active_email_configs(1).await.unwrap();
        assert_eq!(active.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }
}
