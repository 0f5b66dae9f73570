//! Monitor task management: validation, blacklist gate, scheduler sync, manual test

use crate::auth::Principal;
use crate::blacklist::DomainFilter;
use crate::db::entities::{monitor_logs, monitor_tasks};
use crate::db::repo::{NewTask, Repo, TaskPatch};
use crate::error::{AppError, AppResult};
use crate::scheduler::SchedulerEngine;
use page_client::{Locator, PageClient};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_LOG_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub name: String,
    pub url: String,
    pub selector: String,
    pub interval_seconds: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub email_config_id: Option<i32>,
}

fn default_true() -> bool {
    true
}

/// Partial update; absent fields keep their value, `email_config_id: null` clears it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    pub name: Option<String>,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub interval_seconds: Option<i64>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub email_config_id: Option<Option<i32>>,
}

/// Distinguishes an explicit `null` from a missing field
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub content: String,
    pub title: Option<String>,
    pub url: String,
    pub final_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub items: Vec<monitor_logs::Model>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestLog {
    #[serde(flatten)]
    pub log: monitor_logs::Model,
    pub task_name: String,
}

pub struct TaskService {
    repo: Arc<Repo>,
    filter: Arc<DomainFilter>,
    scheduler: SchedulerEngine,
    client: PageClient,
    intervals: RangeInclusive<u64>,
    fetch_timeout: Duration,
}

impl TaskService {
    pub fn new(
        repo: Arc<Repo>,
        filter: Arc<DomainFilter>,
        scheduler: SchedulerEngine,
        client: PageClient,
        intervals: RangeInclusive<u64>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            filter,
            scheduler,
            client,
            intervals,
            fetch_timeout,
        }
    }

    /// Own tasks; admins see every task
    pub async fn list(&self, principal: &Principal) -> AppResult<Vec<monitor_tasks::Model>> {
        let owner = (!principal.is_admin).then_some(principal.user_id);
        Ok(self.repo.list_tasks(owner).await?)
    }

    pub async fn get(&self, principal: &Principal, task_id: i32) -> AppResult<monitor_tasks::Model> {
        let task = self
            .repo
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {}", task_id)))?;
        if !principal.can_access(task.owner_id) {
            return Err(AppError::Forbidden(format!(
                "task {} belongs to another user",
                task_id
            )));
        }
        Ok(task)
    }

    pub async fn create(
        &self,
        principal: &Principal,
        input: CreateTask,
    ) -> AppResult<monitor_tasks::Model> {
        let name = validate_name(&input.name)?;
        let url = validate_url(&input.url)?;
        let selector = validate_selector(&input.selector)?;
        let interval = self.validate_interval(input.interval_seconds)?;
        if let Some(config_id) = input.email_config_id {
            self.check_email_config(principal.user_id, config_id).await?;
        }
        self.filter.ensure_allowed(&url, principal.is_admin).await?;

        let task = self
            .repo
            .create_task(NewTask {
                owner_id: principal.user_id,
                owner_name: Some(principal.username.clone()),
                name,
                url,
                selector,
                interval_seconds: interval,
                is_active: input.is_active,
                is_public: input.is_public,
                email_config_id: input.email_config_id,
            })
            .await?;

        self.scheduler.sync_task(&task).await;
        info!(
            "✅ Task [{}] {} created by {} ({}s)",
            task.id, task.name, principal.username, task.interval_seconds
        );
        Ok(task)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        task_id: i32,
        input: UpdateTask,
    ) -> AppResult<monitor_tasks::Model> {
        let current = self.get(principal, task_id).await?;

        let mut patch = TaskPatch {
            is_active: input.is_active,
            is_public: input.is_public,
            ..Default::default()
        };
        if let Some(name) = &input.name {
            patch.name = Some(validate_name(name)?);
        }
        if let Some(selector) = &input.selector {
            patch.selector = Some(validate_selector(selector)?);
        }
        if let Some(interval) = input.interval_seconds {
            patch.interval_seconds = Some(self.validate_interval(interval)?);
        }
        if let Some(url) = &input.url {
            let url = validate_url(url)?;
            if url != current.url {
                self.filter.ensure_allowed(&url, principal.is_admin).await?;
            }
            patch.url = Some(url);
        }
        if let Some(email_config_id) = input.email_config_id {
            if let Some(config_id) = email_config_id {
                self.check_email_config(current.owner_id, config_id).await?;
            }
            patch.email_config_id = Some(email_config_id);
        }

        let task = self
            .repo
            .update_task(task_id, patch)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {}", task_id)))?;

        self.scheduler.sync_task(&task).await;
        info!("Task [{}] updated", task.id);
        Ok(task)
    }

    pub async fn delete(&self, principal: &Principal, task_id: i32) -> AppResult<()> {
        let task = self.get(principal, task_id).await?;

        self.scheduler.unschedule(task.id).await;
        if !self.repo.delete_task(task.id).await? {
            return Err(AppError::not_found(format!("Task {}", task_id)));
        }
        info!("🗑️  Task [{}] {} deleted", task.id, task.name);
        Ok(())
    }

    /// Fetch the task's page once. Nothing is persisted and nobody is notified.
    pub async fn test(&self, principal: &Principal, task_id: i32) -> AppResult<TestResult> {
        let task = self.get(principal, task_id).await?;
        self.filter
            .ensure_allowed(&task.url, principal.is_admin)
            .await?;

        let page = self
            .client
            .fetch(&task.url, &task.selector, Some(self.fetch_timeout))
            .await?;

        Ok(TestResult {
            content: page.content,
            title: page.title,
            url: task.url,
            final_url: page.final_url,
        })
    }

    pub async fn logs(
        &self,
        principal: &Principal,
        task_id: i32,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> AppResult<LogPage> {
        let task = self.get(principal, task_id).await?;
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(20).clamp(1, MAX_LOG_PAGE_SIZE);

        let (items, total) = self.repo.list_logs(task.id, page, limit).await?;
        Ok(LogPage {
            items,
            total,
            page,
            limit,
        })
    }

    pub async fn latest_logs(
        &self,
        principal: &Principal,
        limit: Option<u64>,
    ) -> AppResult<Vec<LatestLog>> {
        let owner = (!principal.is_admin).then_some(principal.user_id);
        let limit = limit.unwrap_or(10).clamp(1, MAX_LOG_PAGE_SIZE);

        let rows = self.repo.latest_logs(owner, limit).await?;
        Ok(rows
            .into_iter()
            .map(|(log, task)| LatestLog {
                log,
                task_name: task.name,
            })
            .collect())
    }

    fn validate_interval(&self, seconds: i64) -> AppResult<i32> {
        let valid = u64::try_from(seconds)
            .ok()
            .filter(|s| self.intervals.contains(s))
            .and_then(|s| i32::try_from(s).ok());
        valid.ok_or_else(|| {
            AppError::Validation(format!(
                "interval_seconds must be between {} and {}",
                self.intervals.start(),
                self.intervals.end()
            ))
        })
    }

    async fn check_email_config(&self, owner_id: i64, config_id: i32) -> AppResult<()> {
        let config = self
            .repo
            .get_email_config(config_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Email config {}", config_id)))?;
        if config.owner_id != owner_id {
            return Err(AppError::Forbidden(format!(
                "email config {} belongs to another user",
                config_id
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn validate_url(url: &str) -> AppResult<String> {
    PageClient::parse_url(url)
        .map(|_| url.trim().to_string())
        .map_err(|e| AppError::Validation(e.to_string()))
}

fn validate_selector(selector: &str) -> AppResult<String> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(AppError::Validation("selector must not be empty".to_string()));
    }
    Locator::parse(selector).map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(selector.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_repo;
    use crate::notifier::testing::RecordingMailer;
    use crate::notifier::Dispatcher;
    use crate::scheduler::{CycleRunner, TaskState};
    use crate::scheduler::cycle_testing::FakeRenderer;

    struct Fixture {
        repo: Arc<Repo>,
        renderer: Arc<FakeRenderer>,
        filter: Arc<DomainFilter>,
        scheduler: SchedulerEngine,
        mailer: Arc<RecordingMailer>,
        service: TaskService,
    }

    async fn fixture() -> Fixture {
        let repo = test_repo().await;
        let renderer = Arc::new(FakeRenderer::new("hello"));
        let mailer = Arc::new(RecordingMailer::default());
        let client = PageClient::new(renderer.clone(), 2, Duration::from_secs(5));
        let dispatcher = Arc::new(Dispatcher::new(repo.clone(), mailer.clone()));
        let runner = Arc::new(CycleRunner::new(
            repo.clone(),
            client.clone(),
            dispatcher,
            Duration::from_secs(5),
            2000,
        ));
        let scheduler = SchedulerEngine::new(repo.clone(), runner, Duration::ZERO);
        let filter = Arc::new(DomainFilter::new(repo.clone()));
        let service = TaskService::new(
            repo.clone(),
            filter.clone(),
            scheduler.clone(),
            client,
            10..=86400,
            Duration::from_secs(5),
        );
        Fixture {
            repo,
            renderer,
            filter,
            scheduler,
            mailer,
            service,
        }
    }

    fn user(id: i64) -> Principal {
        Principal {
            user_id: id,
            username: format!("user{}", id),
            is_admin: false,
        }
    }

    fn admin() -> Principal {
        Principal {
            user_id: 999,
            username: "root".to_string(),
            is_admin: true,
        }
    }

    fn input(url: &str, interval: i64) -> CreateTask {
        CreateTask {
            name: "Watch".to_string(),
            url: url.to_string(),
            selector: "//div[@id='content']".to_string(),
            interval_seconds: interval,
            is_active: true,
            is_public: false,
            email_config_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_validates_and_schedules() {
        let f = fixture().await;
        let task = f
            .service
            .create(&user(1), input("https://example.com/a", 60))
            .await
            .unwrap();
        assert_eq!(task.owner_name.as_deref(), Some("user1"));
        assert_eq!(f.scheduler.state(task.id).await, TaskState::Scheduled);

        for bad in [input("https://example.com", 5), input("https://example.com", 86401)] {
            assert!(matches!(
                f.service.create(&user(1), bad).await,
                Err(AppError::Validation(_))
            ));
        }
        assert!(matches!(
            f.service.create(&user(1), input("ftp://example.com", 60)).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_selector = input("https://example.com", 60);
        bad_selector.selector = "//div[".to_string();
        assert!(matches!(
            f.service.create(&user(1), bad_selector).await,
            Err(AppError::Validation(_))
        ));
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_blacklist_applies_to_users_not_admins() {
        let f = fixture().await;
        f.filter.create("*.blocked.com", None, true).await.unwrap();

        assert!(matches!(
            f.service
                .create(&user(1), input("https://www.blocked.com/x", 60))
                .await,
            Err(AppError::DomainBlocked { .. })
        ));
        let task = f
            .service
            .create(&admin(), input("https://www.blocked.com/x", 60))
            .await
            .unwrap();
        assert!(task.is_active);

        // Moving an existing task onto a blocked host is rejected too
        let own = f
            .service
            .create(&user(1), input("https://fine.org", 60))
            .await
            .unwrap();
        let moved = f
            .service
            .update(
                &user(1),
                own.id,
                UpdateTask {
                    url: Some("https://blocked.com".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(moved, Err(AppError::DomainBlocked { .. })));
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_reschedules_and_disables() {
        let f = fixture().await;
        let task = f
            .service
            .create(&user(1), input("https://example.com", 60))
            .await
            .unwrap();

        let task = f
            .service
            .update(
                &user(1),
                task.id,
                UpdateTask {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!task.is_active);
        assert_eq!(f.scheduler.state(task.id).await, TaskState::Disabled);

        assert!(matches!(
            f.service
                .update(&user(2), task.id, UpdateTask::default())
                .await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_unschedules_and_cascades() {
        let f = fixture().await;
        let task = f
            .service
            .create(&user(1), input("https://example.com", 60))
            .await
            .unwrap();

        f.service.delete(&user(1), task.id).await.unwrap();
        assert_eq!(f.scheduler.state(task.id).await, TaskState::Unscheduled);
        assert!(f.repo.get_task(task.id).await.unwrap().is_none());
        assert!(matches!(
            f.service.delete(&user(1), task.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_test_writes_nothing() {
        let f = fixture().await;
        let task = f
            .service
            .create(&user(1), input("https://example.com", 60))
            .await
            .unwrap();

        let result = f.service.test(&user(1), task.id).await.unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(result.title.as_deref(), Some("Fake page"));

        let stored = f.repo.get_task(task.id).await.unwrap().unwrap();
        assert!(stored.last_check.is_none());
        assert!(stored.last_content_hash.is_none());
        assert_eq!(f.repo.list_logs(task.id, 1, 10).await.unwrap().1, 0);
        assert!(f.mailer.sent().is_empty());

        f.renderer.set_failing(true);
        assert!(matches!(
            f.service.test(&user(1), task.id).await,
            Err(AppError::FetchFailed(_))
        ));
        f.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_listing_is_owner_scoped() {
        let f = fixture().await;
        f.service
            .create(&user(1), input("https://example.com/1", 60))
            .await
            .unwrap();
        f.service
            .create(&user(2), input("https://example.com/2", 60))
            .await
            .unwrap();

        assert_eq!(f.service.list(&user(1)).await.unwrap().len(), 1);
        assert_eq!(f.service.list(&admin()).await.unwrap().len(), 2);
        f.scheduler.shutdown().await;
    }
}
