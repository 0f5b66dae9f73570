use super::detector::detect;
use crate::db::repo::{CheckRecord, Repo};
use crate::notifier::{ChangeEvent, DeliveryOutcome, Dispatcher};
use crate::utils::text::{excerpt, preview};
use anyhow::Result;
use chrono::Local;
use page_client::PageClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum CycleOutcome {
    /// The task row no longer exists; nothing was written
    TaskGone,
    Failed(String),
    /// First successful check, stored as the comparison baseline
    Baseline,
    Unchanged,
    /// Content changed; notification runs in the background
    Changed(JoinHandle<Vec<DeliveryOutcome>>),
}

/// Executes one fetch, detect, record and notify cycle for a task
pub struct CycleRunner {
    repo: Arc<Repo>,
    client: PageClient,
    dispatcher: Arc<Dispatcher>,
    fetch_timeout: Duration,
    excerpt_chars: usize,
}

impl CycleRunner {
    pub fn new(
        repo: Arc<Repo>,
        client: PageClient,
        dispatcher: Arc<Dispatcher>,
        fetch_timeout: Duration,
        excerpt_chars: usize,
    ) -> Self {
        Self {
            repo,
            client,
            dispatcher,
            fetch_timeout,
            excerpt_chars,
        }
    }

    pub async fn run(&self, task_id: i32) -> Result<CycleOutcome> {
        let Some(task) = self.repo.get_task(task_id).await? else {
            debug!("Task [{}] no longer exists, skipping cycle", task_id);
            return Ok(CycleOutcome::TaskGone);
        };

        let fetched = self
            .client
            .fetch(&task.url, &task.selector, Some(self.fetch_timeout))
            .await;
        let check_time = Local::now().naive_local();

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                let message = e.to_string();
                warn!("⚠️  Check of task [{}] {} failed: {}", task.id, task.url, message);
                let record = CheckRecord {
                    check_time,
                    is_changed: false,
                    old_content: None,
                    new_content: None,
                    error_message: Some(message.clone()),
                    new_hash: None,
                };
                if !self.repo.record_check(task.id, record).await? {
                    return Ok(CycleOutcome::TaskGone);
                }
                return Ok(CycleOutcome::Failed(message));
            }
        };

        let detection = detect(task.last_content_hash.as_deref(), &page.content);
        let record = CheckRecord {
            check_time,
            is_changed: detection.changed,
            old_content: task.last_content.clone(),
            new_content: Some(excerpt(&page.content, self.excerpt_chars)),
            error_message: None,
            new_hash: Some(detection.hash),
        };
        if !self.repo.record_check(task.id, record).await? {
            debug!("Task [{}] was deleted during its cycle, result discarded", task.id);
            return Ok(CycleOutcome::TaskGone);
        }

        if task.last_content_hash.is_none() {
            info!("📌 Baseline stored for task [{}] {}", task.id, task.name);
            return Ok(CycleOutcome::Baseline);
        }
        if !detection.changed {
            debug!("Task [{}] unchanged", task.id);
            return Ok(CycleOutcome::Unchanged);
        }

        info!(
            "🔔 Change detected for task [{}] {}: {}",
            task.id,
            task.name,
            preview(&page.content, 80)
        );

        let event = ChangeEvent {
            old_content: task.last_content.clone(),
            task,
            title: page.title,
            new_content: page.content,
            check_time,
        };
        let dispatcher = self.dispatcher.clone();
        let notification = tokio::spawn(async move { dispatcher.notify(&event).await });

        Ok(CycleOutcome::Changed(notification))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeRenderer;
    use super::*;
    use crate::db::repo::{NewEmailConfig, NewTask};
    use crate::db::test_repo;
    use crate::notifier::testing::RecordingMailer;

    struct Fixture {
        repo: Arc<Repo>,
        renderer: Arc<FakeRenderer>,
        mailer: Arc<RecordingMailer>,
        runner: CycleRunner,
        task_id: i32,
    }

    async fn fixture() -> Fixture {
        let repo = test_repo().await;
        let renderer = Arc::new(FakeRenderer::new("price 10"));
        let mailer = Arc::new(RecordingMailer::default());
        let client = PageClient::new(renderer.clone(), 2, Duration::from_secs(5));
        let dispatcher = Arc::new(Dispatcher::new(repo.clone(), mailer.clone()));
        let runner = CycleRunner::new(
            repo.clone(),
            client,
            dispatcher,
            Duration::from_secs(5),
            2000,
        );

        repo.create_email_config(NewEmailConfig {
            owner_id: 1,
            name: "mine".to_string(),
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 465,
            smtp_user: "bot@example.com".to_string(),
            smtp_password: "pw".to_string(),
            receiver_email: "owner@example.com".to_string(),
            is_ssl: true,
            is_active: true,
        })
        .await
        .unwrap();

        let task = repo
            .create_task(NewTask {
                owner_id: 1,
                owner_name: Some("alice".to_string()),
                name: "Price".to_string(),
                url: "https://shop.example.com/item".to_string(),
                selector: "//div[@id='content']".to_string(),
                interval_seconds: 60,
                is_active: true,
                is_public: false,
                email_config_id: None,
            })
            .await
            .unwrap();

        Fixture {
            repo,
            renderer,
            mailer,
            runner,
            task_id: task.id,
        }
    }

    #[tokio::test]
    async fn test_baseline_then_unchanged_then_changed() {
        let f = fixture().await;

        assert!(matches!(f.runner.run(f.task_id).await.unwrap(), CycleOutcome::Baseline));
        assert!(matches!(f.runner.run(f.task_id).await.unwrap(), CycleOutcome::Unchanged));

        f.renderer.set_content("price 12");
        let outcome = f.runner.run(f.task_id).await.unwrap();
        let CycleOutcome::Changed(notification) = outcome else {
            panic!("expected a change, got {:?}", outcome);
        };
        let deliveries = notification.await.unwrap();
        assert_eq!(deliveries.len(), 1);

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Fake page - content update");
        assert!(sent[0].body.contains("price 10"));
        assert!(sent[0].body.contains("price 12"));

        let (logs, total) = f.repo.list_logs(f.task_id, 1, 10).await.unwrap();
        assert_eq!(total, 3);
        assert!(logs[0].is_changed);
        assert_eq!(logs[0].old_content.as_deref(), Some("price 10"));
        assert_eq!(logs[0].new_content.as_deref(), Some("price 12"));
        assert!(!logs[1].is_changed);
        assert!(!logs[2].is_changed);

        let task = f.repo.get_task(f.task_id).await.unwrap().unwrap();
        assert_eq!(task.last_content.as_deref(), Some("price 12"));
    }

    #[tokio::test]
    async fn test_failure_logs_error_and_keeps_snapshot() {
        let f = fixture().await;
        f.runner.run(f.task_id).await.unwrap();
        let before = f.repo.get_task(f.task_id).await.unwrap().unwrap();

        f.renderer.set_failing(true);
        let outcome = f.runner.run(f.task_id).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed(_)));

        let after = f.repo.get_task(f.task_id).await.unwrap().unwrap();
        assert_eq!(after.last_content_hash, before.last_content_hash);
        assert!(after.last_check >= before.last_check);

        let (logs, _) = f.repo.list_logs(f.task_id, 1, 10).await.unwrap();
        assert!(logs[0].error_message.as_deref().unwrap().contains("500"));
        assert!(!logs[0].is_changed);

        // Recovery with identical content is not a change
        f.renderer.set_failing(false);
        assert!(matches!(f.runner.run(f.task_id).await.unwrap(), CycleOutcome::Unchanged));
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_selector_is_a_failed_check() {
        let f = fixture().await;
        f.repo
            .update_task(
                f.task_id,
                crate::db::repo::TaskPatch {
                    selector: Some("//table".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(f.runner.run(f.task_id).await.unwrap(), CycleOutcome::Failed(_)));
        let task = f.repo.get_task(f.task_id).await.unwrap().unwrap();
        assert!(task.last_content_hash.is_none());
        assert!(task.last_check.is_some());
    }

    #[tokio::test]
    async fn test_missing_task_is_skipped() {
        let f = fixture().await;
        f.repo.delete_task(f.task_id).await.unwrap();
        assert!(matches!(f.runner.run(f.task_id).await.unwrap(), CycleOutcome::TaskGone));
        assert_eq!(f.renderer.renders.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_content_is_truncated_in_log() {
        let f = fixture().await;
        let runner = CycleRunner::new(
            f.repo.clone(),
            PageClient::new(f.renderer.clone(), 1, Duration::from_secs(5)),
            Arc::new(Dispatcher::new(f.repo.clone(), f.mailer.clone())),
            Duration::from_secs(5),
            5,
        );
        f.renderer.set_content("abcdefghij");
        runner.run(f.task_id).await.unwrap();

        let (logs, _) = f.repo.list_logs(f.task_id, 1, 1).await.unwrap();
        assert_eq!(logs[0].new_content.as_deref(), Some("abcde..."));
    }
}
