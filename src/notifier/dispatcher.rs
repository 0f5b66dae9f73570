use super::mailer::Mailer;
use super::message::{change_mail, test_mail};
use crate::db::entities::{email_configs, monitor_tasks};
use crate::db::repo::Repo;
use crate::error::AppResult;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// A detected change, handed from the check cycle to the dispatcher
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub task: monitor_tasks::Model,
    pub title: Option<String>,
    pub old_content: Option<String>,
    pub new_content: String,
    pub check_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub config_id: i32,
    pub receiver: String,
    pub result: Result<(), String>,
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Dispatcher {
    repo: Arc<Repo>,
    mailer: Arc<dyn Mailer>,
}

impl Dispatcher {
    pub fn new(repo: Arc<Repo>, mailer: Arc<dyn Mailer>) -> Self {
        Self { repo, mailer }
    }

    /// Send one change mail per resolved recipient config.
    ///
    /// Deliveries run concurrently; a failed delivery never affects the others.
    pub async fn notify(&self, event: &ChangeEvent) -> Vec<DeliveryOutcome> {
        let recipients = match self.resolve_recipients(&event.task).await {
            Ok(r) => r,
            Err(e) => {
                error!(
                    "Failed to resolve recipients for task [{}]: {:#}",
                    event.task.id, e
                );
                return Vec::new();
            }
        };

        if recipients.is_empty() {
            info!("No recipients for task [{}], skipping notification", event.task.id);
            return Vec::new();
        }

        let mut deliveries = JoinSet::new();
        for config in recipients {
            let mailer = self.mailer.clone();
            let mail = change_mail(event, &config.receiver_email);
            deliveries.spawn(async move {
                let result = mailer.send(&config, &mail).await.map_err(|e| e.to_string());
                DeliveryOutcome {
                    config_id: config.id,
                    receiver: config.receiver_email,
                    result,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(()) => info!(
                            "📧 Notified {} about task [{}]",
                            outcome.receiver, event.task.id
                        ),
                        Err(e) => warn!(
                            "Failed to notify {} about task [{}]: {}",
                            outcome.receiver, event.task.id, e
                        ),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => error!("Delivery task for task [{}] panicked: {}", event.task.id, e),
            }
        }
        outcomes
    }

    /// Owner's config first, then one per active subscriber; duplicate configs collapse.
    pub async fn resolve_recipients(
        &self,
        task: &monitor_tasks::Model,
    ) -> AppResult<Vec<email_configs::Model>> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();

        match self.owner_config(task).await? {
            Some(config) => {
                seen.insert(config.id);
                recipients.push(config);
            }
            None => info!(
                "Owner {} of task [{}] has no active email config",
                task.owner_id, task.id
            ),
        }

        for sub in self.repo.list_active_subscriptions_by_task(task.id).await? {
            let explicit = match sub.email_config_id {
                Some(id) => self
                    .repo
                    .get_email_config(id)
                    .await?
                    .filter(|c| c.is_active && c.owner_id == sub.subscriber_id),
                None => None,
            };
            let config = match explicit {
                Some(c) => Some(c),
                None => self
                    .repo
                    .list_active_email_configs(sub.subscriber_id)
                    .await?
                    .into_iter()
                    .next(),
            };

            match config {
                Some(config) => {
                    if seen.insert(config.id) {
                        recipients.push(config);
                    }
                }
                None => info!(
                    "Subscriber {} of task [{}] has no active email config",
                    sub.subscriber_id, task.id
                ),
            }
        }

        Ok(recipients)
    }

    async fn owner_config(&self, task: &monitor_tasks::Model) -> AppResult<Option<email_configs::Model>> {
        if let Some(id) = task.email_config_id {
            let config = self
                .repo
                .get_email_config(id)
                .await?
                .filter(|c| c.is_active && c.owner_id == task.owner_id);
            if config.is_some() {
                return Ok(config);
            }
        }
        Ok(self.repo.latest_active_email_config(task.owner_id).await?)
    }

    /// Check the SMTP connection, then send a test mail to the config's receiver
    pub async fn send_test(&self, config: &email_configs::Model) -> AppResult<()> {
        self.mailer.verify(config).await?;
        self.mailer.send(config, &test_mail(config)).await?;
        info!("📧 Test mail sent to {} (config {})", config.receiver_email, config.id);
        Ok(())
    }
}
