use super::cycle::{CycleOutcome, CycleRunner};
use crate::db::entities::monitor_tasks;
use crate::db::repo::Repo;
use anyhow::Result;
use rand::RngExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unscheduled,
    Scheduled,
    Running,
    Disabled,
}

#[derive(Debug)]
pub enum FireResult {
    Started(JoinHandle<()>),
    /// A cycle for the task was already in flight
    Skipped,
}

struct TimerEntry {
    interval: Duration,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    timers: HashMap<i32, TimerEntry>,
    disabled: HashSet<i32>,
}

struct Inner {
    repo: Arc<Repo>,
    runner: Arc<CycleRunner>,
    registry: Mutex<Registry>,
    running: StdMutex<HashMap<i32, Arc<AtomicBool>>>,
    startup_jitter: Duration,
}

/// Clears a task's running flag when the cycle ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn running_flags(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Arc<AtomicBool>>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set the task's running flag, or `None` if a cycle is already in flight
    fn try_start(&self, task_id: i32) -> Option<RunningGuard> {
        let mut flags = self.running_flags();
        let flag = flags.entry(task_id).or_default();
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag.clone()))
    }

    fn is_running(&self, task_id: i32) -> bool {
        self.running_flags()
            .get(&task_id)
            .is_some_and(|f| f.load(Ordering::Acquire))
    }

    /// Drop the task's running flag unless a cycle still holds it
    fn release_idle_flag(&self, task_id: i32) {
        let mut flags = self.running_flags();
        if flags
            .get(&task_id)
            .is_some_and(|f| !f.load(Ordering::Acquire))
        {
            flags.remove(&task_id);
        }
    }

    /// Forget everything about a task whose row is gone
    async fn remove_task(&self, task_id: i32) {
        {
            let mut registry = self.registry.lock().await;
            registry.disabled.remove(&task_id);
            if let Some(entry) = registry.timers.remove(&task_id) {
                entry.handle.abort();
            }
        }
        self.release_idle_flag(task_id);
    }

    fn fire(self: &Arc<Self>, task_id: i32) -> FireResult {
        let Some(guard) = self.try_start(task_id) else {
            debug!("Task [{}] is still running, skipping this firing", task_id);
            return FireResult::Skipped;
        };

        let runner = self.runner.clone();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let outcome = {
                let _guard = guard;
                runner.run(task_id).await
            };
            match outcome {
                Ok(CycleOutcome::TaskGone) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove_task(task_id).await;
                    }
                    info!("Task [{}] no longer exists, unscheduled", task_id);
                }
                Ok(CycleOutcome::Failed(e)) => debug!("Task [{}] cycle failed: {}", task_id, e),
                Ok(outcome) => debug!("Task [{}] cycle finished: {:?}", task_id, outcome),
                Err(e) => error!("Task [{}] cycle error: {:#}", task_id, e),
            }
        });
        FireResult::Started(handle)
    }
}

/// Owns one fixed-rate timer per active task
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<Inner>,
}

impl SchedulerEngine {
    pub fn new(repo: Arc<Repo>, runner: Arc<CycleRunner>, startup_jitter: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                runner,
                registry: Mutex::new(Registry::default()),
                running: StdMutex::new(HashMap::new()),
                startup_jitter,
            }),
        }
    }

    /// Schedule every active task, spreading first firings over the startup jitter
    pub async fn load_active_tasks(&self) -> Result<usize> {
        let tasks = self.inner.repo.list_active_tasks().await?;
        let jitter_ms = self.inner.startup_jitter.as_millis() as u64;

        for task in &tasks {
            let delay = if jitter_ms > 0 {
                Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
            } else {
                Duration::ZERO
            };
            self.schedule_with_delay(task.id, task_interval(task), delay)
                .await;
        }

        info!("🚀 Scheduler loaded {} active task(s)", tasks.len());
        Ok(tasks.len())
    }

    /// (Re)start the timer of a task. The first firing happens one interval from now.
    pub async fn schedule(&self, task_id: i32, interval: Duration) {
        self.schedule_with_delay(task_id, interval, Duration::ZERO)
            .await;
    }

    async fn schedule_with_delay(&self, task_id: i32, interval: Duration, delay: Duration) {
        // tokio intervals must be non-zero
        let interval = interval.max(Duration::from_millis(1));
        let mut registry = self.inner.registry.lock().await;

        if let Some(old) = registry.timers.remove(&task_id) {
            old.handle.abort();
        }
        registry.disabled.remove(&task_id);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + delay + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.fire(task_id);
            }
        });

        registry
            .timers
            .insert(task_id, TimerEntry { interval, handle });
        debug!("Task [{}] scheduled every {:?}", task_id, interval);
    }

    /// Stop the timer of a task. An in-flight cycle is left to finish.
    pub async fn unschedule(&self, task_id: i32) {
        {
            let mut registry = self.inner.registry.lock().await;
            registry.disabled.remove(&task_id);
            if let Some(entry) = registry.timers.remove(&task_id) {
                entry.handle.abort();
                debug!("Task [{}] unscheduled", task_id);
            }
        }
        self.inner.release_idle_flag(task_id);
    }

    /// Bring the timer in line with the task's stored settings
    pub async fn sync_task(&self, task: &monitor_tasks::Model) {
        let interval = task_interval(task);

        if task.is_active {
            let up_to_date = {
                let registry = self.inner.registry.lock().await;
                registry
                    .timers
                    .get(&task.id)
                    .is_some_and(|entry| entry.interval == interval)
            };
            if !up_to_date {
                self.schedule(task.id, interval).await;
            }
        } else {
            let mut registry = self.inner.registry.lock().await;
            if let Some(entry) = registry.timers.remove(&task.id) {
                entry.handle.abort();
            }
            registry.disabled.insert(task.id);
            debug!("Task [{}] disabled", task.id);
        }
    }

    /// Run one cycle now, through the same skip-if-running gate as timer firings
    pub fn fire_now(&self, task_id: i32) -> FireResult {
        self.inner.fire(task_id)
    }

    pub async fn state(&self, task_id: i32) -> TaskState {
        if self.inner.is_running(task_id) {
            return TaskState::Running;
        }
        let registry = self.inner.registry.lock().await;
        if registry.timers.contains_key(&task_id) {
            TaskState::Scheduled
        } else if registry.disabled.contains(&task_id) {
            TaskState::Disabled
        } else {
            TaskState::Unscheduled
        }
    }

    pub async fn scheduled_count(&self) -> usize {
        self.inner.registry.lock().await.timers.len()
    }

    #[cfg(test)]
    fn tracked_flags(&self) -> usize {
        self.inner.running_flags().len()
    }

    /// Abort every timer
    pub async fn shutdown(&self) {
        let mut registry = self.inner.registry.lock().await;
        let count = registry.timers.len();
        for (_, entry) in registry.timers.drain() {
            entry.handle.abort();
        }
        if count > 0 {
            warn!("Scheduler stopped with {} task timer(s) cancelled", count);
        }
    }
}

fn task_interval(task: &monitor_tasks::Model) -> Duration {
    Duration::from_secs(task.interval_seconds.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{NewTask, TaskPatch};
    use crate::db::test_repo;
    use crate::notifier::testing::RecordingMailer;
    use crate::notifier::Dispatcher;
    use crate::scheduler::cycle::testing::FakeRenderer;
    use page_client::PageClient;

    async fn setup() -> (Arc<Repo>, Arc<FakeRenderer>, SchedulerEngine, i32) {
        let repo = test_repo().await;
        let renderer = Arc::new(FakeRenderer::new("v1"));
        let client = PageClient::new(renderer.clone(), 4, Duration::from_secs(5));
        let dispatcher = Arc::new(Dispatcher::new(
            repo.clone(),
            Arc::new(RecordingMailer::default()),
        ));
        let runner = Arc::new(CycleRunner::new(
            repo.clone(),
            client,
            dispatcher,
            Duration::from_secs(5),
            2000,
        ));
        let engine = SchedulerEngine::new(repo.clone(), runner, Duration::ZERO);

        let task = repo
            .create_task(NewTask {
                owner_id: 1,
                owner_name: None,
                name: "t".to_string(),
                url: "https://example.com/".to_string(),
                selector: "//div[@id='content']".to_string(),
                interval_seconds: 60,
                is_active: true,
                is_public: false,
                email_config_id: None,
            })
            .await
            .unwrap();

        (repo, renderer, engine, task.id)
    }

    #[tokio::test]
    async fn test_overlapping_firing_is_skipped() {
        let (repo, renderer, engine, task_id) = setup().await;
        renderer.set_delay(Duration::from_millis(300));

        let FireResult::Started(first) = engine.fire_now(task_id) else {
            panic!("first firing should start");
        };
        assert!(matches!(engine.fire_now(task_id), FireResult::Skipped));
        assert_eq!(engine.state(task_id).await, TaskState::Running);

        first.await.unwrap();
        assert_eq!(engine.state(task_id).await, TaskState::Unscheduled);

        // The skipped firing was dropped, not queued
        let (_, total) = repo.list_logs(task_id, 1, 10).await.unwrap();
        assert_eq!(total, 1);

        let FireResult::Started(second) = engine.fire_now(task_id) else {
            panic!("flag should be cleared after the cycle");
        };
        second.await.unwrap();
        let (_, total) = repo.list_logs(task_id, 1, 10).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_timer_fires_repeatedly() {
        let (repo, _renderer, engine, task_id) = setup().await;
        engine.schedule(task_id, Duration::from_millis(50)).await;
        assert_eq!(engine.state(task_id).await, TaskState::Scheduled);

        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.unschedule(task_id).await;

        let (_, total) = repo.list_logs(task_id, 1, 100).await.unwrap();
        assert!(total >= 2, "expected several cycles, got {}", total);
    }

    #[tokio::test]
    async fn test_unschedule_stops_timer() {
        let (repo, _renderer, engine, task_id) = setup().await;
        engine.schedule(task_id, Duration::from_millis(50)).await;
        engine.unschedule(task_id).await;
        assert_eq!(engine.state(task_id).await, TaskState::Unscheduled);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let (_, total) = repo.list_logs(task_id, 1, 10).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_unschedule_releases_idle_flag() {
        let (_repo, renderer, engine, task_id) = setup().await;

        let FireResult::Started(cycle) = engine.fire_now(task_id) else {
            panic!("cycle should start");
        };
        cycle.await.unwrap();
        assert_eq!(engine.tracked_flags(), 1);
        engine.unschedule(task_id).await;
        assert_eq!(engine.tracked_flags(), 0);

        // A flag held by an in-flight cycle survives unscheduling
        renderer.set_delay(Duration::from_millis(200));
        let FireResult::Started(cycle) = engine.fire_now(task_id) else {
            panic!("cycle should start");
        };
        engine.unschedule(task_id).await;
        assert_eq!(engine.state(task_id).await, TaskState::Running);
        cycle.await.unwrap();
        assert_eq!(engine.state(task_id).await, TaskState::Unscheduled);
    }

    #[tokio::test]
    async fn test_deleted_task_unschedules_itself() {
        let (repo, _renderer, engine, task_id) = setup().await;
        engine.schedule(task_id, Duration::from_millis(50)).await;
        assert!(repo.delete_task(task_id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.scheduled_count().await, 0);
        assert_eq!(engine.state(task_id).await, TaskState::Unscheduled);
        assert_eq!(engine.tracked_flags(), 0);
    }

    #[tokio::test]
    async fn test_sync_task_follows_active_flag_and_interval() {
        let (repo, _renderer, engine, task_id) = setup().await;

        let task = repo.get_task(task_id).await.unwrap().unwrap();
        engine.sync_task(&task).await;
        assert_eq!(engine.state(task_id).await, TaskState::Scheduled);

        let task = repo
            .update_task(
                task_id,
                TaskPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        engine.sync_task(&task).await;
        assert_eq!(engine.state(task_id).await, TaskState::Disabled);
        assert_eq!(engine.scheduled_count().await, 0);

        let task = repo
            .update_task(
                task_id,
                TaskPatch {
                    is_active: Some(true),
                    interval_seconds: Some(120),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        engine.sync_task(&task).await;
        assert_eq!(engine.state(task_id).await, TaskState::Scheduled);
        assert_eq!(engine.scheduled_count().await, 1);
    }

    #[tokio::test]
    async fn test_deletion_mid_cycle_discards_result() {
        let (repo, renderer, engine, task_id) = setup().await;
        renderer.set_delay(Duration::from_millis(200));

        let FireResult::Started(cycle) = engine.fire_now(task_id) else {
            panic!("cycle should start");
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.unschedule(task_id).await;
        assert!(repo.delete_task(task_id).await.unwrap());

        cycle.await.unwrap();
        let (_, total) = repo.list_logs(task_id, 1, 10).await.unwrap();
        assert_eq!(total, 0);
        assert!(repo.get_task(task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_active_tasks_skips_inactive() {
        let (repo, _renderer, engine, _task_id) = setup().await;
        repo.create_task(NewTask {
            owner_id: 1,
            owner_name: None,
            name: "off".to_string(),
            url: "https://example.com/".to_string(),
            selector: "//p".to_string(),
            interval_seconds: 60,
            is_active: false,
            is_public: false,
            email_config_id: None,
        })
        .await
        .unwrap();

        assert_eq!(engine.load_active_tasks().await.unwrap(), 1);
        assert_eq!(engine.scheduled_count().await, 1);
        engine.shutdown().await;
        assert_eq!(engine.scheduled_count().await, 0);
    }
}
