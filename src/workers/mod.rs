pub mod task_expiry;

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::Instrument;

use crate::config::{Config, SweepConfig, WorkerConfig};
use crate::store::Store;

use self::task_expiry::SweepPolicy;

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    TaskExpiry,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskExpiry => "task_expiry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
    pub enabled: bool,
}

pub struct WorkerManager {
    store: Arc<Store>,
    shutdown_rx: broadcast::Receiver<()>,
    worker: WorkerConfig,
    sweep: SweepConfig,
}

impl WorkerManager {
    pub fn new(store: Arc<Store>, shutdown_rx: broadcast::Receiver<()>, config: &Config) -> Self {
        Self {
            store,
            shutdown_rx,
            worker: config.worker.clone(),
            sweep: config.sweep.clone(),
        }
    }

    /// Single source of truth for all planned jobs and their cron schedules.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.worker.is_leader {
            return Vec::new();
        }

        vec![JobSpec {
            name: WorkerName::TaskExpiry,
            cron: self.sweep.cron.clone(),
            enabled: true,
        }]
    }

    /// Start the worker scheduler. Returns an error if the scheduler cannot be created or started.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.worker.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        if self.worker.run_on_start {
            let policy = SweepPolicy::from(&self.sweep);
            if let Err(e) = task_expiry::run(self.store.clone(), policy)
                .instrument(tracing::info_span!("worker", worker = WorkerName::TaskExpiry.as_str()))
                .await
            {
                tracing::error!(error = %e, "Startup sweep failed");
            }
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!(zone = %self.sweep.schedule_zone(), "Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    /// Register all jobs with the scheduler, using `planned_jobs()` as the single source of truth.
    async fn register_jobs(&self, scheduler: &JobScheduler) {
        let timezone = self.sweep.utc_offset();
        let timeout = Duration::from_secs(self.worker.timeout_secs);

        for spec in &self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let store = self.store.clone();
            let name_str = spec.name.as_str();

            match spec.name {
                WorkerName::TaskExpiry => {
                    let policy = SweepPolicy::from(&self.sweep);
                    add_job(scheduler, &spec.cron, timezone, name_str, timeout, move || {
                        let store = store.clone();
                        async move { task_expiry::run(store, policy).await.map(|_| ()) }
                    })
                    .await;
                }
            }
            tracing::info!(
                name = name_str,
                cron = %spec.cron,
                zone = %self.sweep.schedule_zone(),
                "Registered worker"
            );
        }
    }
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
///
/// The job's error is the end of the line: it is logged here and the next
/// tick runs as scheduled.
async fn add_job<Fut, F, E>(
    scheduler: &JobScheduler,
    cron: &str,
    timezone: FixedOffset,
    name: &'static str,
    timeout: Duration,
    mut run: F,
) where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async_tz(cron, timezone, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run().instrument(tracing::info_span!("worker", worker = name));
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(worker = name, error = %e, "Worker failed");
                }
                Err(_) => {
                    tracing::error!(
                        worker = name,
                        timeout_secs = timeout.as_secs(),
                        "Worker timed out"
                    );
                }
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use crate::config::Config;
    use crate::store::Store;

    use super::*;

    fn test_config(is_leader: bool) -> Config {
        Config {
            log_level: "info".to_string(),
            enable_file_logs: false,
            log_dir: "./logs".to_string(),
            sled_path: String::new(),
            worker: WorkerConfig {
                is_leader,
                ..WorkerConfig::default()
            },
            sweep: SweepConfig::default(),
        }
    }

    fn open_store(dir: &tempfile::TempDir, name: &str) -> Arc<Store> {
        Arc::new(Store::open(dir.path().join(name).to_str().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn leader_switch_controls_job_registration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(&tmp, "worker_test.sled");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(store, tx.subscribe(), &test_config(false));
        assert!(manager.planned_jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_path_is_non_panicking() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(&tmp, "worker_test_2.sled");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(store, tx.subscribe(), &test_config(false));
        manager
            .start()
            .await
            .expect("non-leader start should succeed");
    }

    #[tokio::test]
    async fn leader_plans_daily_sweep() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(&tmp, "worker_test_3.sled");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(store, tx.subscribe(), &test_config(true));
        assert_eq!(
            manager.planned_jobs(),
            vec![JobSpec {
                name: WorkerName::TaskExpiry,
                cron: "0 0 1 * * *".to_string(),
                enabled: true,
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn leader_stops_on_shutdown_signal() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = open_store(&tmp, "worker_test_4.sled");
        let (tx, _) = broadcast::channel(2);

        let manager = WorkerManager::new(store, tx.subscribe(), &test_config(true));
        let handle = tokio::spawn(manager.start());
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).expect("send shutdown");

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("manager should stop after shutdown")
            .expect("manager task should not panic");
        assert!(outcome.is_ok());
    }

    #[test]
    fn all_worker_names_have_str() {
        assert_eq!(WorkerName::TaskExpiry.as_str(), "task_expiry");
    }
}
