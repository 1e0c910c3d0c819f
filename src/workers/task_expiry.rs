//! Daily sweep of tasks whose deadline passed more than the retention window ago.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::SweepConfig;
use crate::store::operations::tasks::ExpiredTask;
use crate::store::{Store, StoreError};

/// The two store capabilities the sweep needs.
pub trait TaskStore {
    /// Every task with `deadline <= cutoff`.
    fn find_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExpiredTask>, StoreError>;

    /// Remove the given tasks atomically, returning how many were removed.
    fn delete_batch(&self, tasks: &[ExpiredTask]) -> Result<usize, StoreError>;
}

impl TaskStore for Store {
    fn find_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExpiredTask>, StoreError> {
        self.find_tasks_due_on_or_before(cutoff)
    }

    fn delete_batch(&self, tasks: &[ExpiredTask]) -> Result<usize, StoreError> {
        self.delete_tasks(tasks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub retention: Duration,
    /// Largest atomic delete. `None` deletes everything in one batch.
    pub batch_limit: Option<usize>,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::days(crate::config::DEFAULT_RETENTION_DAYS),
            batch_limit: None,
        }
    }
}

impl From<&SweepConfig> for SweepPolicy {
    fn from(config: &SweepConfig) -> Self {
        Self {
            retention: Duration::days(config.retention_days),
            batch_limit: config.batch_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub cutoff: DateTime<Utc>,
    pub deleted: usize,
    /// Ids submitted for deletion, in deadline order.
    pub task_ids: Vec<String>,
}

impl DeletionReport {
    pub fn is_empty(&self) -> bool {
        self.deleted == 0
    }
}

pub fn cutoff_for(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Delete every task whose deadline is at or before `now - retention`.
///
/// Store errors are returned as-is. With a batch limit, batches committed
/// before a failing one stay committed.
pub fn sweep<S>(
    now: DateTime<Utc>,
    store: &S,
    policy: &SweepPolicy,
) -> Result<DeletionReport, StoreError>
where
    S: TaskStore + ?Sized,
{
    let cutoff = cutoff_for(now, policy.retention);
    let expired = store.find_expired(cutoff)?;

    if expired.is_empty() {
        tracing::info!(%cutoff, "task_expiry: no expired tasks to delete");
        return Ok(DeletionReport {
            cutoff,
            deleted: 0,
            task_ids: Vec::new(),
        });
    }

    for task in &expired {
        tracing::info!(
            task_id = %task.id,
            deadline = %task.deadline,
            "task_expiry: scheduling deletion"
        );
    }

    let batch_size = policy.batch_limit.unwrap_or(expired.len()).max(1);
    let mut deleted = 0usize;

    for batch in expired.chunks(batch_size) {
        match store.delete_batch(batch) {
            Ok(count) => deleted += count,
            Err(e) => {
                if deleted > 0 {
                    tracing::warn!(
                        deleted,
                        remaining = expired.len() - deleted,
                        "task_expiry: batch failed after earlier batches committed"
                    );
                }
                return Err(e);
            }
        }
    }

    tracing::info!(deleted, %cutoff, "task_expiry: deleted expired tasks");
    Ok(DeletionReport {
        cutoff,
        deleted,
        task_ids: expired.into_iter().map(|task| task.id).collect(),
    })
}

/// Sweep against the wall clock on the blocking pool.
///
/// sled calls block, so the sweep runs off the async workers; a caller's
/// timeout then fires while the sweep is still running and abandons the
/// wait. An abandoned sweep still finishes its current batch.
pub async fn run(store: Arc<Store>, policy: SweepPolicy) -> Result<DeletionReport, StoreError> {
    tracing::debug!("task_expiry: start");
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        sweep(Utc::now(), store.as_ref(), &policy)
    })
    .await?
}
