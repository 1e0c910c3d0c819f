use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::{Store, StoreError};

/// A task document. Only `deadline` matters to the expiry sweep; every other
/// field is carried through untouched in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub deadline: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Field names owned by the document itself. An attribute with one of these
/// names would serialize a duplicate field.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "deadline"];

impl Task {
    pub fn new(deadline: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            deadline,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        keys::task_key(&self.id)?;
        if let Some(name) = RESERVED_FIELDS
            .iter()
            .find(|name| self.attributes.contains_key(**name))
        {
            return Err(StoreError::Validation(format!(
                "task {} attribute `{name}` clashes with a document field",
                self.id
            )));
        }
        Ok(())
    }
}

/// A task selected for deletion. `deadline` comes from the record when it
/// decodes and from the deadline index otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTask {
    pub id: String,
    pub deadline: DateTime<Utc>,
}

impl ExpiredTask {
    fn index_key(&self) -> Result<String, StoreError> {
        keys::task_deadline_index_key(self.deadline.timestamp_millis(), &self.id)
    }
}

fn deadline_index_key_for(task: &Task) -> Result<String, StoreError> {
    keys::task_deadline_index_key(task.deadline.timestamp_millis(), &task.id)
}

fn abort_on<T>(result: Result<T, StoreError>) -> Result<T, ConflictableTransactionError<StoreError>> {
    result.map_err(ConflictableTransactionError::Abort)
}

impl Store {
    pub fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        task.validate()?;
        let key = keys::task_key(&task.id)?;
        let value = Self::serialize(task)?;
        let index_key = deadline_index_key_for(task)?;

        (&self.tasks, &self.task_deadline_index).transaction(|(tx_tasks, tx_index)| {
            if let Some(old_raw) = tx_tasks.get(key.as_bytes())? {
                // An undecodable old record leaves its index entry behind; the
                // expiry scan re-checks the record and drops stale entries.
                if let Ok(old_task) = Self::deserialize::<Task>(&old_raw) {
                    let old_index_key = abort_on(deadline_index_key_for(&old_task))?;
                    if old_index_key != index_key {
                        tx_index.remove(old_index_key.as_bytes())?;
                    }
                }
            }

            tx_tasks.insert(key.as_bytes(), value.as_slice())?;
            tx_index.insert(index_key.as_bytes(), &[])?;
            Ok(())
        })?;

        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let key = keys::task_key(task_id)?;
        match self.tasks.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// All tasks, earliest deadline first.
    pub fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for item in self.tasks.iter() {
            let (_, raw) = item?;
            tasks.push(Self::deserialize::<Task>(&raw)?);
        }
        tasks.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    pub fn count_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn delete_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let Some(task) = self.get_task(task_id)? else {
            return Ok(false);
        };
        let target = ExpiredTask {
            id: task.id,
            deadline: task.deadline,
        };
        Ok(self.delete_tasks(&[target])? == 1)
    }

    /// Tasks whose deadline is at or before `cutoff`, earliest first.
    ///
    /// Walks the deadline index and stops at the first entry past the cutoff.
    /// Index entries that point at a missing record, or at a record whose
    /// deadline has since moved past the cutoff, are skipped. A record that
    /// no longer decodes is selected on the deadline held by its index entry.
    pub fn find_tasks_due_on_or_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExpiredTask>, StoreError> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut expired = Vec::new();

        for item in self.task_deadline_index.iter() {
            let (index_key, _) = item?;
            let Some((deadline_ms, task_id)) = keys::parse_task_deadline_index_key(&index_key)
            else {
                tracing::warn!(
                    key = %String::from_utf8_lossy(&index_key),
                    "Skipping malformed task deadline index entry"
                );
                continue;
            };

            if deadline_ms > cutoff_ms {
                break;
            }

            let Some(raw) = self.tasks.get(keys::task_key(task_id)?.as_bytes())? else {
                tracing::debug!(task_id, "Deadline index entry without task record");
                continue;
            };

            match Self::deserialize::<Task>(&raw) {
                Ok(task) if task.deadline <= cutoff => expired.push(ExpiredTask {
                    id: task.id,
                    deadline: task.deadline,
                }),
                Ok(_) => {}
                Err(error) => {
                    let Some(deadline) = DateTime::<Utc>::from_timestamp_millis(deadline_ms)
                    else {
                        continue;
                    };
                    if deadline <= cutoff {
                        tracing::warn!(
                            task_id,
                            error = %error,
                            "Undecodable task record selected by its indexed deadline"
                        );
                        expired.push(ExpiredTask {
                            id: task_id.to_string(),
                            deadline,
                        });
                    }
                }
            }
        }

        Ok(expired)
    }

    /// Delete the given tasks and their index entries in one transaction.
    ///
    /// All-or-nothing: on error no task is removed. Tasks without a record are
    /// ignored; the return value counts records actually removed. The record
    /// is not decoded to find its index entry: the entry for `deadline` is
    /// removed, together with the entry for the record's own deadline when
    /// that differs and the record decodes.
    pub fn delete_tasks(&self, tasks: &[ExpiredTask]) -> Result<usize, StoreError> {
        if tasks.is_empty() {
            return Ok(0);
        }

        let targets = tasks
            .iter()
            .map(|task| Ok((keys::task_key(&task.id)?, task.index_key()?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let removed = (&self.tasks, &self.task_deadline_index).transaction(
            |(tx_tasks, tx_index)| {
                let mut removed = 0usize;
                for (key, index_key) in &targets {
                    let Some(raw) = tx_tasks.remove(key.as_bytes())? else {
                        continue;
                    };
                    tx_index.remove(index_key.as_bytes())?;
                    if let Ok(task) = Self::deserialize::<Task>(&raw) {
                        let own_index_key = abort_on(deadline_index_key_for(&task))?;
                        if &own_index_key != index_key {
                            tx_index.remove(own_index_key.as_bytes())?;
                        }
                    }
                    removed += 1;
                }
                Ok(removed)
            },
        )?;

        Ok(removed)
    }
}
