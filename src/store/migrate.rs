use crate::store::keys;
use crate::store::operations::tasks::Task;
use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "_meta:version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_task_deadline_index", m002_task_deadline_index),
    ]
}

/// Apply every migration newer than the stored schema version.
///
/// Each migration must be idempotent: the process can die after the
/// migration body succeeds and before its version is recorded, in which case
/// it runs again on the next start. The version is persisted after every
/// step and never moves backwards.
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    let all = migrations();

    for (index, (name, func)) in all.iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn latest_version() -> u32 {
    migrations().len() as u32
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.config_versions.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("corrupt schema version entry ({} bytes)", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {} to {}", current, version),
        });
    }

    store
        .config_versions
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

/// Backfill the deadline index for tasks written before it existed.
fn m002_task_deadline_index(store: &Store) -> Result<(), StoreError> {
    let mut indexed = 0u64;
    for item in store.tasks.iter() {
        let (_, value) = item?;
        let task: Task = Store::deserialize(&value)?;
        let index_key = keys::task_deadline_index_key(task.deadline.timestamp_millis(), &task.id)?;
        store.task_deadline_index.insert(index_key.as_bytes(), &[])?;
        indexed += 1;
    }

    tracing::info!(indexed, "Task deadline index backfilled");
    Ok(())
}
