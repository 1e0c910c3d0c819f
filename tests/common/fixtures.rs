use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use task_sweeper::store::operations::tasks::Task;
use task_sweeper::store::Store;

pub fn setup_store(db_name: &str) -> (tempfile::TempDir, Arc<Store>) {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let db_path = temp_dir.path().join(db_name);
    let store = Arc::new(Store::open(db_path.to_str().expect("db path")).expect("open store"));
    store.run_migrations().expect("run migrations");
    (temp_dir, store)
}

/// Fixed wall clock for deterministic sweeps.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap()
}

pub fn sample_task(title: &str, deadline: DateTime<Utc>) -> Task {
    Task::new(deadline)
        .with_attribute("judul", json!(title))
        .with_attribute("mataKuliah", json!("Basis Data"))
        .with_attribute("selesai", json!(false))
}

pub fn seed_task(store: &Store, title: &str, deadline: DateTime<Utc>) -> Task {
    let task = sample_task(title, deadline);
    store.upsert_task(&task).expect("upsert seed task");
    task
}

pub fn seed_days_ago(store: &Store, title: &str, days: i64) -> Task {
    seed_task(store, title, fixed_now() - Duration::days(days))
}
