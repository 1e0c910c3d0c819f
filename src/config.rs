use std::env;
use std::str::FromStr;

use chrono::{Offset, Utc};

/// Cron schedule for the expiry sweep: every day at 01:00.
pub const DEFAULT_SWEEP_CRON: &str = "0 0 1 * * *";
pub const DEFAULT_SWEEP_TIMEZONE: &str = "Asia/Jakarta";
/// Asia/Jakarta is UTC+07:00 all year round.
pub const DEFAULT_SWEEP_UTC_OFFSET_SECS: i32 = 7 * 3600;
pub const DEFAULT_RETENTION_DAYS: i64 = 21;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;

/// Largest valid UTC offset magnitude accepted by `chrono::FixedOffset`.
const MAX_UTC_OFFSET_SECS: i32 = 86_399;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    pub timeout_secs: u64,
    pub run_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub cron: String,
    pub timezone: String,
    pub utc_offset_secs: i32,
    pub retention_days: i64,
    /// `None` commits every expired task in one atomic batch.
    pub batch_limit: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            is_leader: true,
            timeout_secs: DEFAULT_WORKER_TIMEOUT_SECS,
            run_on_start: false,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_SWEEP_CRON.to_string(),
            timezone: DEFAULT_SWEEP_TIMEZONE.to_string(),
            utc_offset_secs: DEFAULT_SWEEP_UTC_OFFSET_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            batch_limit: None,
        }
    }
}

impl SweepConfig {
    /// The offset the schedule is evaluated in. `timezone` never changes it.
    pub fn utc_offset(&self) -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }

    /// Zone label as logged, always paired with the offset actually in use,
    /// e.g. `Asia/Jakarta (+07:00)`.
    pub fn schedule_zone(&self) -> String {
        format!("{} ({})", self.timezone, self.utc_offset())
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/tasks.sled"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", true),
                timeout_secs: env_or_parse("WORKER_TIMEOUT_SECS", DEFAULT_WORKER_TIMEOUT_SECS),
                run_on_start: env_or_bool("SWEEP_RUN_ON_START", false),
            },
            sweep: SweepConfig {
                cron: env_or("SWEEP_CRON", DEFAULT_SWEEP_CRON),
                timezone: env_or("SWEEP_TIMEZONE", DEFAULT_SWEEP_TIMEZONE),
                utc_offset_secs: sanitize_offset(env_or_parse(
                    "SWEEP_UTC_OFFSET_SECS",
                    DEFAULT_SWEEP_UTC_OFFSET_SECS,
                )),
                retention_days: sanitize_retention(env_or_parse(
                    "SWEEP_RETENTION_DAYS",
                    DEFAULT_RETENTION_DAYS,
                )),
                batch_limit: match env_or_parse("SWEEP_BATCH_LIMIT", 0_usize) {
                    0 => None,
                    limit => Some(limit),
                },
            },
        }
    }
}

fn sanitize_offset(secs: i32) -> i32 {
    if (-MAX_UTC_OFFSET_SECS..=MAX_UTC_OFFSET_SECS).contains(&secs) {
        secs
    } else {
        tracing::warn!(
            value = secs,
            "SWEEP_UTC_OFFSET_SECS out of range, using default"
        );
        DEFAULT_SWEEP_UTC_OFFSET_SECS
    }
}

fn sanitize_retention(days: i64) -> i64 {
    if days > 0 {
        days
    } else {
        tracing::warn!(value = days, "SWEEP_RETENTION_DAYS must be positive, using default");
        DEFAULT_RETENTION_DAYS
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
