use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Daily files kept on disk before the oldest is pruned.
const MAX_LOG_FILES: usize = 30;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file prefix; also logged once at startup.
    pub service_name: &'static str,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME"),
            log_level: "info".to_string(),
            enable_file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

impl From<&crate::config::Config> for LogConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            log_level: config.log_level.clone(),
            enable_file_logs: config.enable_file_logs,
            log_dir: config.log_dir.clone(),
            ..Self::default()
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }

    fn file_appender(&self) -> Option<RollingFileAppender> {
        if !self.enable_file_logs {
            return None;
        }
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.service_name)
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(&self.log_dir)
        {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!(
                    "{}: cannot write logs to {}: {e}; logging to stdout only",
                    self.service_name, self.log_dir
                );
                None
            }
        }
    }
}

/// Install the global subscriber once per process.
///
/// Stdout lines carry the worker span (`worker=task_expiry`) instead of the
/// module path. With file logs on, the same events also go to daily JSON files.
/// Later calls are no-ops, so tests and binaries can both call it.
pub fn init_tracing(config: &LogConfig) {
    let stdout_layer = fmt::layer().with_target(false).with_thread_ids(false);
    let file_layer = config.file_appender().map(|appender| {
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(false)
    });

    let initialized = Registry::default()
        .with(config.filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    match initialized {
        Ok(()) => tracing::info!(
            service = config.service_name,
            file_logs = config.enable_file_logs,
            "Logging initialized"
        ),
        Err(e) if e.to_string().contains("already been set") => {}
        Err(e) => panic!("Failed to initialize tracing: {e}"),
    }
}
