use std::fs;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::infrastructure::config::env_or;

/// Configuration for console and file logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub file_prefix: String,
    pub max_files: usize,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_level: Level,
    pub enable_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            file_prefix: "event-relay.log".to_string(),
            max_files: 30, // days
            enable_console: true,
            enable_file: false,
            log_level: Level::INFO,
            enable_json: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            log_dir: env_or("LOG_DIR", d.log_dir),
            file_prefix: env_or("LOG_FILE_PREFIX", d.file_prefix),
            max_files: env_or("LOG_MAX_FILES", d.max_files),
            enable_console: env_or("LOG_CONSOLE", d.enable_console),
            enable_file: env_or("LOG_FILE", d.enable_file),
            log_level: env_or("LOG_LEVEL", d.log_level),
            enable_json: env_or("LOG_JSON", d.enable_json),
        }
    }

    /// Default directives used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        format!(
            "{}={},rdkafka=warn,sqlx=warn",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            self.log_level
        )
    }
}

/// Initialize logging. The returned guard flushes the file writer and must
/// be held until shutdown.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    if config.enable_console {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true);
        if config.enable_json {
            layers.push(Box::new(console_layer.json()));
        } else {
            layers.push(Box::new(console_layer));
        }
    }

    let mut guard = None;
    if config.enable_file {
        fs::create_dir_all(&config.log_dir)?;
        cleanup_old_logs(&config.log_dir, config.max_files)?;

        let appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &config.file_prefix);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        layers.push(Box::new(file_layer));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(guard)
}

/// Remove the oldest files in `log_dir` beyond `max_files`.
pub fn cleanup_old_logs(log_dir: &str, max_files: usize) -> std::io::Result<usize> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .collect();

    // Oldest first
    log_files.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let mut removed = 0;
    if log_files.len() > max_files {
        let excess = log_files.len() - max_files;
        for entry in log_files.iter().take(excess) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", entry.path(), e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_quiet_client_libraries() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(
            config.default_directives(),
            "event_relay=DEBUG,rdkafka=warn,sqlx=warn"
        );
    }

    #[test]
    fn cleanup_keeps_newest_files() {
        let dir = std::env::temp_dir().join(format!("event-relay-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..4 {
            fs::write(dir.join(format!("f{}.log", i)), b"x").unwrap();
        }

        let removed = cleanup_old_logs(dir.to_str().unwrap(), 2).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cleanup_of_missing_dir_is_noop() {
        assert_eq!(cleanup_old_logs("/definitely/not/here", 1).unwrap(), 0);
    }
}
