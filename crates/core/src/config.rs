//! Engine configuration read from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use log::warn;

pub const DEFAULT_JOBS_MAX_CONCURRENCY: usize = 30;
pub const DEFAULT_JOBS_MAX_IDLE_MS: u64 = 30_000;
pub const DEFAULT_JOBS_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_JOBS_BACKOFF_MAX_MS: u64 = 10 * 60 * 1_000;
pub const DEFAULT_TEMP_FILE_MAX_AGE_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Global ceiling on handlers executing at once.
    pub jobs_max_concurrency: usize,
    /// Longest the job loops sleep when nothing is due.
    pub jobs_max_idle: Duration,
    pub jobs_backoff_base: Duration,
    pub jobs_backoff_max: Duration,
    pub temp_file_max_age: Duration,
    pub temp_dir: PathBuf,
    pub files_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("tandem");
        Self {
            jobs_max_concurrency: DEFAULT_JOBS_MAX_CONCURRENCY,
            jobs_max_idle: Duration::from_millis(DEFAULT_JOBS_MAX_IDLE_MS),
            jobs_backoff_base: Duration::from_millis(DEFAULT_JOBS_BACKOFF_BASE_MS),
            jobs_backoff_max: Duration::from_millis(DEFAULT_JOBS_BACKOFF_MAX_MS),
            temp_file_max_age: Duration::from_secs(DEFAULT_TEMP_FILE_MAX_AGE_SECS),
            temp_dir: base.join("temp"),
            files_dir: base.join("files"),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unparseable values fall
    /// back to the default for that key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let number = |key: &str, fallback: u64| -> u64 {
            match read(key) {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(value) if value > 0 => value,
                    _ => {
                        warn!("[Config] Ignoring invalid value '{}' for {}", raw, key);
                        fallback
                    }
                },
                None => fallback,
            }
        };

        Self {
            jobs_max_concurrency: number(
                "TANDEM_JOBS_MAX_CONCURRENCY",
                defaults.jobs_max_concurrency as u64,
            ) as usize,
            jobs_max_idle: Duration::from_millis(number(
                "TANDEM_JOBS_MAX_IDLE_MS",
                DEFAULT_JOBS_MAX_IDLE_MS,
            )),
            jobs_backoff_base: Duration::from_millis(number(
                "TANDEM_JOBS_BACKOFF_BASE_MS",
                DEFAULT_JOBS_BACKOFF_BASE_MS,
            )),
            jobs_backoff_max: Duration::from_millis(number(
                "TANDEM_JOBS_BACKOFF_MAX_MS",
                DEFAULT_JOBS_BACKOFF_MAX_MS,
            )),
            temp_file_max_age: Duration::from_secs(number(
                "TANDEM_TEMP_FILE_MAX_AGE_SECS",
                DEFAULT_TEMP_FILE_MAX_AGE_SECS,
            )),
            temp_dir: read("TANDEM_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            files_dir: read("TANDEM_FILES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.files_dir),
        }
    }
}
