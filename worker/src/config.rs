use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

pub const DEFAULT_MASTER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_WORKER_CONCURRENCY: usize = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;

/// Configuración del worker (MASTER_URL y variables WORKER_*).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_url: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub work_dir: PathBuf,
    pub app: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_poll_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_url: DEFAULT_MASTER_URL.to_string(),
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            work_dir: PathBuf::from("data/tmp"),
            app: "wordcount".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let concurrency =
            env_parse::<usize>("WORKER_CONCURRENCY").unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY tiene que ser al menos 1");
        }

        let app = env::var("WORKER_APP").unwrap_or(defaults.app);
        common::app_by_name(&app).with_context(|| format!("WORKER_APP desconocida: {}", app))?;

        Ok(Self {
            master_url: env::var("MASTER_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.master_url),
            concurrency,
            poll_interval: env_parse::<u64>("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            work_dir: env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            app,
            max_attempts: env_parse::<u32>("WORKER_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            retry_backoff: env_parse::<u64>("WORKER_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            max_poll_failures: env_parse::<u32>("WORKER_MAX_POLL_FAILURES")
                .unwrap_or(defaults.max_poll_failures)
                .max(1),
        })
    }
}
