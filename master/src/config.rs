use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::scheduler::ReducePolicy;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_N_REDUCE: u32 = 4;
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Configuración del coordinador (variables de entorno MR_*).
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: SocketAddr,
    pub input_glob: String,
    pub n_reduce: u32,
    pub output_dir: PathBuf,
    pub reduce_policy: ReducePolicy,
    /// None = sin barrido de leases.
    pub lease_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
    pub done_poll_interval: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            input_glob: "data/input/*.txt".to_string(),
            n_reduce: DEFAULT_N_REDUCE,
            output_dir: PathBuf::from("data/output"),
            reduce_policy: ReducePolicy::AfterMapPhase,
            lease_timeout: Some(Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS)),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            done_poll_interval: Duration::from_secs(1),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("MR_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("MR_LISTEN_ADDR inválida")?;

        let reduce_policy = if env_parse::<bool>("MR_EAGER_REDUCE").unwrap_or(false) {
            ReducePolicy::Eager
        } else {
            ReducePolicy::AfterMapPhase
        };

        // 0 desactiva el barrido
        let lease_secs =
            env_parse::<u64>("MR_LEASE_TIMEOUT_SECS").unwrap_or(DEFAULT_LEASE_TIMEOUT_SECS);
        let lease_timeout = (lease_secs > 0).then(|| Duration::from_secs(lease_secs));

        Ok(Self {
            listen_addr,
            input_glob: env::var("MR_INPUT_GLOB").unwrap_or(defaults.input_glob),
            n_reduce: env_parse("MR_N_REDUCE").unwrap_or(defaults.n_reduce),
            output_dir: env::var("MR_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            reduce_policy,
            lease_timeout,
            sweep_interval: env_parse::<u64>("MR_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            shutdown_grace: env_parse::<u64>("MR_SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            done_poll_interval: defaults.done_poll_interval,
        })
    }
}
