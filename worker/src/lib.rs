pub mod client;
pub mod config;
pub mod registry;
pub mod scheduling;
pub mod task;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub use client::{ClientError, Coordinator, CoordinatorClient};
pub use config::WorkerConfig;
pub use registry::TaskRegistry;
pub use scheduling::{LoopOutcome, LoopSettings, SchedulingLoop, TickOutcome};
pub use task::{TaskContext, TaskStatus, WorkerTask};

/// Identidad del nodo: hostname + sufijo aleatorio, para poder correr
/// varios workers en la misma máquina.
pub fn node_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "worker".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

/// Arma el loop desde la configuración y lo corre hasta el final.
pub async fn run_worker(cfg: WorkerConfig) -> Result<LoopOutcome> {
    let app = common::app_by_name(&cfg.app)
        .with_context(|| format!("aplicación desconocida: {}", cfg.app))?;
    let coordinator = CoordinatorClient::new(cfg.master_url.clone())
        .context("no se pudo crear el cliente HTTP")?;

    let node = node_id();
    info!(
        "worker {} contra {} (app={}, concurrency={}, work_dir={})",
        node,
        coordinator.base_url(),
        cfg.app,
        cfg.concurrency,
        cfg.work_dir.display()
    );

    let ctx = TaskContext::local(app, cfg.work_dir.clone());
    let scheduling = SchedulingLoop::new(
        node,
        Arc::new(coordinator),
        ctx,
        cfg.concurrency,
        LoopSettings::from(&cfg),
    );
    Ok(scheduling.run().await)
}
