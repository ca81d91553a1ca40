use anyhow::{bail, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker::{LoopOutcome, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let cfg = WorkerConfig::from_env()?;
    match worker::run_worker(cfg).await? {
        LoopOutcome::JobComplete => {
            info!("job terminado, el worker sale");
            Ok(())
        }
        LoopOutcome::CoordinatorLost => bail!("se perdió el contacto con el coordinador"),
    }
}
