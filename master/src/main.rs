use anyhow::Result;
use master::MasterConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let cfg = MasterConfig::from_env()?;
    let summary = master::run_master(cfg).await?;

    info!(
        "fin: done={} maps={}/{} reduces={}/{}",
        summary.done,
        summary.maps.done,
        summary.maps.total,
        summary.reduces.done,
        summary.reduces.total
    );
    Ok(())
}
