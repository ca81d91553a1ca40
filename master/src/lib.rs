pub mod config;
pub mod error;
pub mod failover;
pub mod handlers;
pub mod monitor;
mod queue;
pub mod resource;
pub mod scheduler;
pub mod service;
pub mod state;

use std::fs;

use anyhow::{bail, Context, Result};
use common::{JobSummary, Location};
use glob::glob;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use config::MasterConfig;
pub use error::CoordinatorError;
pub use scheduler::{ReducePolicy, ResourceScheduler};
pub use service::CoordinatorService;
pub use state::AppState;

/// Arma el estado del coordinador: un map por archivo que matchee
/// `input_glob` (ordenados) y `n_reduce` particiones.
pub fn build_state(cfg: &MasterConfig) -> Result<AppState> {
    let mut files = Vec::new();
    for entry in glob(&cfg.input_glob).context("patrón MR_INPUT_GLOB inválido")? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("no se pudo leer una entrada del glob: {}", e),
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("ningún archivo de entrada coincide con {}", cfg.input_glob);
    }

    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("no se pudo crear {}", cfg.output_dir.display()))?;

    let inputs: Vec<Location> = files
        .iter()
        .map(|p| Location::new(p.to_string_lossy()))
        .collect();

    info!(
        "job con {} archivos de entrada y {} particiones reduce (salida en {})",
        inputs.len(),
        cfg.n_reduce,
        cfg.output_dir.display()
    );

    let scheduler =
        ResourceScheduler::new(inputs, cfg.n_reduce, &cfg.output_dir, cfg.reduce_policy)?;
    Ok(AppState::new(CoordinatorService::new(scheduler)))
}

/// Sirve el RPC en `listener` hasta que el job termina (más el período
/// de gracia) o llega Ctrl-C. Devuelve el resumen final.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cfg: &MasterConfig,
) -> Result<JobSummary> {
    let app = handlers::build_router(state.clone());

    // barrido de leases en segundo plano
    let failover = cfg.lease_timeout.map(|timeout| {
        let failover_state = state.clone();
        let interval = cfg.sweep_interval;
        tokio::spawn(async move {
            failover::run_failover_loop(failover_state, timeout, interval).await;
        })
    });

    let done_state = state.clone();
    let poll = cfg.done_poll_interval;
    let grace = cfg.shutdown_grace;
    let shutdown = async move {
        tokio::select! {
            _ = monitor::wait_for_job_done(done_state, poll) => {
                info!("apagando el coordinador en {:?}", grace);
                tokio::time::sleep(grace).await;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C recibido, apagando el coordinador");
            }
        }
    };

    info!("coordinador escuchando en {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("error sirviendo el RPC")?;

    if let Some(handle) = failover {
        handle.abort();
    }

    Ok(state.service.summary())
}

/// Punto de entrada completo del coordinador.
pub async fn run_master(cfg: MasterConfig) -> Result<JobSummary> {
    let state = build_state(&cfg)?;
    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", cfg.listen_addr))?;
    serve(listener, state, &cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("master_lib_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn build_state_crea_un_map_por_archivo() {
        let dir = temp_dir("build_state");
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::create_dir_all(dir.join("sub.txt")).unwrap();

        let cfg = MasterConfig {
            input_glob: format!("{}/*.txt", dir.display()),
            n_reduce: 3,
            output_dir: dir.join("out"),
            ..MasterConfig::default()
        };
        let state = build_state(&cfg).unwrap();

        let summary = state.service.summary();
        assert_eq!(summary.maps.total, 2);
        assert_eq!(summary.reduces.total, 3);
        assert!(cfg.output_dir.exists());

        // orden estable: a.txt es el map 0
        let locs = state
            .service
            .resource_locations(common::ResourceKind::Map, 0)
            .unwrap();
        assert!(locs.locations[0].file.ends_with("a.txt"));
    }

    #[test]
    fn build_state_sin_entradas_falla() {
        let dir = temp_dir("build_state_vacio");
        let cfg = MasterConfig {
            input_glob: format!("{}/*.txt", dir.display()),
            output_dir: dir.join("out"),
            ..MasterConfig::default()
        };
        assert!(build_state(&cfg).is_err());
    }
}
