use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::AppState;

/// Loop de tolerancia a fallos:
/// - busca recursos cuyo lease de despacho venció
/// - los devuelve a Pending con su prioridad original
///
/// Complementa a ReportNodeUnreachable para workers que mueren sin aviso.
pub async fn run_failover_loop(state: AppState, lease_timeout: Duration, interval: Duration) {
    info!(
        "failover activo: lease={:?}, barrido cada {:?}",
        lease_timeout, interval
    );

    loop {
        sleep(interval).await;
        sweep_once(&state, lease_timeout);
    }
}

/// Una pasada de chequeo. Devuelve cuántos recursos se resetearon.
pub fn sweep_once(state: &AppState, lease_timeout: Duration) -> usize {
    if state.service.is_job_done().done {
        return 0;
    }

    let expired = state.service.scheduler().expire_leases(lease_timeout);
    if !expired.is_empty() {
        warn!(
            "failover: {} recursos con lease vencido vuelven a la cola: {:?}",
            expired.len(),
            expired
        );
    }
    expired.len()
}
