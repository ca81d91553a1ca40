use std::time::Duration;

use common::JobSummary;
use tokio::time::sleep;
use tracing::info;

use crate::state::AppState;

/// Espera a que todas las particiones reduce estén terminadas y devuelve
/// el resumen final del job.
pub async fn wait_for_job_done(state: AppState, poll: Duration) -> JobSummary {
    loop {
        if state.service.is_job_done().done {
            let summary = state.service.summary();
            info!(
                "job terminado: maps {}/{}, reduces {}/{}, resets {}",
                summary.maps.done,
                summary.maps.total,
                summary.reduces.done,
                summary.reduces.total,
                summary.dirty_resets
            );
            return summary;
        }
        sleep(poll).await;
    }
}
