use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{NodeId, ResourceId, ResourceKind};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::client::{ClientError, Coordinator};
use crate::config::WorkerConfig;
use crate::registry::TaskRegistry;
use crate::task::{lock, run_attempt, AttemptOutcome, SharedTask, TaskContext, TaskStatus};

/// Cómo terminó el loop. El proceso decide qué hacer con esto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No hubo recurso y el coordinador confirmó que el job terminó.
    JobComplete,
    /// Demasiadas fallas seguidas hablando con el coordinador.
    CoordinatorLost,
}

/// Resultado de un tick individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Accepted,
    Recovered,
    Duplicate,
    AtCapacity,
    NoResource,
    JobComplete,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_poll_failures: u32,
}

impl From<&WorkerConfig> for LoopSettings {
    fn from(cfg: &WorkerConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            max_attempts: cfg.max_attempts,
            retry_backoff: cfg.retry_backoff,
            max_poll_failures: cfg.max_poll_failures,
        }
    }
}

/// Loop de polling del worker:
/// - reenvía reportes de fin no confirmados
/// - recupera tareas suspendidas (con backoff) o descarta las agotadas
/// - si hay un slot libre pide una tarea nueva y la corre en paralelo
pub struct SchedulingLoop {
    node_id: NodeId,
    coordinator: Arc<dyn Coordinator>,
    ctx: Arc<TaskContext>,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    settings: LoopSettings,
    tick_lock: Mutex<()>,
}

impl SchedulingLoop {
    pub fn new(
        node_id: impl Into<NodeId>,
        coordinator: Arc<dyn Coordinator>,
        ctx: TaskContext,
        concurrency: usize,
        settings: LoopSettings,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            coordinator,
            ctx: Arc::new(ctx),
            registry: Arc::new(TaskRegistry::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Corre ticks hasta que el job termina o se pierde el coordinador.
    pub async fn run(&self) -> LoopOutcome {
        info!(
            "nodo {} arrancando loop (intervalo {:?}, slots {})",
            self.node_id,
            self.settings.poll_interval,
            self.permits.available_permits()
        );

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(TickOutcome::JobComplete) => {
                    info!("nodo {}: el job terminó", self.node_id);
                    return LoopOutcome::JobComplete;
                }
                Ok(outcome) => {
                    failures = 0;
                    debug!(
                        "nodo {}: tick {:?} ({} tareas, {} en curso)",
                        self.node_id,
                        outcome,
                        self.registry.tracked(),
                        self.registry.in_progress()
                    );
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "nodo {}: falla hablando con el coordinador ({}/{}): {}",
                        self.node_id, failures, self.settings.max_poll_failures, e
                    );
                    if failures >= self.settings.max_poll_failures {
                        return LoopOutcome::CoordinatorLost;
                    }
                }
            }
        }
    }

    /// Un tick completo, serializado con los demás.
    pub async fn tick(&self) -> Result<TickOutcome, ClientError> {
        let _guard = self.tick_lock.lock().await;

        self.flush_reports().await;
        self.sweep_suspended().await;

        // control de concurrencia local
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => return Ok(TickOutcome::AtCapacity),
        };

        let Some(task) = self.coordinator.request_task(&self.node_id).await? else {
            drop(permit);
            if self.coordinator.is_job_done().await? {
                return Ok(TickOutcome::JobComplete);
            }
            return Ok(TickOutcome::NoResource);
        };

        let name = task.name();
        let Some(known) = self.registry.lookup(&name) else {
            info!("nodo {} acepta {}", self.node_id, name);
            let shared = self.registry.receive(task);
            self.spawn_attempt(shared, permit);
            return Ok(TickOutcome::Accepted);
        };

        let (status, pending) = {
            let t = lock(&known);
            (t.status(), t.pending_report().is_some())
        };
        match status {
            TaskStatus::Suspended => {
                info!("{} repetida y suspendida: se recupera", name);
                lock(&known).set_inputs(task.inputs().to_vec());
                self.spawn_attempt(known, permit);
                Ok(TickOutcome::Recovered)
            }
            TaskStatus::Done if !pending => {
                // confirmada y re-asignada: el coordinador perdió la salida
                warn!("{} vuelve a este nodo tras un reset, se re-ejecuta", name);
                {
                    let mut t = lock(&known);
                    t.restart();
                    t.set_inputs(task.inputs().to_vec());
                }
                self.spawn_attempt(known, permit);
                Ok(TickOutcome::Accepted)
            }
            _ => {
                debug!("{} ya aceptada ({:?}), se ignora", name, status);
                Ok(TickOutcome::Duplicate)
            }
        }
    }

    /// Declara caído a otro nodo. Devuelve lo que el coordinador reseteó.
    pub async fn declare_unreachable(&self, node: &str) -> Result<Vec<ResourceId>, ClientError> {
        let reply = self
            .coordinator
            .report_unreachable(&self.node_id, node)
            .await?;
        info!("nodo {} declarado caído: {} recursos reseteados", node, reply.reset.len());
        Ok(reply.reset)
    }

    async fn flush_reports(&self) {
        for task in self.registry.pending_reports() {
            deliver_report(self.coordinator.as_ref(), &task).await;
        }
    }

    async fn sweep_suspended(&self) {
        let now = Instant::now();
        for task in self.registry.with_status(TaskStatus::Suspended) {
            let (name, id, retryable, ready) = {
                let t = lock(&task);
                (
                    t.name(),
                    t.id(),
                    t.retryable(self.settings.max_attempts),
                    t.ready_for_recovery(now, self.settings.retry_backoff),
                )
            };

            if !retryable {
                warn!(
                    "{} agotó sus {} intentos, se descarta",
                    name, self.settings.max_attempts
                );
                lock(&task).destroy(self.ctx.storage.as_ref());
                self.registry.eliminate(&name);
                continue;
            }
            if !ready {
                continue;
            }

            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };

            // un reduce necesita la vista actual de sus intermedios
            if id.kind == ResourceKind::Reduce {
                match self.coordinator.resource_locations(id).await {
                    Ok(locations) => lock(&task).set_inputs(locations),
                    Err(e) => {
                        warn!("no se pudieron refrescar las entradas de {}: {}", name, e);
                        continue;
                    }
                }
            }

            info!("recuperando {}", name);
            self.spawn_attempt(task, permit);
        }
    }

    /// Marca la tarea InProgress ya mismo y corre el resto del intento
    /// en un hilo bloqueante; el permiso se libera al terminar.
    fn spawn_attempt(&self, task: SharedTask, permit: OwnedSemaphorePermit) {
        let attempt = lock(&task).begin_attempt();
        let ctx = self.ctx.clone();
        let coordinator = self.coordinator.clone();
        let node_id = self.node_id.clone();

        tokio::spawn(async move {
            let name = attempt.id().task_name();
            let number = attempt.number();
            let blocking_task = task.clone();
            let handle = tokio::task::spawn_blocking(move || {
                run_attempt(&blocking_task, attempt, &ctx, &node_id)
            });

            match handle.await {
                Ok(AttemptOutcome::Done(_)) => {
                    info!("{} terminada (intento {})", name, number);
                    deliver_report(coordinator.as_ref(), &task).await;
                }
                Ok(AttemptOutcome::Suspended(reason)) => {
                    warn!("{} suspendida (intento {}): {}", name, number, reason);
                }
                Err(e) => {
                    warn!("panic o join error en {}: {:?}", name, e);
                    lock(&task).suspend(format!("join: {}", e));
                }
            }

            drop(permit);
        });
    }
}

/// Envía el reporte pendiente de `task`. Devuelve true si quedó resuelto.
async fn deliver_report(coordinator: &dyn Coordinator, task: &SharedTask) -> bool {
    let Some(report) = lock(task).pending_report().cloned() else {
        return true;
    };
    let id = report.id();

    match coordinator.report_done(&report).await {
        Ok(reply) => {
            lock(task).acknowledge();
            if reply.newly_done {
                info!("{} confirmado por el coordinador", id);
            } else {
                debug!("{} ya estaba terminado en el coordinador", id);
            }
            true
        }
        Err(e) if e.is_rejection() => {
            warn!("el coordinador rechazó el reporte de {}: {}", id, e);
            lock(task).acknowledge();
            true
        }
        Err(e) => {
            warn!("no se pudo reportar {}, se reintenta: {}", id, e);
            false
        }
    }
}
