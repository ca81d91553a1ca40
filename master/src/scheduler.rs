// master/src/scheduler.rs

use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use common::{
    commit_reduce_output, JobSummary, Location, PartitionResult, PhaseCounts, ResourceId,
    ResourceKind, ResourceStatus,
};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::queue::PriorityQueue;
use crate::resource::{MapResource, ReduceResource, Resource, ResourceState};

/// Cuándo se pueden despachar los reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReducePolicy {
    /// Sólo cuando todos los maps están Done (entrada completa).
    #[default]
    AfterMapPhase,
    /// En cualquier momento, con la entrada que haya hasta ese punto.
    Eager,
}

#[derive(Debug, Clone)]
pub struct MarkOutcome {
    pub resource: Resource,
    /// false si ya estaba Done (reporte duplicado, no-op)
    pub newly_done: bool,
}

struct SchedulerState {
    maps: Vec<MapResource>,
    reduces: Vec<ReduceResource>,
    heap: PriorityQueue<ResourceId>,
    n_reduce: u32,
    output_dir: PathBuf,
    policy: ReducePolicy,

    // Métricas
    started_at: DateTime<Utc>,
    first_dispatch_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    dirty_resets: u64,
}

impl SchedulerState {
    fn state(&self, id: ResourceId) -> Option<&ResourceState> {
        match id.kind {
            ResourceKind::Map => self.maps.get(id.index as usize).map(|m| &m.state),
            ResourceKind::Reduce => self.reduces.get(id.index as usize).map(|r| &r.state),
        }
    }

    fn state_mut(&mut self, id: ResourceId) -> Option<&mut ResourceState> {
        match id.kind {
            ResourceKind::Map => self.maps.get_mut(id.index as usize).map(|m| &mut m.state),
            ResourceKind::Reduce => self
                .reduces
                .get_mut(id.index as usize)
                .map(|r| &mut r.state),
        }
    }

    fn snapshot(&self, id: ResourceId) -> Option<Resource> {
        match id.kind {
            ResourceKind::Map => self.maps.get(id.index as usize).cloned().map(Resource::Map),
            ResourceKind::Reduce => self
                .reduces
                .get(id.index as usize)
                .cloned()
                .map(Resource::Reduce),
        }
    }

    fn all_ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        let maps = self.maps.iter().map(|m| ResourceId::map(m.id));
        let reduces = self.reduces.iter().map(|r| ResourceId::reduce(r.partition));
        maps.chain(reduces)
    }

    fn map_phase_done(&self) -> bool {
        self.maps.iter().all(|m| m.state.is_done())
    }

    /// Con `AfterMapPhase` un reduce no tiene entrada válida hasta que
    /// todos los maps estén Done.
    fn inputs_ready(&self, id: ResourceId) -> Result<()> {
        if id.kind == ResourceKind::Reduce
            && self.policy == ReducePolicy::AfterMapPhase
            && !self.map_phase_done()
        {
            return Err(CoordinatorError::InputsNotReady(id));
        }
        Ok(())
    }

    fn job_done(&self) -> bool {
        !self.reduces.is_empty() && self.reduces.iter().all(|r| r.state.is_done())
    }

    /// Entradas actuales de la partición: lo que reportaron los maps Done.
    fn reduce_inputs(&self, partition: u32) -> Vec<Location> {
        self.maps
            .iter()
            .filter(|m| m.state.is_done())
            .flat_map(|m| m.results.iter())
            .filter(|r| r.partition == partition)
            .map(|r| r.location.clone())
            .collect()
    }

    /// Deja el recurso despachable de nuevo, con su prioridad original.
    fn reset(&mut self, id: ResourceId) {
        let Some(state) = self.state_mut(id) else {
            return;
        };
        state.reset();
        let priority = state.priority;

        match id.kind {
            ResourceKind::Map => self.maps[id.index as usize].results.clear(),
            ResourceKind::Reduce => {
                let r = &mut self.reduces[id.index as usize];
                r.inputs.clear();
                r.output = None;
            }
        }

        // puede seguir en el heap (en vuelo) o haber sido descartado (Done)
        self.heap.remove_where(|x| *x == id);
        self.heap.push(id, priority);

        self.dirty_resets += 1;
        if id.kind == ResourceKind::Reduce {
            self.finished_at = None;
        }
    }

    fn validate_results(&self, id: ResourceId, results: &[PartitionResult]) -> Result<()> {
        match id.kind {
            ResourceKind::Map => {
                if results.len() != self.n_reduce as usize {
                    return Err(CoordinatorError::InvalidReport(format!(
                        "{} reportó {} resultados, se esperaban {}",
                        id,
                        results.len(),
                        self.n_reduce
                    )));
                }
                let mut seen = vec![false; self.n_reduce as usize];
                for r in results {
                    match seen.get_mut(r.partition as usize) {
                        Some(slot) if !*slot => *slot = true,
                        _ => {
                            return Err(CoordinatorError::InvalidReport(format!(
                                "{} reportó la partición {} fuera de rango o repetida",
                                id, r.partition
                            )))
                        }
                    }
                }
                Ok(())
            }
            ResourceKind::Reduce => match results {
                [only] if only.partition == id.index => Ok(()),
                _ => Err(CoordinatorError::InvalidReport(format!(
                    "{} debe reportar exactamente una salida para su partición",
                    id
                ))),
            },
        }
    }
}

/// Scheduler de recursos del coordinador. Todo cambio de estado,
/// prioridad o resultados pasa por el único lock `inner`.
pub struct ResourceScheduler {
    inner: Mutex<SchedulerState>,
}

impl ResourceScheduler {
    /// Crea un map por archivo de entrada y un reduce por partición.
    pub fn new(
        inputs: Vec<Location>,
        n_reduce: u32,
        output_dir: impl Into<PathBuf>,
        policy: ReducePolicy,
    ) -> Result<Self> {
        if n_reduce == 0 {
            return Err(CoordinatorError::InvalidJob(
                "n_reduce tiene que ser >= 1".to_string(),
            ));
        }

        let mut heap = PriorityQueue::new();

        let maps: Vec<MapResource> = inputs
            .into_iter()
            .enumerate()
            .map(|(i, loc)| MapResource::new(i as u32, loc))
            .collect();
        for m in &maps {
            heap.push(ResourceId::map(m.id), m.state.priority);
        }

        let reduces: Vec<ReduceResource> = (0..n_reduce).map(ReduceResource::new).collect();
        for r in &reduces {
            heap.push(ResourceId::reduce(r.partition), r.state.priority);
        }

        Ok(Self {
            inner: Mutex::new(SchedulerState {
                maps,
                reduces,
                heap,
                n_reduce,
                output_dir: output_dir.into(),
                policy,
                started_at: Utc::now(),
                first_dispatch_at: None,
                finished_at: None,
                dirty_resets: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn n_reduce(&self) -> u32 {
        self.lock().n_reduce
    }

    /// Elige el próximo recurso para `node`.
    ///
    /// - Los Done que salen del heap se descartan.
    /// - El elegido vuelve al heap con prioridad - 1: sigue siendo
    ///   re-despachable (backup / respuesta perdida) pero detrás del
    ///   trabajo que nunca salió.
    /// - Un reduce se devuelve con sus entradas recalculadas. Con
    ///   `AfterMapPhase` los reduces esperan a que terminen todos los maps.
    ///
    /// `None` significa "probar más tarde", no "job terminado".
    pub fn select_next(&self, node: &str) -> Option<Resource> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let mut deferred: Vec<(ResourceId, i64)> = Vec::new();
        let mut picked = None;

        while let Some((id, priority)) = st.heap.pop() {
            let Some(state) = st.state(id) else {
                continue;
            };
            if state.is_done() {
                debug!("descartando {} del heap (ya terminado)", id);
                continue;
            }
            if st.inputs_ready(id).is_err() {
                deferred.push((id, priority));
                continue;
            }

            let new_priority = match st.state_mut(id) {
                Some(state) => {
                    state.dispatch(node, Instant::now());
                    state.priority
                }
                None => continue,
            };
            st.heap.push(id, new_priority);

            if id.kind == ResourceKind::Reduce {
                let inputs = st.reduce_inputs(id.index);
                debug!("{} despachado con {} entradas", id, inputs.len());
                st.reduces[id.index as usize].inputs = inputs;
            }

            if st.first_dispatch_at.is_none() {
                st.first_dispatch_at = Some(Utc::now());
            }

            info!(
                "despachando {} al nodo {} (prioridad -> {})",
                id, node, new_priority
            );
            picked = st.snapshot(id);
            break;
        }

        for (id, priority) in deferred {
            st.heap.push(id, priority);
        }

        picked
    }

    /// Marca el recurso como Done adoptando `results`. Idempotente: si ya
    /// estaba Done devuelve el recurso sin tocarlo.
    ///
    /// Para un reduce, la salida reportada se renombra a
    /// `<output_dir>/mr-out-<p>.txt`. Si eso falla el reduce sigue sin
    /// terminar y se devuelve `OutputUnavailable`. Con `AfterMapPhase` un
    /// reduce que reporta antes de cerrar la fase map se rechaza.
    pub fn mark_done(
        &self,
        id: ResourceId,
        results: Vec<PartitionResult>,
        completed_by: Option<&str>,
    ) -> Result<MarkOutcome> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let already_done = st
            .state(id)
            .ok_or(CoordinatorError::UnknownResource(id))?
            .is_done();

        if already_done {
            debug!("{} ya estaba terminado, reporte duplicado ignorado", id);
            let resource = st
                .snapshot(id)
                .ok_or(CoordinatorError::UnknownResource(id))?;
            return Ok(MarkOutcome {
                resource,
                newly_done: false,
            });
        }

        st.validate_results(id, &results)?;
        st.inputs_ready(id)?;

        match id.kind {
            ResourceKind::Map => {
                let mut results = results;
                results.sort_by_key(|r| r.partition);
                st.maps[id.index as usize].results = results;
            }
            ResourceKind::Reduce => {
                let temp = results[0].location.clone();
                let output = commit_reduce_output(&temp, &st.output_dir, id.index).map_err(|e| {
                    warn!("no se pudo publicar la salida de {} ({}): {}", id, temp, e);
                    CoordinatorError::OutputUnavailable {
                        id,
                        reason: e.to_string(),
                    }
                })?;
                info!("salida de {} en {}", id, output);
                st.reduces[id.index as usize].output = Some(output);
            }
        }

        if let Some(state) = st.state_mut(id) {
            state.finish();
            if let Some(node) = completed_by {
                state.owner = Some(node.to_string());
            }
        }

        if st.job_done() && st.finished_at.is_none() {
            st.finished_at = Some(Utc::now());
            info!("todas las particiones reduce terminadas");
        }

        info!("{} terminado ({} en heap)", id, st.heap.len());
        let resource = st
            .snapshot(id)
            .ok_or(CoordinatorError::UnknownResource(id))?;
        Ok(MarkOutcome {
            resource,
            newly_done: true,
        })
    }

    /// Resetea todos los recursos cuyo dueño es `node`, incluidos los
    /// Done (sus datos se perdieron con el nodo).
    pub fn mark_dirty(&self, node: &str) -> Vec<ResourceId> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let owned: Vec<ResourceId> = st
            .all_ids()
            .filter(|id| {
                st.state(*id)
                    .and_then(|s| s.owner.as_deref())
                    .map(|owner| owner == node)
                    .unwrap_or(false)
            })
            .collect();

        for id in &owned {
            st.reset(*id);
        }

        if !owned.is_empty() {
            warn!(
                "nodo {} marcado como caído: {} recursos vuelven a Pending",
                node,
                owned.len()
            );
        }
        owned
    }

    /// Resetea los recursos en progreso cuyo lease superó `timeout`.
    pub fn expire_leases(&self, timeout: Duration) -> Vec<ResourceId> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = Instant::now();

        let expired: Vec<ResourceId> = st
            .all_ids()
            .filter(|id| {
                st.state(*id)
                    .map(|s| s.lease_expired(now, timeout))
                    .unwrap_or(false)
            })
            .collect();

        for id in &expired {
            warn!("lease de {} vencido (más de {:?}), vuelve a Pending", id, timeout);
            st.reset(*id);
        }
        expired
    }

    pub fn get(&self, id: ResourceId) -> Result<Resource> {
        self.lock()
            .snapshot(id)
            .ok_or(CoordinatorError::UnknownResource(id))
    }

    /// Ubicaciones actuales de los datos de entrada del recurso.
    /// Falla con `InputsNotReady` para un reduce cuya entrada está
    /// incompleta (p.ej. un map se reseteó después del despacho).
    pub fn locations(&self, id: ResourceId) -> Result<Vec<Location>> {
        let st = self.lock();
        match id.kind {
            ResourceKind::Map => st
                .maps
                .get(id.index as usize)
                .map(|m| vec![m.input.clone()])
                .ok_or(CoordinatorError::UnknownResource(id)),
            ResourceKind::Reduce => {
                if id.index >= st.n_reduce {
                    return Err(CoordinatorError::UnknownResource(id));
                }
                st.inputs_ready(id)?;
                Ok(st.reduce_inputs(id.index))
            }
        }
    }

    /// true sólo cuando **todas** las particiones reduce están Done.
    pub fn is_job_done(&self) -> bool {
        self.lock().job_done()
    }

    pub fn summary(&self) -> JobSummary {
        let st = self.lock();

        fn count<'a>(states: impl Iterator<Item = &'a ResourceState>) -> PhaseCounts {
            let mut c = PhaseCounts::default();
            for s in states {
                c.total += 1;
                match s.status {
                    ResourceStatus::Pending => c.pending += 1,
                    ResourceStatus::InProgress => c.in_progress += 1,
                    ResourceStatus::Done => c.done += 1,
                }
            }
            c
        }

        JobSummary {
            done: st.job_done(),
            reduce_count: st.n_reduce,
            maps: count(st.maps.iter().map(|m| &m.state)),
            reduces: count(st.reduces.iter().map(|r| &r.state)),
            started_at: st.started_at,
            first_dispatch_at: st.first_dispatch_at,
            finished_at: st.finished_at,
            dirty_resets: st.dirty_resets,
        }
    }
}
