use std::fs;

use common::{
    JobDoneReply, JobSummary, LocationsReply, NodeUnreachableReply, NodeUnreachableRequest,
    ResourceId, ResourceKind, TaskDoneReply, TaskDoneRequest, TaskReply, TaskRequest,
};
use tracing::{debug, info};

use crate::error::{CoordinatorError, Result};
use crate::resource::Resource;
use crate::scheduler::ResourceScheduler;

/// Operaciones RPC del coordinador sobre el scheduler.
/// Independiente del transporte (ver handlers.rs).
pub struct CoordinatorService {
    scheduler: ResourceScheduler,
}

impl CoordinatorService {
    pub fn new(scheduler: ResourceScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &ResourceScheduler {
        &self.scheduler
    }

    /// RequestTask: el próximo recurso para el nodo, o `NoResource`.
    pub fn request_task(&self, req: &TaskRequest) -> Result<TaskReply> {
        let resource = self
            .scheduler
            .select_next(&req.node_id)
            .ok_or(CoordinatorError::NoResource)?;

        let id = resource.id();
        Ok(TaskReply {
            task_type: id.kind,
            input_locations: resource.input_locations(),
            reduce_count: self.scheduler.n_reduce(),
            task_id: id.index,
        })
    }

    /// ReportTaskDone: reconstruye el recurso desde el reporte y lo marca Done.
    pub fn report_task_done(&self, req: TaskDoneRequest) -> Result<TaskDoneReply> {
        let id = req.id();
        let reported = req.results.clone();

        let outcome = match self
            .scheduler
            .mark_done(id, req.results, req.node_id.as_deref())
        {
            Ok(o) => o,
            Err(e @ (CoordinatorError::InputsNotReady(_)
            | CoordinatorError::OutputUnavailable { .. })) => {
                // el reduce se re-ejecuta; su temporal ya no sirve
                for res in &reported {
                    debug!("borrando salida rechazada {} de {}", res.location, id);
                    let _ = fs::remove_file(&res.location.file);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !outcome.newly_done {
            // la salida de un reduce duplicado no debe quedar dando vueltas
            if let Resource::Reduce(r) = &outcome.resource {
                for res in &reported {
                    if r.output.as_ref() != Some(&res.location) {
                        debug!("borrando salida duplicada {} de {}", res.location, id);
                        let _ = fs::remove_file(&res.location.file);
                    }
                }
            }
        }

        Ok(TaskDoneReply {
            received: true,
            newly_done: outcome.newly_done,
        })
    }

    /// ReportNodeUnreachable: todo lo del nodo vuelve a ser despachable.
    pub fn report_node_unreachable(&self, req: &NodeUnreachableRequest) -> NodeUnreachableReply {
        info!("{} reporta al nodo {} como inalcanzable", req.author, req.node);
        let reset = self.scheduler.mark_dirty(&req.node);
        NodeUnreachableReply { reset }
    }

    /// GetResourceLocations: vista actual de los datos de un recurso.
    pub fn resource_locations(&self, kind: ResourceKind, index: u32) -> Result<LocationsReply> {
        let resource = ResourceId { kind, index };
        let locations = self.scheduler.locations(resource)?;
        Ok(LocationsReply {
            resource,
            locations,
        })
    }

    pub fn is_job_done(&self) -> JobDoneReply {
        JobDoneReply {
            done: self.scheduler.is_job_done(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        self.scheduler.summary()
    }
}
