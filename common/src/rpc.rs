use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{Location, NodeId, PartitionResult, ResourceId, ResourceKind};

/* --------- Pedido de tareas --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReply {
    pub task_type: ResourceKind,
    /// Map: el archivo de entrada. Reduce: los intermedios de su partición.
    pub input_locations: Vec<Location>,
    pub reduce_count: u32,
    pub task_id: u32,
}

impl TaskReply {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId {
            kind: self.task_type,
            index: self.task_id,
        }
    }
}

/* --------- Fin de tareas --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDoneRequest {
    pub resource_type: ResourceKind,
    pub resource_id: u32,
    pub results: Vec<PartitionResult>,
    /// Nodo que ejecutó la tarea (si el worker lo informa).
    #[serde(default)]
    pub node_id: Option<NodeId>,
}

impl TaskDoneRequest {
    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.resource_type,
            index: self.resource_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDoneReply {
    pub received: bool,
    /// false si el recurso ya estaba terminado (reporte duplicado)
    pub newly_done: bool,
}

/* --------- Nodos caídos --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUnreachableRequest {
    pub author: NodeId,
    pub node: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUnreachableReply {
    pub reset: Vec<ResourceId>,
}

/* --------- Consultas --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationsReply {
    pub resource: ResourceId,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDoneReply {
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub total: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub done: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub done: bool,
    pub reduce_count: u32,
    pub maps: PhaseCounts,
    pub reduces: PhaseCounts,
    pub started_at: DateTime<Utc>,
    pub first_dispatch_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dirty_resets: u64,
}

/* --------- Errores en el cable --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    NoResource,
    UnknownResource,
    InvalidReport,
    InvalidJob,
    BadRequest,
    /// El reduce todavía no tiene su entrada completa.
    InputsNotReady,
    /// La salida reportada no se pudo publicar.
    OutputUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}
