use std::time::Instant;

use common::{Location, NodeId, PartitionResult, ResourceId, ResourceStatus};

/// Los maps salen antes que cualquier reduce.
pub const MAP_INITIAL_PRIORITY: i64 = 10_000;
pub const REDUCE_INITIAL_PRIORITY: i64 = 0;

/// Estado de planificación común a maps y reduces.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub status: ResourceStatus,
    pub priority: i64,
    pub initial_priority: i64,
    pub owner: Option<NodeId>,
    /// Momento del último despacho (lease).
    pub leased_at: Option<Instant>,
    pub dispatches: u32,
}

impl ResourceState {
    pub fn new(initial_priority: i64) -> Self {
        Self {
            status: ResourceStatus::Pending,
            priority: initial_priority,
            initial_priority,
            owner: None,
            leased_at: None,
            dispatches: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == ResourceStatus::Done
    }

    /// Registra un despacho: baja la prioridad y toma el lease.
    pub fn dispatch(&mut self, node: &str, now: Instant) {
        self.priority -= 1;
        self.status = ResourceStatus::InProgress;
        self.owner = Some(node.to_string());
        self.leased_at = Some(now);
        self.dispatches += 1;
    }

    /// Vuelve a Pending con su prioridad original.
    pub fn reset(&mut self) {
        self.status = ResourceStatus::Pending;
        self.priority = self.initial_priority;
        self.owner = None;
        self.leased_at = None;
    }

    pub fn finish(&mut self) {
        self.status = ResourceStatus::Done;
        self.leased_at = None;
    }

    pub fn lease_expired(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.status == ResourceStatus::InProgress
            && self
                .leased_at
                .map(|t| now.saturating_duration_since(t) > timeout)
                .unwrap_or(false)
    }
}

/// Chunk: un archivo de entrada.
#[derive(Debug, Clone)]
pub struct MapResource {
    pub id: u32,
    pub input: Location,
    pub state: ResourceState,
    /// Un resultado por partición una vez terminado.
    pub results: Vec<PartitionResult>,
}

impl MapResource {
    pub fn new(id: u32, input: Location) -> Self {
        Self {
            id,
            input,
            state: ResourceState::new(MAP_INITIAL_PRIORITY),
            results: Vec::new(),
        }
    }
}

/// Partición reduce. Sus entradas se recalculan en cada despacho.
#[derive(Debug, Clone)]
pub struct ReduceResource {
    pub partition: u32,
    pub state: ResourceState,
    pub inputs: Vec<Location>,
    pub output: Option<Location>,
}

impl ReduceResource {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            state: ResourceState::new(REDUCE_INITIAL_PRIORITY),
            inputs: Vec::new(),
            output: None,
        }
    }
}

/// Foto de un recurso devuelta por el scheduler.
#[derive(Debug, Clone)]
pub enum Resource {
    Map(MapResource),
    Reduce(ReduceResource),
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        match self {
            Resource::Map(m) => ResourceId::map(m.id),
            Resource::Reduce(r) => ResourceId::reduce(r.partition),
        }
    }

    pub fn state(&self) -> &ResourceState {
        match self {
            Resource::Map(m) => &m.state,
            Resource::Reduce(r) => &r.state,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        self.state().status
    }

    pub fn priority(&self) -> i64 {
        self.state().priority
    }

    /// Datos que necesita quien ejecute el recurso.
    pub fn input_locations(&self) -> Vec<Location> {
        match self {
            Resource::Map(m) => vec![m.input.clone()],
            Resource::Reduce(r) => r.inputs.clone(),
        }
    }
}
