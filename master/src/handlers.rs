use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use common::{
    JobDoneReply, JobSummary, LocationsReply, NodeUnreachableReply, NodeUnreachableRequest,
    ResourceKind, TaskDoneReply, TaskDoneRequest, TaskReply, TaskRequest,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{CoordinatorError, Result};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks/next", post(request_task))
        .route("/api/v1/tasks/done", post(report_task_done))
        .route("/api/v1/nodes/unreachable", post(report_node_unreachable))
        .route(
            "/api/v1/resources/:kind/:id/locations",
            get(resource_locations),
        )
        .route("/api/v1/job", get(job_summary))
        .route("/api/v1/job/done", get(job_done))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Un worker pide trabajo
async fn request_task(
    State(state): State<AppState>,
    Json(req): Json<TaskRequest>,
) -> Result<Json<TaskReply>> {
    match state.service.request_task(&req) {
        Ok(reply) => Ok(Json(reply)),
        Err(CoordinatorError::NoResource) => {
            debug!("nodo {} pidió tarea pero no hay nada despachable", req.node_id);
            Err(CoordinatorError::NoResource)
        }
        Err(e) => Err(e),
    }
}

// Un worker reporta que terminó un recurso
async fn report_task_done(
    State(state): State<AppState>,
    Json(req): Json<TaskDoneRequest>,
) -> Result<Json<TaskDoneReply>> {
    let id = req.id();
    let reply = state.service.report_task_done(req)?;
    if !reply.newly_done {
        info!("reporte duplicado de {} (ya estaba terminado)", id);
    }
    Ok(Json(reply))
}

// Un nodo (o un operador) declara caído a otro nodo
async fn report_node_unreachable(
    State(state): State<AppState>,
    Json(req): Json<NodeUnreachableRequest>,
) -> Json<NodeUnreachableReply> {
    Json(state.service.report_node_unreachable(&req))
}

// Ubicaciones actuales de los datos de un recurso
async fn resource_locations(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u32)>,
) -> Result<Json<LocationsReply>> {
    let kind = ResourceKind::parse(&kind).ok_or_else(|| {
        CoordinatorError::BadRequest(format!("tipo de recurso desconocido: {}", kind))
    })?;
    Ok(Json(state.service.resource_locations(kind, id)?))
}

async fn job_done(State(state): State<AppState>) -> Json<JobDoneReply> {
    Json(state.service.is_job_done())
}

async fn job_summary(State(state): State<AppState>) -> Json<JobSummary> {
    Json(state.service.summary())
}
