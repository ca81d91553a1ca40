use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ResourceId, RpcError, RpcErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// No hay nada despachable ahora mismo; no implica que el job terminó.
    #[error("no hay recursos disponibles")]
    NoResource,

    #[error("recurso desconocido: {0}")]
    UnknownResource(ResourceId),

    #[error("reporte inválido: {0}")]
    InvalidReport(String),

    #[error("job inválido: {0}")]
    InvalidJob(String),

    #[error("pedido inválido: {0}")]
    BadRequest(String),

    /// Con `AfterMapPhase`, un reduce no tiene entrada hasta que
    /// terminan todos los maps.
    #[error("las entradas de {0} todavía no están completas")]
    InputsNotReady(ResourceId),

    #[error("no se pudo publicar la salida de {id}: {reason}")]
    OutputUnavailable { id: ResourceId, reason: String },
}

impl CoordinatorError {
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            CoordinatorError::NoResource => RpcErrorKind::NoResource,
            CoordinatorError::UnknownResource(_) => RpcErrorKind::UnknownResource,
            CoordinatorError::InvalidReport(_) => RpcErrorKind::InvalidReport,
            CoordinatorError::InvalidJob(_) => RpcErrorKind::InvalidJob,
            CoordinatorError::BadRequest(_) => RpcErrorKind::BadRequest,
            CoordinatorError::InputsNotReady(_) => RpcErrorKind::InputsNotReady,
            CoordinatorError::OutputUnavailable { .. } => RpcErrorKind::OutputUnavailable,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::NoResource | CoordinatorError::UnknownResource(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::InvalidReport(_)
            | CoordinatorError::InvalidJob(_)
            | CoordinatorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::InputsNotReady(_) | CoordinatorError::OutputUnavailable { .. } => {
                StatusCode::CONFLICT
            }
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let body = RpcError {
            kind: self.kind(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
