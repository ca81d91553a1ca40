use std::time::Duration;

use async_trait::async_trait;
use common::{
    JobDoneReply, Location, LocationsReply, NodeUnreachableReply, NodeUnreachableRequest,
    ResourceId, RpcError, RpcErrorKind, TaskDoneReply, TaskDoneRequest, TaskReply, TaskRequest,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::task::WorkerTask;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("error de transporte: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("el coordinador rechazó el pedido ({:?}): {}", .0.kind, .0.message)]
    Rejected(RpcError),

    #[error("respuesta inesperada del coordinador: {0}")]
    Status(StatusCode),
}

impl ClientError {
    /// Rechazos definitivos: reintentar el mismo pedido no sirve.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected(_))
    }
}

/// Lado worker del RPC. Traduce respuestas del coordinador a tareas locales.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// `None` = nada despachable ahora; no significa que el job terminó.
    async fn request_task(&self, node_id: &str) -> Result<Option<WorkerTask>, ClientError>;

    async fn report_done(&self, report: &TaskDoneRequest) -> Result<TaskDoneReply, ClientError>;

    async fn report_unreachable(
        &self,
        author: &str,
        node: &str,
    ) -> Result<NodeUnreachableReply, ClientError>;

    async fn resource_locations(&self, id: ResourceId) -> Result<Vec<Location>, ClientError>;

    async fn is_job_done(&self) -> Result<bool, ClientError>;
}

/// Cliente HTTP contra el router del master.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    match resp.json::<RpcError>().await {
        Ok(err) => Err(ClientError::Rejected(err)),
        Err(_) => Err(ClientError::Status(status)),
    }
}

#[async_trait]
impl Coordinator for CoordinatorClient {
    async fn request_task(&self, node_id: &str) -> Result<Option<WorkerTask>, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks/next"))
            .json(&TaskRequest {
                node_id: node_id.to_string(),
            })
            .send()
            .await?;

        match decode::<TaskReply>(resp).await {
            Ok(reply) => Ok(Some(WorkerTask::from_reply(&reply))),
            Err(ClientError::Rejected(err)) if err.kind == RpcErrorKind::NoResource => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn report_done(&self, report: &TaskDoneRequest) -> Result<TaskDoneReply, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks/done"))
            .json(report)
            .send()
            .await?;
        decode(resp).await
    }

    async fn report_unreachable(
        &self,
        author: &str,
        node: &str,
    ) -> Result<NodeUnreachableReply, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/nodes/unreachable"))
            .json(&NodeUnreachableRequest {
                author: author.to_string(),
                node: node.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    async fn resource_locations(&self, id: ResourceId) -> Result<Vec<Location>, ClientError> {
        let path = format!(
            "/api/v1/resources/{}/{}/locations",
            id.kind.as_str(),
            id.index
        );
        let resp = self.http.get(self.url(&path)).send().await?;
        let reply: LocationsReply = decode(resp).await?;
        Ok(reply.locations)
    }

    async fn is_job_done(&self) -> Result<bool, ClientError> {
        let resp = self.http.get(self.url("/api/v1/job/done")).send().await?;
        let reply: JobDoneReply = decode(resp).await?;
        Ok(reply.done)
    }
}
