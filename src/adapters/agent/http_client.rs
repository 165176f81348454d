//! HTTP client for the per-host agent debug RPC surface.
//!
//! Agents expose a small JSON-over-HTTP API on the mesh; this adapter
//! wraps it behind the [`AgentRpc`] port. Clients are cheap to build and
//! short-lived; callers own per-call deadlines.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ServiceInfo;
use crate::domain::ports::{
    AgentConnector, AgentRpc, CollectorEventBatch, CollectorEventQuery, CpuProfileRequest,
    CpuProfileResponse, MemoryProfileRequest, MemoryProfileResponse, StartCollectorRequest,
    StartCollectorResponse,
};

/// HTTP client bound to one agent's base URL.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: Client,
    base_url: String,
}

impl HttpAgentClient {
    pub fn new(http: Client, addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> DomainResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DomainError::AgentRpc(format!("agent returned {status}: {body}")))
        }
    }
}

fn rpc_err(err: reqwest::Error) -> DomainError {
    DomainError::AgentRpc(err.to_string())
}

#[derive(Deserialize)]
struct ListServicesResponse {
    #[serde(default)]
    services: Vec<ServiceInfo>,
}

/// Wire form of a collector start; durations travel as whole seconds.
#[derive(Serialize)]
struct StartCollectorWire<'a> {
    agent_id: &'a str,
    service_name: &'a str,
    function_name: &'a str,
    duration_seconds: u64,
    capture_args: bool,
    capture_return: bool,
    sample_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdk_addr: Option<&'a str>,
}

#[derive(Deserialize)]
struct StopCollectorWire {
    success: bool,
    #[serde(default)]
    error: String,
}

#[async_trait]
impl AgentRpc for HttpAgentClient {
    async fn list_services(&self) -> DomainResult<Vec<ServiceInfo>> {
        let response = self
            .http
            .get(self.url("/api/v1/services"))
            .send()
            .await
            .map_err(rpc_err)?;
        let body: ListServicesResponse =
            Self::check(response).await?.json().await.map_err(rpc_err)?;
        Ok(body.services)
    }

    async fn start_uprobe_collector(
        &self,
        request: &StartCollectorRequest,
    ) -> DomainResult<StartCollectorResponse> {
        let wire = StartCollectorWire {
            agent_id: &request.agent_id,
            service_name: &request.service_name,
            function_name: &request.function_name,
            duration_seconds: request.duration.as_secs(),
            capture_args: request.config.capture_args,
            capture_return: request.config.capture_return,
            sample_rate: request.config.sample_rate,
            sdk_addr: request.sdk_addr.as_deref(),
        };

        let response = self
            .http
            .post(self.url("/api/v1/uprobes"))
            .json(&wire)
            .send()
            .await
            .map_err(rpc_err)?;
        Self::check(response).await?.json().await.map_err(rpc_err)
    }

    async fn stop_uprobe_collector(&self, collector_id: &str) -> DomainResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/uprobes/{collector_id}/stop")))
            .send()
            .await
            .map_err(rpc_err)?;
        let body: StopCollectorWire =
            Self::check(response).await?.json().await.map_err(rpc_err)?;

        if body.success {
            Ok(())
        } else {
            Err(DomainError::AgentRpc(format!(
                "collector stop failed: {}",
                body.error
            )))
        }
    }

    async fn query_uprobe_events(
        &self,
        query: &CollectorEventQuery,
    ) -> DomainResult<CollectorEventBatch> {
        let mut request = self
            .http
            .get(self.url(&format!(
                "/api/v1/uprobes/{}/events",
                query.collector_id
            )))
            .query(&[("max_events", query.max_events.to_string())]);
        if let Some(start) = query.start_time {
            request = request.query(&[("start_time", start.to_rfc3339())]);
        }
        if let Some(end) = query.end_time {
            request = request.query(&[("end_time", end.to_rfc3339())]);
        }

        let response = request.send().await.map_err(rpc_err)?;
        Self::check(response).await?.json().await.map_err(rpc_err)
    }

    async fn profile_cpu(&self, request: &CpuProfileRequest) -> DomainResult<CpuProfileResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/profile/cpu"))
            .json(request)
            .send()
            .await
            .map_err(rpc_err)?;
        Self::check(response).await?.json().await.map_err(rpc_err)
    }

    async fn profile_memory(
        &self,
        request: &MemoryProfileRequest,
    ) -> DomainResult<MemoryProfileResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/profile/memory"))
            .json(request)
            .send()
            .await
            .map_err(rpc_err)?;
        Self::check(response).await?.json().await.map_err(rpc_err)
    }
}

/// Connector building [`HttpAgentClient`]s over one shared reqwest pool.
#[derive(Debug, Clone, Default)]
pub struct HttpAgentConnector {
    http: Client,
}

impl HttpAgentConnector {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl AgentConnector for HttpAgentConnector {
    fn connect(&self, addr: &str) -> Box<dyn AgentRpc> {
        Box::new(HttpAgentClient::new(self.http.clone(), addr))
    }
}
