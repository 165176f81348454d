//! HTTP client for the colony's semantic function index.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::FunctionCandidate;
use crate::domain::ports::FunctionRegistry;

#[derive(Debug, Clone)]
pub struct HttpFunctionRegistry {
    http: Client,
    base_url: String,
}

impl HttpFunctionRegistry {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Serialize)]
struct QueryFunctionsWire<'a> {
    service_name: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct QueryFunctionsBody {
    #[serde(default)]
    functions: Vec<FunctionCandidate>,
}

#[async_trait]
impl FunctionRegistry for HttpFunctionRegistry {
    async fn query_functions(
        &self,
        service_name: &str,
        query: &str,
        max_results: u32,
    ) -> DomainResult<Vec<FunctionCandidate>> {
        let response = self
            .http
            .post(format!("{}/api/v1/functions/query", self.base_url))
            .json(&QueryFunctionsWire {
                service_name,
                query,
                max_results,
            })
            .send()
            .await
            .map_err(|e| DomainError::FunctionRegistry(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::FunctionRegistry(format!(
                "function index returned {status}: {body}"
            )));
        }

        let body: QueryFunctionsBody = response
            .json()
            .await
            .map_err(|e| DomainError::FunctionRegistry(e.to_string()))?;
        Ok(body.functions)
    }
}
