//! Semantic function-registry port.
//!
//! The colony's function index answers "which functions of service X
//! match this query". Only the query contract is consumed here; indexing
//! lives elsewhere.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::FunctionCandidate;

#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    /// Candidate functions of `service_name` matching `query`, capped to
    /// `max_results`, each carrying its owning agent id.
    async fn query_functions(
        &self,
        service_name: &str,
        query: &str,
        max_results: u32,
    ) -> DomainResult<Vec<FunctionCandidate>>;
}

/// Registry used when no function index is configured: every query
/// returns no candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFunctionRegistry;

#[async_trait]
impl FunctionRegistry for NullFunctionRegistry {
    async fn query_functions(
        &self,
        _service_name: &str,
        _query: &str,
        _max_results: u32,
    ) -> DomainResult<Vec<FunctionCandidate>> {
        Ok(Vec::new())
    }
}
