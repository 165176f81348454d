//! Agent RPC adapters: the mesh HTTP client and a scriptable mock.

pub mod http_client;
pub mod mock;

pub use http_client::{HttpAgentClient, HttpAgentConnector};
pub use mock::{MockAgent, MockAgentBehavior, MockAgentConnector};
