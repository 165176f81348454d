//! Colony-side configuration for the debug orchestrator.

use serde::{Deserialize, Serialize};

/// Main configuration structure for polyp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP listener for the public RPC surface.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Agent RPC configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Background event-persister configuration.
    #[serde(default)]
    pub persister: PersisterConfig,

    /// Semantic function-registry configuration.
    #[serde(default)]
    pub function_registry: FunctionRegistryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            database: DatabaseConfig::default(),
            agent: AgentConfig::default(),
            persister: PersisterConfig::default(),
            function_registry: FunctionRegistryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,

    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Whether to add a permissive CORS layer (dev consoles).
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_listen_port() -> u16 {
    7070
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
            enable_cors: false,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".polyp/polyp.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Agent RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Port every agent listens on; the address is `mesh_ipv4:port`.
    #[serde(default = "default_agent_port")]
    pub port: u16,

    /// Per-call deadline for discovery fan-out probes, in milliseconds.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

const fn default_agent_port() -> u16 {
    50051
}

const fn default_discovery_timeout_ms() -> u64 {
    500
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: default_agent_port(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

/// Background event-persister configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersisterConfig {
    /// Seconds between drain ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Overall deadline for one tick, in seconds.
    #[serde(default = "default_tick_deadline_secs")]
    pub tick_deadline_secs: u64,

    /// Maximum events pulled per session per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

const fn default_tick_interval_secs() -> u64 {
    10
}

const fn default_tick_deadline_secs() -> u64 {
    30
}

const fn default_batch_size() -> u32 {
    10_000
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            tick_deadline_secs: default_tick_deadline_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Semantic function-registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FunctionRegistryConfig {
    /// Base URL of the function index service. When absent, function
    /// discovery degrades to empty results.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
