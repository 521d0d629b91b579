//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files by
//! the embedding server; the core only defines the shapes and defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global core configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Executor configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Agent subsystem configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of cooperating worker threads draining the ready queue.
    pub worker_threads: usize,

    /// Maximum live processes; also bounds PID reuse.
    pub max_processes: u32,

    /// Maximum time a worker waits on the ready queue before polling
    /// housekeeping again. Also the upper bound on sleep-wakeup lag.
    #[serde(with = "humantime_serde")]
    pub ready_poll: Duration,

    /// Interval between process-table checks while shutdown drains.
    #[serde(with = "humantime_serde")]
    pub shutdown_poll: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_processes: 30_000,
            ready_poll: Duration::from_secs(3),
            shutdown_poll: Duration::from_millis(250),
        }
    }
}

/// Agent subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// How long a cached security context stays fresh before the agent
    /// re-populates its capabilities.
    #[serde(with = "humantime_serde")]
    pub context_refresh: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            context_refresh: Duration::from_secs(180), // 3 minutes
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
