use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration, loaded from `heron.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeronConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub document: DocumentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// KV RPC listen address.
    pub listen_addr: String,
    /// Max concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7399".to_string(),
            max_connections: 1024,
        }
    }
}

/// Configuration for the document layer and its DDL worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Schema lease in milliseconds. A schema change is considered visible
    /// after 2x this interval. 0 disables the wait (single-process mode).
    #[serde(default)]
    pub lease_ms: u64,
    /// Upper bound on the DDL worker tick interval in milliseconds.
    #[serde(default = "default_worker_max_tick_interval_ms")]
    pub worker_max_tick_interval_ms: u64,
    /// Ids leased per refresh by each collection's document sequence.
    #[serde(default = "default_doc_id_bandwidth")]
    pub doc_id_bandwidth: u64,
}

fn default_worker_max_tick_interval_ms() -> u64 {
    1000
}

fn default_doc_id_bandwidth() -> u64 {
    128
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            lease_ms: 0,
            worker_max_tick_interval_ms: default_worker_max_tick_interval_ms(),
            doc_id_bandwidth: default_doc_id_bandwidth(),
        }
    }
}

impl DocumentConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn worker_max_tick_interval(&self) -> Duration {
        Duration::from_millis(self.worker_max_tick_interval_ms)
    }
}

/// Pick the larger of two intervals. Used for worker tick and job-poll
/// periods, which must never drop below their configured floor.
pub fn choose_time(a: Duration, b: Duration) -> Duration {
    a.max(b)
}
