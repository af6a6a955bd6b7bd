//! Agent health tracking
//!
//! Process-wide, per-hostname signals that external alerting can read:
//! - `agent_up`: 1 when the last operation against the host succeeded, 0 otherwise
//! - `connection_retries`: number of dial attempts beyond the first
//!
//! Exporting these (Prometheus etc.) is left to the embedding service.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::Protocol;

/// Connection lifecycle of a transfer agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Every dial attempt failed. The next operation dials again.
    Failed,
}

#[derive(Default)]
struct HostMetrics {
    up: AtomicI64,
    retries: AtomicU64,
}

/// Registry of per-host metrics
#[derive(Default)]
pub struct AgentMetrics {
    hosts: DashMap<(Protocol, String), HostMetrics>,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an operation touching the connection
    pub fn record<T, E>(&self, protocol: Protocol, hostname: &str, outcome: &Result<T, E>) {
        let value = if outcome.is_ok() { 1 } else { 0 };
        self.hosts
            .entry((protocol, hostname.to_string()))
            .or_default()
            .up
            .store(value, Ordering::SeqCst);
        debug!("{}_agent_up{{hostname={}}} = {}", protocol, hostname, value);
    }

    pub fn increment_retries(&self, protocol: Protocol, hostname: &str) {
        let total = self
            .hosts
            .entry((protocol, hostname.to_string()))
            .or_default()
            .retries
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        debug!(
            "{}_connection_retries{{hostname={}}} = {}",
            protocol, hostname, total
        );
    }

    /// Last recorded gauge value, `None` if the host was never seen
    pub fn agent_up(&self, protocol: Protocol, hostname: &str) -> Option<i64> {
        self.hosts
            .get(&(protocol, hostname.to_string()))
            .map(|m| m.up.load(Ordering::SeqCst))
    }

    pub fn connection_retries(&self, protocol: Protocol, hostname: &str) -> u64 {
        self.hosts
            .get(&(protocol, hostname.to_string()))
            .map(|m| m.retries.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// Global metrics instance
static AGENT_METRICS: std::sync::LazyLock<AgentMetrics> =
    std::sync::LazyLock::new(AgentMetrics::new);

/// Get the global agent metrics
pub fn get_agent_metrics() -> &'static AgentMetrics {
    &AGENT_METRICS
}

pub fn agent_up(protocol: Protocol, hostname: &str) -> Option<i64> {
    get_agent_metrics().agent_up(protocol, hostname)
}

pub fn connection_retries(protocol: Protocol, hostname: &str) -> u64 {
    get_agent_metrics().connection_retries(protocol, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flips_gauge() {
        let metrics = AgentMetrics::new();
        assert_eq!(metrics.agent_up(Protocol::Sftp, "h:22"), None);

        metrics.record::<(), &str>(Protocol::Sftp, "h:22", &Ok(()));
        assert_eq!(metrics.agent_up(Protocol::Sftp, "h:22"), Some(1));

        metrics.record::<(), &str>(Protocol::Sftp, "h:22", &Err("down"));
        assert_eq!(metrics.agent_up(Protocol::Sftp, "h:22"), Some(0));

        // other protocols are tracked separately
        assert_eq!(metrics.agent_up(Protocol::Ftp, "h:22"), None);
    }

    #[test]
    fn test_retries_accumulate_per_host() {
        let metrics = AgentMetrics::new();
        metrics.increment_retries(Protocol::Sftp, "a:22");
        metrics.increment_retries(Protocol::Sftp, "a:22");
        metrics.increment_retries(Protocol::Sftp, "b:22");

        assert_eq!(metrics.connection_retries(Protocol::Sftp, "a:22"), 2);
        assert_eq!(metrics.connection_retries(Protocol::Sftp, "b:22"), 1);
        assert_eq!(metrics.connection_retries(Protocol::Sftp, "c:22"), 0);
    }
}
