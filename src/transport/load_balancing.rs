use std::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::response::ResultMetadata;
use crate::transport::host::{Distance, Host};

/// The options a request was submitted with, as far as load balancing and
/// retry are concerned (the full set a caller can configure — paging size,
/// tracing — lives above this crate's boundary).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub keyspace: Option<String>,
    pub timeout: Option<std::time::Duration>,
    /// Result metadata cached from an earlier full response, handed back so
    /// a follow-up paged response sent with `SKIP_METADATA` can still be
    /// materialized into rows.
    pub result_metadata: Option<ResultMetadata>,
}

/// Produces, for one request, an ordered, single-pass sequence of hosts to
/// try. The plan iterator's end signals "no more hosts to try" — there is
/// no separate exhaustion error type, per the "Plan iterator end" design
/// note.
pub trait LoadBalancingPolicy: Send + Sync {
    /// How this policy rates `host`; drives how many connections the
    /// Connector opens for it.
    fn distance(&self, host: &Host) -> Distance;

    /// Builds the plan for one request against the currently known hosts.
    fn plan(
        &self,
        keyspace: Option<&str>,
        statement: &str,
        options: &RequestOptions,
        hosts: &[Host],
    ) -> Box<dyn Iterator<Item = Host> + Send>;
}

/// Tries every non-ignored host once, rotating the starting point on each
/// call so load spreads evenly across concurrent requests.
pub struct RoundRobinPolicy {
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        RoundRobinPolicy {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn distance(&self, _host: &Host) -> Distance {
        Distance::Local
    }

    fn plan(
        &self,
        _keyspace: Option<&str>,
        _statement: &str,
        _options: &RequestOptions,
        hosts: &[Host],
    ) -> Box<dyn Iterator<Item = Host> + Send> {
        if hosts.is_empty() {
            return Box::new(std::iter::empty());
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        let (head, tail) = hosts.split_at(start);
        let rotated: Vec<Host> = tail
            .iter()
            .chain(head.iter())
            .filter(|h| self.distance(h) != Distance::Ignore)
            .cloned()
            .collect();
        Box::new(rotated.into_iter())
    }
}

/// Prefers hosts in `local_dc`, falling back to every other known host
/// after those are exhausted. Hosts outside `local_dc` are still
/// `Distance::Remote` rather than `Ignore` — they are tried, just last.
pub struct DcAwareRoundRobinPolicy {
    local_dc: String,
    counter: AtomicUsize,
}

impl DcAwareRoundRobinPolicy {
    pub fn new(local_dc: impl Into<String>) -> Self {
        DcAwareRoundRobinPolicy {
            local_dc: local_dc.into(),
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn distance(&self, host: &Host) -> Distance {
        match host.datacenter() {
            Some(dc) if dc == self.local_dc => Distance::Local,
            Some(_) => Distance::Remote,
            None => Distance::Remote,
        }
    }

    fn plan(
        &self,
        _keyspace: Option<&str>,
        _statement: &str,
        _options: &RequestOptions,
        hosts: &[Host],
    ) -> Box<dyn Iterator<Item = Host> + Send> {
        if hosts.is_empty() {
            return Box::new(std::iter::empty());
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        let (head, tail) = hosts.split_at(start);
        let rotated: Vec<Host> = tail.iter().chain(head.iter()).cloned().collect();

        let mut local: Vec<Host> = Vec::new();
        let mut remote: Vec<Host> = Vec::new();
        for host in rotated {
            match self.distance(&host) {
                Distance::Local => local.push(host),
                Distance::Remote => remote.push(host),
                Distance::Ignore => {}
            }
        }
        local.extend(remote);
        Box::new(local.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::host::test_host;

    #[test]
    fn round_robin_visits_every_host_once() {
        let policy = RoundRobinPolicy::new();
        let hosts = vec![test_host(1), test_host(2), test_host(3)];
        let options = RequestOptions::default();
        let plan: Vec<Host> = policy.plan(None, "select 1", &options, &hosts).collect();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn round_robin_rotates_start_across_calls() {
        let policy = RoundRobinPolicy::new();
        let hosts = vec![test_host(1), test_host(2), test_host(3)];
        let options = RequestOptions::default();
        let first: Vec<Host> = policy.plan(None, "select 1", &options, &hosts).collect();
        let second: Vec<Host> = policy.plan(None, "select 1", &options, &hosts).collect();
        assert_ne!(first[0], second[0]);
    }
}
