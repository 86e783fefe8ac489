use std::time::Duration;

/// Produces the backoff schedule the Connect Loop sleeps between retries
/// for one host. Each call to [`ReconnectionPolicy::schedule`]
/// starts a fresh, independent sequence — the loop asks for a new one every
/// time it starts trying to reconnect to a host that just went down.
pub trait ReconnectionPolicy: Send + Sync {
    fn schedule(&self) -> Box<dyn Iterator<Item = Duration> + Send>;
}

/// Doubles the delay after every attempt, capped at `max_delay`, starting
/// from `base_delay`.
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialReconnectionPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ExponentialReconnectionPolicy {
            base_delay,
            max_delay,
        }
    }
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        ExponentialReconnectionPolicy::new(Duration::from_millis(200), Duration::from_secs(32))
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn schedule(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(ExponentialSchedule {
            next: self.base_delay,
            max_delay: self.max_delay,
        })
    }
}

struct ExponentialSchedule {
    next: Duration,
    max_delay: Duration,
}

impl Iterator for ExponentialSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (self.next * 2).min(self.max_delay);
        Some(current)
    }
}
