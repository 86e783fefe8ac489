use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

/// An opaque cluster node identity, used as a map key and passed to
/// policies.
///
/// Equality and hashing are defined over the inner `Arc`'s address, not
/// over `address`/`datacenter` — so "two hosts compare equal iff the
/// registry says so" holds literally: only a [`Registry`](super::registry::Registry)
/// implementation constructs `Host` values, and it is the one responsible
/// for handing out the same `Host` for the same physical node across
/// `host_up`/`host_down` churn.
#[derive(Clone)]
pub struct Host(Arc<HostInner>);

struct HostInner {
    address: SocketAddr,
    datacenter: Option<String>,
    rack: Option<String>,
}

impl Host {
    pub fn new(address: SocketAddr, datacenter: Option<String>, rack: Option<String>) -> Self {
        Host(Arc::new(HostInner {
            address,
            datacenter,
            rack,
        }))
    }

    pub fn address(&self) -> SocketAddr {
        self.0.address
    }

    pub fn datacenter(&self) -> Option<&str> {
        self.0.datacenter.as_deref()
    }

    pub fn rack(&self) -> Option<&str> {
        self.0.rack.as_deref()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.0.address)
            .field("datacenter", &self.0.datacenter)
            .field("rack", &self.0.rack)
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.address)
    }
}

/// How a load-balancing policy rates a host; drives how many connections
/// the Connector opens for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distance {
    Local,
    Remote,
    Ignore,
}

#[cfg(test)]
pub(crate) fn test_host(port: u16) -> Host {
    Host::new(SocketAddr::from(([127, 0, 0, 1], port)), None, None)
}
