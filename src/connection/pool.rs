use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Transport protocol of an outbound agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    /// Position in per-protocol arrays
    pub fn index(&self) -> usize {
        match self {
            Self::Http => 0,
            Self::Https => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct HostSockets {
    active: usize,
    /// When each idle socket was released, oldest first
    free: VecDeque<Instant>,
}

impl HostSockets {
    /// Forgets idle sockets the client has closed by now
    fn expire(&mut self, now: Instant, keep_alive: Duration) {
        while let Some(&released) = self.free.front() {
            if now.duration_since(released) > keep_alive {
                self.free.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-protocol bookkeeping of active and idle sockets per host
///
/// The HTTP client owns the real sockets; this mirrors its pool closely
/// enough to estimate reuse. Mutated on every request start and finish.
/// Hosts with no active and no live idle socket are dropped whenever a new
/// host is added.
#[derive(Debug)]
pub struct ConnectionPoolState {
    hosts: Mutex<HashMap<(Protocol, String), HostSockets>>,
    max_free_sockets: usize,
    keep_alive: Duration,
}

/// Aggregate view of the pool for one protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub hosts: usize,
    pub active: usize,
    pub free: usize,
}

impl ConnectionPoolState {
    pub fn new(max_free_sockets: usize, keep_alive: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            max_free_sockets,
            keep_alive,
        }
    }

    /// Marks a request as started and reports whether an idle socket was reused
    pub fn start(&self, protocol: Protocol, host: &str) -> bool {
        let mut hosts = self.lock();
        let now = Instant::now();
        let key = (protocol, host.to_string());
        if !hosts.contains_key(&key) {
            self.prune(&mut hosts, now);
        }

        let entry = hosts.entry(key).or_default();
        entry.expire(now, self.keep_alive);
        entry.active += 1;
        entry.free.pop_back().is_some()
    }

    /// Marks a request as finished, returning its socket to the idle set
    pub fn finish(&self, protocol: Protocol, host: &str) {
        let mut hosts = self.lock();
        if let Some(entry) = hosts.get_mut(&(protocol, host.to_string())) {
            entry.active = entry.active.saturating_sub(1);
            entry.free.push_back(Instant::now());
            while entry.free.len() > self.max_free_sockets {
                entry.free.pop_front();
            }
        }
    }

    /// Drops hosts with nothing active or idle, returning how many
    pub fn prune_idle(&self) -> usize {
        let mut hosts = self.lock();
        self.prune(&mut hosts, Instant::now())
    }

    fn prune(&self, hosts: &mut HashMap<(Protocol, String), HostSockets>, now: Instant) -> usize {
        let before = hosts.len();
        hosts.retain(|_, sockets| {
            sockets.expire(now, self.keep_alive);
            sockets.active > 0 || !sockets.free.is_empty()
        });
        before - hosts.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Protocol, String), HostSockets>> {
        match self.hosts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self, protocol: Protocol) -> PoolSnapshot {
        let hosts = self.lock();
        hosts
            .iter()
            .filter(|((p, _), _)| *p == protocol)
            .fold(PoolSnapshot::default(), |mut acc, (_, sockets)| {
                acc.hosts += 1;
                acc.active += sockets.active;
                acc.free += sockets.free.len();
                acc
            })
    }
}
