use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type ConnId = u64;

#[derive(Default, Debug)]
struct Counters {
    accepted: AtomicU64,
    accept_errors: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Default, Debug)]
pub struct ServerState {
    connections: Arc<DashMap<ConnId, SocketAddr>>,
    next_id: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub active: usize,
    pub accepted: u64,
    pub accept_errors: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

impl ServerState {
    pub fn register(&self, peer: SocketAddr) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.connections.insert(id, peer);
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);

        id
    }

    pub fn unregister(&self, id: ConnId) {
        self.connections.remove(&id);
    }

    pub fn active(&self) -> usize {
        self.connections.len()
    }

    pub fn record_accept_error(&self) {
        self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active: self.active(),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            accept_errors: self.counters.accept_errors.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_assigns_distinct_ids() {
        let state = ServerState::default();

        let a = state.register(addr(1000));
        let b = state.register(addr(1001));

        assert_ne!(a, b);
        assert_eq!(state.active(), 2);
        assert_eq!(state.stats().accepted, 2);

        state.unregister(a);
        assert_eq!(state.active(), 1);
        assert_eq!(state.stats().accepted, 2);
    }

    #[test]
    fn counters_are_shared_between_clones() {
        let state = ServerState::default();
        let other = state.clone();

        other.record_forwarded();
        other.record_dropped();
        other.record_accept_error();

        let stats = state.stats();
        assert_eq!((stats.forwarded, stats.dropped, stats.accept_errors), (1, 1, 1));
    }
}
