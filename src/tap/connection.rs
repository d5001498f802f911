//! Registry of proxied connections.
//!
//! Each accepted client gets a slot while its upstream connection is dialed
//! and for as long as bytes are being relayed.

use slab::Slab;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Current state of a proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Client accepted, upstream connection being established.
    Connecting,
    /// Relaying bytes between client and upstream.
    Proxying,
    /// One side has finished; the connection is being torn down.
    Closing,
}

/// A single proxied client connection.
#[derive(Debug)]
pub struct TapConnection {
    pub client: SocketAddr,
    pub state: ConnState,
    pub opened_at: Instant,
    upstream: Option<SocketAddr>,
}

impl TapConnection {
    pub fn new(client: SocketAddr) -> Self {
        Self {
            client,
            state: ConnState::Connecting,
            opened_at: Instant::now(),
            upstream: None,
        }
    }

    /// Transition to proxying once the upstream is connected.
    pub fn start_proxying(&mut self, upstream: SocketAddr) {
        self.state = ConnState::Proxying;
        self.upstream = Some(upstream);
    }

    /// Mark connection for closing.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
    }

    /// Upstream address, once connected. Kept after the connection closes.
    pub fn upstream(&self) -> Option<SocketAddr> {
        self.upstream
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<TapConnection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: TapConnection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut TapConnection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<TapConnection> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections currently relaying data.
    pub fn proxying(&self) -> usize {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.state == ConnState::Proxying)
            .count()
    }
}
