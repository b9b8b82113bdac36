//! Connection registry — the single source of truth for peer connection state
//!
//! Every send and fan-out consults `is_open` before attempting delivery.
//! Transitions only advance Connecting -> Open -> Closed; a reconnect after
//! Closed creates a fresh logical connection with a new generation.

use crate::message::SenderInfo;
use crate::transport::abstraction::ConnectionState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// One logical connection to a peer
#[derive(Debug, Clone)]
pub struct Connection {
    /// Remote peer ID
    pub peer_id: String,
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Metadata the remote presented when it opened the channel
    pub metadata: Option<SenderInfo>,
    /// Increments every time a fresh logical connection replaces a closed one
    pub generation: u64,
    /// When this logical connection was created
    pub created_at: SystemTime,
}

impl Connection {
    fn new(peer_id: &str, generation: u64) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            state: ConnectionState::Connecting,
            metadata: None,
            generation,
            created_at: SystemTime::now(),
        }
    }

    fn advance(&mut self, next: ConnectionState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Maps peer IDs to their current connection
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
    generations: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Begin an outbound attempt.
    ///
    /// Returns false when a connection is already Connecting or Open.
    pub fn mark_connecting(&self, peer_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get(peer_id) {
            Some(conn) if conn.state != ConnectionState::Closed => false,
            _ => {
                let generation = self.next_generation();
                connections.insert(peer_id.to_string(), Connection::new(peer_id, generation));
                debug!("Connection to {} is connecting (generation {})", peer_id, generation);
                true
            }
        }
    }

    /// Complete an outbound attempt. Returns true if the state changed.
    pub fn mark_open(&self, peer_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(peer_id) {
            Some(conn) => {
                let advanced = conn.advance(ConnectionState::Open);
                if advanced {
                    debug!("Connection to {} is open", peer_id);
                }
                advanced
            }
            None => false,
        }
    }

    /// Record a channel the remote opened, together with its metadata.
    ///
    /// A Connecting record (both sides dialed at once) advances to Open; an
    /// absent or Closed record is replaced by a fresh connection that passes
    /// through Connecting to Open. Returns true if the connection became Open.
    pub fn accept_inbound(&self, peer_id: &str, metadata: SenderInfo) -> bool {
        let mut connections = self.connections.write();
        let fresh = !matches!(
            connections.get(peer_id).map(|conn| conn.state),
            Some(ConnectionState::Connecting) | Some(ConnectionState::Open)
        );
        if fresh {
            let generation = self.next_generation();
            connections.insert(peer_id.to_string(), Connection::new(peer_id, generation));
        }

        let Some(conn) = connections.get_mut(peer_id) else {
            return false;
        };
        conn.metadata = Some(metadata);
        let advanced = conn.advance(ConnectionState::Open);
        if advanced {
            debug!("Inbound connection from {} is open", peer_id);
        }
        advanced
    }

    /// Close a connection. Returns true if the state changed.
    pub fn mark_closed(&self, peer_id: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(peer_id) {
            Some(conn) => {
                let advanced = conn.advance(ConnectionState::Closed);
                if advanced {
                    debug!("Connection to {} is closed", peer_id);
                }
                advanced
            }
            None => false,
        }
    }

    /// Check if a peer's connection is Open
    pub fn is_open(&self, peer_id: &str) -> bool {
        self.state(peer_id) == Some(ConnectionState::Open)
    }

    /// Current state of a peer's connection, if one was ever recorded
    pub fn state(&self, peer_id: &str) -> Option<ConnectionState> {
        self.connections.read().get(peer_id).map(|conn| conn.state)
    }

    /// Metadata the remote presented, if any
    pub fn metadata(&self, peer_id: &str) -> Option<SenderInfo> {
        self.connections
            .read()
            .get(peer_id)
            .and_then(|conn| conn.metadata.clone())
    }

    /// Snapshot of a peer's connection
    pub fn connection(&self, peer_id: &str) -> Option<Connection> {
        self.connections.read().get(peer_id).cloned()
    }

    /// All peers whose connection is Open
    pub fn open_peers(&self) -> Vec<String> {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.state == ConnectionState::Open)
            .map(|conn| conn.peer_id.clone())
            .collect()
    }

    /// Close every live connection, returning the peers that changed state
    pub fn close_all(&self) -> Vec<String> {
        let mut connections = self.connections.write();
        connections
            .values_mut()
            .filter_map(|conn| {
                if conn.advance(ConnectionState::Closed) {
                    Some(conn.peer_id.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}
