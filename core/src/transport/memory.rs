//! In-process channel backend
//!
//! `MemoryNetwork` plays the role of the rendezvous directory and the wire
//! for any number of local `MemoryBackend`s. Frames are delivered through
//! unbounded channels in the order they were transmitted, so per-channel
//! ordering holds. Each frame crosses in its encoded form, so the codec's
//! size limits apply as they would on a real link. Used by the test suites
//! and for local demos.

use crate::message::{decode_frame, encode_frame, SenderInfo, WireFrame};
use crate::transport::abstraction::{BackendEvent, ChannelBackend, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct Node {
    events: mpsc::UnboundedSender<BackendEvent>,
    links: HashSet<String>,
    relayed: bool,
}

struct NetworkState {
    directory_online: bool,
    dial_latency: Duration,
    nodes: HashMap<String, Node>,
    dials: HashMap<(String, String), usize>,
}

/// Shared directory plus wire for in-process peers
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                directory_online: true,
                dial_latency: Duration::ZERO,
                nodes: HashMap::new(),
                dials: HashMap::new(),
            })),
        }
    }

    /// A fresh backend attached to this network
    pub fn backend(&self) -> MemoryBackend {
        MemoryBackend {
            network: self.clone(),
            local: Mutex::new(None),
        }
    }

    /// Take the directory down or bring it back. Existing channels survive.
    pub fn set_directory_online(&self, online: bool) {
        self.state.lock().directory_online = online;
    }

    /// Delay every channel open by `latency`
    pub fn set_dial_latency(&self, latency: Duration) {
        self.state.lock().dial_latency = latency;
    }

    /// How many times `from` opened a channel to `to`
    pub fn dial_count(&self, from: &str, to: &str) -> usize {
        self.state
            .lock()
            .dials
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.state.lock().nodes.contains_key(peer_id)
    }

    /// Whether a peer registered through the relay
    pub fn is_relayed(&self, peer_id: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(peer_id)
            .map(|node| node.relayed)
            .unwrap_or(false)
    }

    /// Drop the channel between two peers as if the wire failed.
    ///
    /// Both sides observe a close.
    pub fn disconnect(&self, a: &str, b: &str) {
        let mut state = self.state.lock();
        unlink(&mut state, a, b);
        for (side, other) in [(a, b), (b, a)] {
            if let Some(node) = state.nodes.get(side) {
                let _ = node.events.send(BackendEvent::Closed {
                    peer_id: other.to_string(),
                });
            }
        }
        debug!("Severed {} <-> {}", a, b);
    }
}

fn unlink(state: &mut NetworkState, a: &str, b: &str) {
    if let Some(node) = state.nodes.get_mut(a) {
        node.links.remove(b);
    }
    if let Some(node) = state.nodes.get_mut(b) {
        node.links.remove(a);
    }
}

fn generate_peer_id(anonymize: bool) -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    let prefix = if anonymize { "ghost" } else { "turtle" };
    format!("{}-{}", prefix, hex::encode(bytes))
}

/// One peer's attachment to a `MemoryNetwork`
pub struct MemoryBackend {
    network: MemoryNetwork,
    local: Mutex<Option<String>>,
}

impl MemoryBackend {
    fn local_id(&self) -> Result<String, TransportError> {
        self.local.lock().clone().ok_or(TransportError::NotInitialized)
    }
}

#[async_trait]
impl ChannelBackend for MemoryBackend {
    async fn register(
        &self,
        profile: &SenderInfo,
        anonymize: bool,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Result<String, TransportError> {
        let mut state = self.network.state.lock();
        if !state.directory_online {
            return Err(TransportError::Connect("directory offline".into()));
        }

        let mut peer_id = generate_peer_id(anonymize);
        while state.nodes.contains_key(&peer_id) {
            peer_id = generate_peer_id(anonymize);
        }

        state.nodes.insert(
            peer_id.clone(),
            Node {
                events,
                links: HashSet::new(),
                relayed: anonymize,
            },
        );
        *self.local.lock() = Some(peer_id.clone());

        debug!("{} registered as {}", profile.nickname, peer_id);
        Ok(peer_id)
    }

    async fn open(&self, remote: &str) -> Result<(), TransportError> {
        let local = self.local_id()?;

        let latency = {
            let mut state = self.network.state.lock();
            *state
                .dials
                .entry((local.clone(), remote.to_string()))
                .or_insert(0) += 1;
            state.dial_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.network.state.lock();
        if !state.nodes.contains_key(remote) {
            return Err(TransportError::PeerNotFound(remote.to_string()));
        }
        if let Some(node) = state.nodes.get_mut(&local) {
            node.links.insert(remote.to_string());
        }
        if let Some(node) = state.nodes.get_mut(remote) {
            node.links.insert(local.clone());
        }

        trace!("{} opened channel to {}", local, remote);
        Ok(())
    }

    fn transmit(&self, remote: &str, frame: WireFrame) -> Result<(), TransportError> {
        let local = self.local_id()?;
        let bytes =
            encode_frame(&frame).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        let frame =
            decode_frame(&bytes).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        trace!("{} -> {}: {} bytes", local, remote, bytes.len());

        let state = self.network.state.lock();

        let linked = state
            .nodes
            .get(&local)
            .map(|node| node.links.contains(remote))
            .unwrap_or(false);
        if !linked {
            return Err(TransportError::ChannelNotOpen(remote.to_string()));
        }

        let node = state
            .nodes
            .get(remote)
            .ok_or_else(|| TransportError::PeerNotFound(remote.to_string()))?;
        node.events
            .send(BackendEvent::Frame { from: local, frame })
            .map_err(|_| TransportError::SendFailed(remote.to_string()))
    }

    async fn close(&self, remote: &str) {
        let Ok(local) = self.local_id() else {
            return;
        };

        let mut state = self.network.state.lock();
        unlink(&mut state, &local, remote);
        if let Some(node) = state.nodes.get(remote) {
            let _ = node.events.send(BackendEvent::Closed { peer_id: local });
        }
    }

    async fn deregister(&self) {
        let Some(local) = self.local.lock().take() else {
            return;
        };

        let mut state = self.network.state.lock();
        if let Some(node) = state.nodes.remove(&local) {
            for remote in node.links {
                if let Some(other) = state.nodes.get_mut(&remote) {
                    other.links.remove(&local);
                    let _ = other.events.send(BackendEvent::Closed {
                        peer_id: local.clone(),
                    });
                }
            }
        }
        debug!("{} left the directory", local);
    }
}
