// Combined NetworkBehaviours for Ghostlink
//
// Peers run `GhostlinkBehaviour`:
// - request_response: frame delivery over a direct or relayed connection
// - kademlia: peer lookup against the rendezvous directory
// - identify: exchange listen addresses
// - relay_client: circuit addressing when anonymized
// - ping: keep idle channels alive
//
// The rendezvous directory runs `DirectoryBehaviour`: kademlia in server mode,
// a circuit relay server, identify and ping.

use crate::message::WireFrame;
use libp2p::{
    identify, kad,
    multiaddr::Protocol,
    ping, relay,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
    Multiaddr, PeerId, StreamProtocol,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol carrying `WireFrame`s between peers
pub const FRAME_PROTOCOL: &str = "/ghostlink/frame/1.0.0";

/// Identify protocol version shared by peers and the directory
pub const IDENTIFY_PROTOCOL: &str = "/ghostlink/id/1.0.0";

/// Longest a relayed channel may stay up
pub const MAX_CIRCUIT_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Whether an address routes through a circuit relay
pub fn is_relayed_addr(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Acknowledgement for a delivered frame. Carries no delivery guarantee to
/// the application; the transport is fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAck {
    pub accepted: bool,
}

/// The peer-side network behaviour.
#[derive(NetworkBehaviour)]
pub struct GhostlinkBehaviour {
    /// Frame delivery (request-response pattern)
    pub messaging: request_response::cbor::Behaviour<WireFrame, FrameAck>,
    /// Lookups against the directory
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Peer identification
    pub identify: identify::Behaviour,
    /// Circuit relay client
    pub relay_client: relay::client::Behaviour,
    pub ping: ping::Behaviour,
}

impl GhostlinkBehaviour {
    /// Create a new behaviour with the given keypair and the relay client
    /// produced by the swarm builder.
    pub fn new(keypair: &libp2p::identity::Keypair, relay_client: relay::client::Behaviour) -> Self {
        let peer_id = keypair.public().to_peer_id();

        let messaging = request_response::cbor::Behaviour::new(
            [(StreamProtocol::new(FRAME_PROTOCOL), ProtocolSupport::Full)],
            // Frames go out one at a time per peer, so a handful of streams suffices
            request_response::Config::default()
                .with_request_timeout(Duration::from_secs(30))
                .with_max_concurrent_streams(16),
        );

        let mut kademlia = kad::Behaviour::new(peer_id, kad::store::MemoryStore::new(peer_id));
        kademlia.set_mode(Some(kad::Mode::Client));

        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60)),
        );

        Self {
            messaging,
            kademlia,
            identify,
            relay_client,
            ping: ping::Behaviour::new(ping::Config::default()),
        }
    }
}

/// The rendezvous directory's network behaviour.
#[derive(NetworkBehaviour)]
pub struct DirectoryBehaviour {
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub relay: relay::Behaviour,
    pub ping: ping::Behaviour,
}

impl DirectoryBehaviour {
    pub fn new(keypair: &libp2p::identity::Keypair) -> Self {
        let peer_id: PeerId = keypair.public().to_peer_id();

        // Server mode so peers can be found
        let mut kademlia = kad::Behaviour::new(peer_id, kad::store::MemoryStore::new(peer_id));
        kademlia.set_mode(Some(kad::Mode::Server));

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            keypair.public(),
        ));

        Self {
            kademlia,
            identify,
            relay: relay::Behaviour::new(peer_id, relay_config()),
            ping: ping::Behaviour::new(ping::Config::default()),
        }
    }
}

/// Relay limits for the directory. Relayed channels carry whole
/// conversations, so circuits are neither capped in bytes nor cut after the
/// libp2p default of two minutes.
pub fn relay_config() -> relay::Config {
    relay::Config {
        max_circuits: 256,
        max_circuits_per_peer: 32,
        max_circuit_duration: MAX_CIRCUIT_DURATION,
        // 0 disables the byte limit
        max_circuit_bytes: 0,
        ..relay::Config::default()
    }
}
