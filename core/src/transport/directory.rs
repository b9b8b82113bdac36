//! Rendezvous directory node
//!
//! Peers register here before any direct channel exists. The directory
//! answers Kademlia lookups with the addresses peers reported through
//! identify, and relays circuits for peers that hide their address.
//!
//! Every peer also holds a relay reservation here. Lookups return a peer's
//! direct addresses when it has any and its circuit address otherwise, so
//! anonymized peers are only ever reached through the relay.

use super::behaviour::{is_relayed_addr, DirectoryBehaviour, DirectoryBehaviourEvent};
use anyhow::{Context, Result};
use futures::StreamExt;
use libp2p::{
    identify, identity::Keypair, multiaddr::Protocol, noise, swarm::SwarmEvent, tcp, yamux,
    Multiaddr, PeerId, Swarm,
};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Directory node settings
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Where the node keeps its identity key. Without one the node gets a new
    /// peer ID on every start.
    pub key_path: Option<PathBuf>,
}

/// A configured, not yet running directory
pub struct DirectoryNode {
    keypair: Keypair,
    port: u16,
}

impl DirectoryNode {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let keypair = match &config.key_path {
            Some(path) => load_or_generate_key(path)?,
            None => Keypair::generate_ed25519(),
        };
        Ok(Self {
            keypair,
            port: config.port,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.public().to_peer_id()
    }

    /// Run until the task is cancelled
    pub async fn run(self) -> Result<()> {
        let local_peer_id = self.peer_id();
        let mut swarm: Swarm<DirectoryBehaviour> =
            libp2p::SwarmBuilder::with_existing_identity(self.keypair)
                .with_tokio()
                .with_tcp(
                    tcp::Config::default().nodelay(true),
                    noise::Config::new,
                    yamux::Config::default,
                )?
                .with_behaviour(DirectoryBehaviour::new)?
                .with_swarm_config(|cfg| {
                    cfg.with_idle_connection_timeout(Duration::from_secs(300))
                })
                .build();

        let listen: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", self.port).parse()?;
        swarm
            .listen_on(listen)
            .context("Failed to listen for peers")?;

        info!("Directory {} started on tcp/{}", local_peer_id, self.port);

        loop {
            match swarm.select_next_some().await {
                SwarmEvent::NewListenAddr { address, .. } => {
                    // Relay reservations must carry at least one address
                    swarm.add_external_address(address.clone());
                    info!("Peers can register at {}", address.with(Protocol::P2p(local_peer_id)));
                }
                SwarmEvent::Behaviour(DirectoryBehaviourEvent::Identify(
                    identify::Event::Received { peer_id, info, .. },
                )) => {
                    for addr in published_addresses(info.listen_addrs) {
                        debug!("Peer {} reachable at {}", peer_id, addr);
                        swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                    }
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    info!("Peer registered: {}", peer_id);
                }
                SwarmEvent::ConnectionClosed {
                    peer_id,
                    num_established: 0,
                    ..
                } => {
                    info!("Peer left: {}", peer_id);
                    swarm.behaviour_mut().kademlia.remove_peer(&peer_id);
                }
                _ => {}
            }
        }
    }
}

/// Direct addresses when a peer has any, otherwise its circuit addresses
fn published_addresses(listen_addrs: Vec<Multiaddr>) -> Vec<Multiaddr> {
    let (relayed, direct): (Vec<_>, Vec<_>) =
        listen_addrs.into_iter().partition(is_relayed_addr);
    if direct.is_empty() {
        relayed
    } else {
        direct
    }
}

fn load_or_generate_key(path: &PathBuf) -> Result<Keypair> {
    if path.exists() {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .context("Failed to decode directory identity key")?;
        info!("Loaded directory identity from {}", path.display());
        return Ok(keypair);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let keypair = Keypair::generate_ed25519();
    let encoded = keypair
        .to_protobuf_encoding()
        .context("Failed to encode directory identity key")?;
    fs::write(path, encoded)?;
    info!("Generated directory identity at {}", path.display());
    Ok(keypair)
}
