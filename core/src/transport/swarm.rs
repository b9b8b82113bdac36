// libp2p channel backend — the running network node behind a PeerTransport
//
// Each `register` builds a fresh swarm with a fresh keypair, so every
// registration yields a new peer ID. The swarm runs on its own task; the
// backend talks to it through `SwarmCommand`s and the task reports inbound
// frames and closes as `BackendEvent`s.
//
// - TCP + Noise + Yamux, plus the relay client transport
// - Every peer holds a reservation at the directory's relay so anonymized
//   peers can reach it
// - Plain mode: Kademlia lookups against the directory, then direct dials
// - Anonymized mode: no lookups, dial only `<directory>/p2p-circuit/p2p/<peer>`,
//   and close any connection to a peer that is not relayed
// - Frames to one peer go out one at a time, in transmit order

use super::behaviour::{is_relayed_addr, FrameAck, GhostlinkBehaviour, GhostlinkBehaviourEvent};
use crate::message::{SenderInfo, WireFrame};
use crate::transport::abstraction::{BackendEvent, ChannelBackend, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    core::ConnectedPoint,
    identify,
    identity::Keypair,
    kad,
    multiaddr::Protocol,
    noise,
    request_response::{self, OutboundRequestId},
    swarm::{dial_opts::DialOpts, ConnectionId, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long `register` waits for the directory connection
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the swarm finds the directory and which port it listens on
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Full directory multiaddr, including the trailing `/p2p/<id>`
    pub directory: Multiaddr,
    /// TCP port for direct inbound channels; 0 picks any
    pub listen_port: u16,
}

/// Commands that can be sent to the swarm task
#[derive(Debug)]
enum SwarmCommand {
    /// Open a channel to a peer, replying once a connection is established
    Open {
        peer_id: PeerId,
        reply: mpsc::Sender<Result<(), TransportError>>,
    },
    /// Queue one frame
    Transmit { peer_id: PeerId, frame: WireFrame },
    /// Drop every connection to a peer
    Close { peer_id: PeerId },
    /// Addresses of the live connections to a peer
    Routes {
        peer_id: PeerId,
        reply: mpsc::Sender<Vec<Multiaddr>>,
    },
    /// Shut down the swarm
    Shutdown,
}

/// Handle to communicate with the running swarm task
#[derive(Clone)]
struct SwarmHandle {
    command_tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmHandle {
    fn send(&self, command: SwarmCommand) -> Result<(), TransportError> {
        self.command_tx
            .send(command)
            .map_err(|_| TransportError::Internal("Swarm task not running".into()))
    }
}

/// `ChannelBackend` over a libp2p swarm
pub struct SwarmBackend {
    config: SwarmConfig,
    handle: Mutex<Option<SwarmHandle>>,
}

impl SwarmBackend {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> Result<SwarmHandle, TransportError> {
        self.handle.lock().clone().ok_or(TransportError::NotInitialized)
    }

    /// Remote addresses of the live connections to `remote`. A relayed
    /// connection shows its `/p2p-circuit` address.
    pub async fn routes(&self, remote: &str) -> Result<Vec<Multiaddr>, TransportError> {
        let peer_id = parse_peer(remote)?;
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.handle()?.send(SwarmCommand::Routes {
            peer_id,
            reply: reply_tx,
        })?;
        reply_rx
            .recv()
            .await
            .ok_or_else(|| TransportError::Internal("No reply from swarm".into()))
    }
}

fn parse_peer(remote: &str) -> Result<PeerId, TransportError> {
    remote
        .parse::<PeerId>()
        .map_err(|_| TransportError::PeerNotFound(remote.to_string()))
}

/// Split a directory multiaddr into its peer ID and the address without `/p2p`
fn split_directory(addr: &Multiaddr) -> Result<(PeerId, Multiaddr), TransportError> {
    let mut base = addr.clone();
    match base.pop() {
        Some(Protocol::P2p(peer_id)) => Ok((peer_id, base)),
        _ => Err(TransportError::Connect(format!(
            "directory address {} must end with /p2p/<peer id>",
            addr
        ))),
    }
}

/// The address a connection runs over, as seen from this side
fn route_of(endpoint: &ConnectedPoint) -> Multiaddr {
    match endpoint {
        ConnectedPoint::Dialer { address, .. } => address.clone(),
        ConnectedPoint::Listener {
            local_addr,
            send_back_addr,
        } => {
            if is_relayed_addr(local_addr) {
                local_addr.clone()
            } else {
                send_back_addr.clone()
            }
        }
    }
}

fn build_swarm(keypair: Keypair) -> Result<Swarm<GhostlinkBehaviour>, TransportError> {
    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| TransportError::Internal(e.to_string()))?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(|e| TransportError::Internal(e.to_string()))?
        .with_behaviour(|key, relay_client| GhostlinkBehaviour::new(key, relay_client))
        .map_err(|e| TransportError::Internal(e.to_string()))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(300)))
        .build();
    Ok(swarm)
}

/// Drive the swarm until the directory connection is established
async fn await_directory(
    swarm: &mut Swarm<GhostlinkBehaviour>,
    directory: PeerId,
) -> Result<(), TransportError> {
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::ConnectionEstablished { peer_id, .. } if peer_id == directory => {
                return Ok(());
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } if peer_id == directory => {
                return Err(TransportError::Connect(error.to_string()));
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ChannelBackend for SwarmBackend {
    async fn register(
        &self,
        profile: &SenderInfo,
        anonymize: bool,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Result<String, TransportError> {
        if self.handle.lock().is_some() {
            return Err(TransportError::AlreadyInitialized);
        }

        let (directory_id, directory_base) = split_directory(&self.config.directory)?;
        let keypair = Keypair::generate_ed25519();
        let local_peer_id = keypair.public().to_peer_id();
        let mut swarm = build_swarm(keypair)?;

        swarm
            .behaviour_mut()
            .kademlia
            .add_address(&directory_id, directory_base);

        if !anonymize {
            let listen: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", self.config.listen_port)
                .parse()
                .map_err(|e: libp2p::multiaddr::Error| TransportError::Internal(e.to_string()))?;
            swarm
                .listen_on(listen)
                .map_err(|e| TransportError::Internal(e.to_string()))?;
        }

        swarm
            .dial(self.config.directory.clone())
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tokio::time::timeout(DIRECTORY_TIMEOUT, await_directory(&mut swarm, directory_id))
            .await
            .map_err(|_| TransportError::Connect("directory did not answer".into()))??;

        // Reachable through the relay in both modes; only anonymized peers
        // are reachable through it alone
        let circuit = self.config.directory.clone().with(Protocol::P2pCircuit);
        swarm
            .listen_on(circuit.clone())
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !anonymize {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                debug!("Kademlia bootstrap skipped: {:?}", e);
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.handle.lock() = Some(SwarmHandle { command_tx });

        let node = SwarmNode {
            swarm,
            events,
            directory: directory_id,
            relay_base: anonymize.then_some(circuit),
            pending_opens: HashMap::new(),
            lookups: HashMap::new(),
            closing: HashSet::new(),
            refused: HashSet::new(),
            routes: HashMap::new(),
            outboxes: HashMap::new(),
        };
        tokio::spawn(node.run(command_rx));

        info!(
            "{} registered as {} via {}",
            profile.nickname, local_peer_id, self.config.directory
        );
        Ok(local_peer_id.to_string())
    }

    async fn open(&self, remote: &str) -> Result<(), TransportError> {
        let peer_id = parse_peer(remote)?;
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.handle()?.send(SwarmCommand::Open {
            peer_id,
            reply: reply_tx,
        })?;

        reply_rx
            .recv()
            .await
            .ok_or_else(|| TransportError::Internal("No reply from swarm".into()))?
    }

    fn transmit(&self, remote: &str, frame: WireFrame) -> Result<(), TransportError> {
        let peer_id = parse_peer(remote)?;
        self.handle()?
            .send(SwarmCommand::Transmit { peer_id, frame })
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self, remote: &str) {
        let (Ok(peer_id), Ok(handle)) = (parse_peer(remote), self.handle()) else {
            return;
        };
        let _ = handle.send(SwarmCommand::Close { peer_id });
    }

    async fn deregister(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.send(SwarmCommand::Shutdown);
        }
    }
}

/// Frames queued for one peer
#[derive(Default)]
struct Outbox {
    queue: VecDeque<WireFrame>,
    in_flight: Option<OutboundRequestId>,
}

/// State owned by the swarm task
struct SwarmNode {
    swarm: Swarm<GhostlinkBehaviour>,
    events: mpsc::UnboundedSender<BackendEvent>,
    directory: PeerId,
    /// `<directory>/p2p-circuit` when anonymized
    relay_base: Option<Multiaddr>,
    /// Callers waiting for a connection to a peer
    pending_opens: HashMap<PeerId, Vec<mpsc::Sender<Result<(), TransportError>>>>,
    /// Directory lookups in flight
    lookups: HashMap<kad::QueryId, PeerId>,
    /// Peers we disconnected ourselves
    closing: HashSet<PeerId>,
    /// Direct connections closed because we are anonymized
    refused: HashSet<ConnectionId>,
    /// Live connections per peer
    routes: HashMap<PeerId, HashMap<ConnectionId, Multiaddr>>,
    outboxes: HashMap<PeerId, Outbox>,
}

impl SwarmNode {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SwarmCommand>) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_event(event).await,
                command = command_rx.recv() => match command {
                    Some(SwarmCommand::Shutdown) | None => {
                        info!("Swarm shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
            }
        }
    }

    fn anonymized(&self) -> bool {
        self.relay_base.is_some()
    }

    async fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Open { peer_id, reply } => {
                if self.routes.get(&peer_id).is_some_and(|routes| !routes.is_empty()) {
                    let _ = reply.send(Ok(())).await;
                    return;
                }

                let waiters = self.pending_opens.entry(peer_id).or_default();
                waiters.push(reply);
                if waiters.len() > 1 {
                    return;
                }

                match self.relay_base.clone() {
                    Some(circuit) => {
                        // Only the circuit address; behaviours may not add direct ones
                        let addr = circuit.with(Protocol::P2p(peer_id));
                        let opts = DialOpts::peer_id(peer_id).addresses(vec![addr]).build();
                        if let Err(e) = self.swarm.dial(opts) {
                            self.fail_open(peer_id, e.to_string()).await;
                        }
                    }
                    None => {
                        let query = self.swarm.behaviour_mut().kademlia.get_closest_peers(peer_id);
                        self.lookups.insert(query, peer_id);
                    }
                }
            }

            SwarmCommand::Transmit { peer_id, frame } => {
                self.outboxes.entry(peer_id).or_default().queue.push_back(frame);
                self.flush(peer_id);
            }

            SwarmCommand::Close { peer_id } => {
                self.outboxes.remove(&peer_id);
                if self.swarm.disconnect_peer_id(peer_id).is_ok() {
                    self.closing.insert(peer_id);
                }
            }

            SwarmCommand::Routes { peer_id, reply } => {
                let routes = self
                    .routes
                    .get(&peer_id)
                    .map(|routes| routes.values().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(routes).await;
            }

            SwarmCommand::Shutdown => {}
        }
    }

    /// Send the next queued frame to `peer_id` unless one is still in flight
    fn flush(&mut self, peer_id: PeerId) {
        let Some(outbox) = self.outboxes.get_mut(&peer_id) else {
            return;
        };
        if outbox.in_flight.is_some() {
            return;
        }
        match outbox.queue.pop_front() {
            Some(frame) => {
                let request = self.swarm.behaviour_mut().messaging.send_request(&peer_id, frame);
                outbox.in_flight = Some(request);
            }
            None => {
                self.outboxes.remove(&peer_id);
            }
        }
    }

    /// The in-flight frame to `peer_id` finished, one way or the other
    fn frame_done(&mut self, peer_id: PeerId, request_id: OutboundRequestId) {
        let Some(outbox) = self.outboxes.get_mut(&peer_id) else {
            return;
        };
        if outbox.in_flight == Some(request_id) {
            outbox.in_flight = None;
            self.flush(peer_id);
        }
    }

    async fn fail_open(&mut self, peer_id: PeerId, reason: String) {
        warn!("Dial to {} failed: {}", peer_id, reason);
        for reply in self.pending_opens.remove(&peer_id).unwrap_or_default() {
            let _ = reply
                .send(Err(TransportError::ConnectionFailed(reason.clone())))
                .await;
        }
    }

    async fn handle_event(&mut self, event: SwarmEvent<GhostlinkBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(GhostlinkBehaviourEvent::Messaging(
                request_response::Event::Message { peer, message, .. },
            )) => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    let _ = self.events.send(BackendEvent::Frame {
                        from: peer.to_string(),
                        frame: request,
                    });
                    let _ = self
                        .swarm
                        .behaviour_mut()
                        .messaging
                        .send_response(channel, FrameAck { accepted: true });
                }
                request_response::Message::Response { request_id, .. } => {
                    self.frame_done(peer, request_id);
                }
            },

            SwarmEvent::Behaviour(GhostlinkBehaviourEvent::Messaging(
                request_response::Event::OutboundFailure {
                    peer,
                    request_id,
                    error,
                },
            )) => {
                warn!("Frame to {} was not delivered: {}", peer, error);
                self.frame_done(peer, request_id);
            }

            SwarmEvent::Behaviour(GhostlinkBehaviourEvent::Kademlia(
                kad::Event::OutboundQueryProgressed { id, .. },
            )) => {
                if let Some(peer_id) = self.lookups.remove(&id) {
                    debug!("Lookup for {} finished, dialing", peer_id);
                    if let Err(e) = self.swarm.dial(peer_id) {
                        self.fail_open(peer_id, e.to_string()).await;
                    }
                }
            }

            SwarmEvent::Behaviour(GhostlinkBehaviourEvent::Identify(
                identify::Event::Received { peer_id, info, .. },
            )) => {
                if !self.anonymized() {
                    for addr in info.listen_addrs {
                        self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                    }
                }
            }

            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }

            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let route = route_of(&endpoint);
                if self.anonymized() && peer_id != self.directory && !endpoint.is_relayed() {
                    warn!("Closing direct connection from {} via {}", peer_id, route);
                    self.refused.insert(connection_id);
                    self.swarm.close_connection(connection_id);
                    return;
                }

                debug!("Connected to {} via {}", peer_id, route);
                self.routes.entry(peer_id).or_default().insert(connection_id, route);
                self.closing.remove(&peer_id);
                for reply in self.pending_opens.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Ok(())).await;
                }
            }

            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if self.pending_opens.contains_key(&peer_id) {
                    self.fail_open(peer_id, error.to_string()).await;
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                connection_id,
                ..
            } => {
                if self.refused.remove(&connection_id) {
                    return;
                }
                if let Some(routes) = self.routes.get_mut(&peer_id) {
                    routes.remove(&connection_id);
                    if !routes.is_empty() {
                        return;
                    }
                }
                self.routes.remove(&peer_id);
                self.outboxes.remove(&peer_id);

                if peer_id == self.directory {
                    warn!("Lost connection to the directory");
                } else if !self.closing.remove(&peer_id) {
                    info!("Disconnected from {}", peer_id);
                    let _ = self.events.send(BackendEvent::Closed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            _ => {}
        }
    }
}
