//! Peer transport — local identity plus channels to remote peers
//!
//! `PeerTransport` sits on top of a `ChannelBackend`. It owns the connection
//! registry, coalesces concurrent connects to the same peer into a single
//! attempt, and turns raw backend events into `TransportEvent`s for the
//! session. Switching anonymized routing requires `teardown` followed by a
//! fresh `initialize`; the relay changes the advertised address.

use crate::identity::PeerIdentity;
use crate::message::{
    decode_offer, encode_offer, validate_envelope, Body, MediaDescriptor, MediaOffer,
    PayloadKind, SenderInfo, WireEnvelope, WireFrame,
};
use crate::transport::abstraction::{BackendEvent, ChannelBackend, TransportError, TransportEvent};
use crate::transport::registry::ConnectionRegistry;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ConnectAttempt = Shared<BoxFuture<'static, bool>>;

/// Channels to remote peers plus the local identity that owns them
#[derive(Clone)]
pub struct PeerTransport {
    backend: Arc<dyn ChannelBackend>,
    registry: ConnectionRegistry,
    identity: Arc<RwLock<Option<PeerIdentity>>>,
    /// In-flight connect attempts, one per peer, tagged with their generation
    pending: Arc<Mutex<HashMap<String, (u64, ConnectAttempt)>>>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
    connect_timeout: Option<Duration>,
}

impl PeerTransport {
    /// Create a transport over `backend`.
    ///
    /// The returned receiver yields every `TransportEvent` for the lifetime of
    /// the transport, across teardown/initialize cycles.
    pub fn new(backend: Arc<dyn ChannelBackend>) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            backend,
            registry: ConnectionRegistry::new(),
            identity: Arc::new(RwLock::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            events,
            pump: Arc::new(Mutex::new(None)),
            connect_timeout: None,
        };
        (transport, events_rx)
    }

    /// Bound every connect attempt by `timeout`. Without it attempts are unbounded.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    // ------------------------------------------------------------------------
    // LIFECYCLE
    // ------------------------------------------------------------------------

    /// Register with the directory and start listening for inbound channels
    pub async fn initialize(
        &self,
        profile: SenderInfo,
        anonymize: bool,
    ) -> Result<String, TransportError> {
        if self.identity.read().is_some() {
            return Err(TransportError::AlreadyInitialized);
        }

        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let peer_id = self.backend.register(&profile, anonymize, backend_tx).await?;

        *self.identity.write() = Some(PeerIdentity::new(peer_id.clone(), profile, anonymize));

        let pump = tokio::spawn(self.clone().run_pump(backend_rx));
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }

        info!("Transport initialized as {} (anonymized: {})", peer_id, anonymize);
        Ok(peer_id)
    }

    /// Close all channels and leave the directory
    pub async fn teardown(&self) {
        let Some(identity) = self.identity.write().take() else {
            return;
        };

        for peer_id in self.registry.open_peers() {
            self.backend.close(&peer_id).await;
        }
        self.backend.deregister().await;

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.pending.lock().clear();

        for peer_id in self.registry.close_all() {
            let _ = self.events.send(TransportEvent::ConnectionClosed { peer_id });
        }

        info!("Transport for {} torn down", identity.peer_id);
    }

    /// Local identity, once initialized
    pub fn identity(&self) -> Option<PeerIdentity> {
        self.identity.read().clone()
    }

    /// Local peer ID, once initialized
    pub fn local_peer_id(&self) -> Option<String> {
        self.identity.read().as_ref().map(|id| id.peer_id.clone())
    }

    /// Read-only view of connection state
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Check if the channel to a peer is Open
    pub fn is_open(&self, peer_id: &str) -> bool {
        self.registry.is_open(peer_id)
    }

    // ------------------------------------------------------------------------
    // CONNECTIONS
    // ------------------------------------------------------------------------

    /// Open a channel to `remote`, presenting `local_metadata`.
    ///
    /// Returns true immediately if the channel is already Open. Concurrent
    /// calls for the same peer share one underlying attempt and its result.
    pub async fn connect(&self, remote: &str, local_metadata: SenderInfo) -> bool {
        if self.registry.is_open(remote) {
            return true;
        }

        let attempt = {
            let mut pending = self.pending.lock();
            if let Some((_, existing)) = pending.get(remote) {
                debug!("Joining in-flight connect to {}", remote);
                existing.clone()
            } else {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let this = self.clone();
                let peer = remote.to_string();
                let attempt = async move {
                    let connected = this.dial(&peer, local_metadata, generation).await;
                    this.finish_attempt(&peer, generation);
                    connected
                }
                .boxed()
                .shared();
                pending.insert(remote.to_string(), (generation, attempt.clone()));
                attempt
            }
        };

        attempt.await
    }

    /// Whether `generation` is still the attempt registered for `remote`.
    /// A teardown in the middle of a dial makes the attempt stale.
    fn is_current(&self, remote: &str, generation: u64) -> bool {
        self.pending
            .lock()
            .get(remote)
            .is_some_and(|(current, _)| *current == generation)
    }

    fn finish_attempt(&self, remote: &str, generation: u64) {
        let mut pending = self.pending.lock();
        if pending
            .get(remote)
            .is_some_and(|(current, _)| *current == generation)
        {
            pending.remove(remote);
        }
    }

    async fn dial(&self, remote: &str, local_metadata: SenderInfo, generation: u64) -> bool {
        match self.local_peer_id() {
            None => {
                warn!("Cannot connect to {}: transport not initialized", remote);
                return false;
            }
            Some(local) if local == remote => {
                warn!("Refusing to connect to ourselves");
                return false;
            }
            Some(_) => {}
        }

        self.registry.mark_connecting(remote);

        let opened = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.backend.open(remote))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(remote.to_string()))),
            None => self.backend.open(remote).await,
        };

        if !self.is_current(remote, generation) {
            debug!("Discarding stale connect to {}", remote);
            return false;
        }

        if let Err(e) = opened {
            warn!("Connect to {} failed: {}", remote, e);
            if self.registry.mark_closed(remote) {
                let _ = self.events.send(TransportEvent::ConnectionClosed {
                    peer_id: remote.to_string(),
                });
            }
            return false;
        }

        if let Err(e) = self.backend.transmit(remote, WireFrame::Hello(local_metadata)) {
            warn!("Hello to {} failed: {}", remote, e);
        }

        if self.registry.mark_open(remote) {
            let _ = self.events.send(TransportEvent::ConnectionOpened {
                peer_id: remote.to_string(),
                metadata: None,
            });
        }

        self.registry.is_open(remote)
    }

    /// Close the channel to one peer
    pub async fn disconnect(&self, remote: &str) {
        self.backend.close(remote).await;
        if self.registry.mark_closed(remote) {
            let _ = self.events.send(TransportEvent::ConnectionClosed {
                peer_id: remote.to_string(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // SENDING
    // ------------------------------------------------------------------------

    /// Fire-and-forget delivery of one envelope.
    ///
    /// Fails locally if the channel is not Open; nothing is queued.
    pub fn send(&self, remote: &str, envelope: WireEnvelope) -> Result<(), TransportError> {
        validate_envelope(&envelope).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        self.transmit(remote, WireFrame::Payload(envelope))
    }

    /// Offer a call to a peer
    pub fn offer_call(&self, remote: &str, offer: &MediaOffer) -> Result<(), TransportError> {
        let body = encode_offer(offer).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        let envelope = WireEnvelope {
            kind: PayloadKind::CallOffer,
            room_id: None,
            sender_info: self.identity().map(|id| id.sender_info()),
            body: Body::Binary(body),
        };
        self.transmit(remote, WireFrame::Payload(envelope))
    }

    /// Accept a call, attaching our media
    pub fn answer_call(
        &self,
        remote: &str,
        call_id: &str,
        media: MediaDescriptor,
    ) -> Result<(), TransportError> {
        self.transmit(
            remote,
            WireFrame::CallAnswer {
                call_id: call_id.to_string(),
                media,
            },
        )
    }

    /// Hang up or refuse a call
    pub fn close_call(&self, remote: &str, call_id: &str) -> Result<(), TransportError> {
        self.transmit(
            remote,
            WireFrame::CallClose {
                call_id: call_id.to_string(),
            },
        )
    }

    fn transmit(&self, remote: &str, frame: WireFrame) -> Result<(), TransportError> {
        if !self.registry.is_open(remote) {
            warn!("Dropping {} to {}: channel not open", frame, remote);
            return Err(TransportError::ChannelNotOpen(remote.to_string()));
        }

        self.backend.transmit(remote, frame).map_err(|e| {
            warn!("Send to {} failed: {}", remote, e);
            e
        })
    }

    // ------------------------------------------------------------------------
    // INBOUND
    // ------------------------------------------------------------------------

    async fn run_pump(self, mut backend_rx: mpsc::UnboundedReceiver<BackendEvent>) {
        while let Some(event) = backend_rx.recv().await {
            self.handle_backend_event(event);
        }
        debug!("Backend event stream ended");
    }

    fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::Frame { from, frame } => self.handle_frame(from, frame),
            BackendEvent::Closed { peer_id } => {
                if self.registry.mark_closed(&peer_id) {
                    let _ = self.events.send(TransportEvent::ConnectionClosed { peer_id });
                }
            }
        }
    }

    fn handle_frame(&self, from: String, frame: WireFrame) {
        let event = match frame {
            WireFrame::Hello(metadata) => {
                if !self.registry.accept_inbound(&from, metadata.clone()) {
                    return;
                }
                TransportEvent::ConnectionOpened {
                    peer_id: from,
                    metadata: Some(metadata),
                }
            }
            WireFrame::Payload(envelope) if envelope.kind == PayloadKind::CallOffer => {
                let offer = match &envelope.body {
                    Body::Binary(bytes) => decode_offer(bytes),
                    Body::Text(_) => Err(anyhow::anyhow!("call offer with text body")),
                };
                match offer {
                    Ok(offer) => TransportEvent::IncomingCallOffer { peer_id: from, offer },
                    Err(e) => {
                        warn!("Malformed call offer from {}: {}", from, e);
                        return;
                    }
                }
            }
            WireFrame::Payload(envelope) => TransportEvent::InboundPayload {
                peer_id: from,
                envelope,
            },
            WireFrame::CallAnswer { call_id, media } => TransportEvent::CallAnswered {
                peer_id: from,
                call_id,
                media,
            },
            WireFrame::CallClose { call_id } => TransportEvent::CallClosed {
                peer_id: from,
                call_id,
            },
        };

        let _ = self.events.send(event);
    }
}
