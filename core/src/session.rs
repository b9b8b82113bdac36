//! Session — the service object an orchestrator drives
//!
//! A `Session` owns one transport and wires it to the room store, the
//! privacy gate, the invite protocol, the router and call signaling. Inbound
//! transport events are handled one at a time by a single event loop task;
//! everything the user should see comes out of the `SessionEvent` channel
//! returned by `Session::new`.

use crate::call::{CallEvent, CallSignaling, CallState, MediaDevices};
use crate::message::{Body, DeliveredMessage, RoomType, SenderInfo};
use crate::privacy::PrivacyPolicy;
use crate::routing::{
    InviteOutcome, InviteProtocol, MessageRouter, RouteOutcome, SendReport,
};
use crate::settings::SessionSettings;
use crate::store::{Room, RoomStore};
use crate::transport::{ChannelBackend, PeerTransport, TransportError, TransportEvent};
use crate::CoreError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the orchestrator is told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Registered on the network under this peer ID
    Ready(String),
    RoomCreated(Room),
    RoomStatusChanged { room_id: String, connected: bool },
    MessageDelivered(DeliveredMessage),
    /// An admitted call is waiting for `answer_call`
    IncomingCall { peer_id: String, call_id: String },
    CallStateChanged { peer_id: String, state: CallState },
    PeerConnected {
        peer_id: String,
        metadata: Option<SenderInfo>,
    },
    PeerDisconnected(String),
}

impl From<CallEvent> for SessionEvent {
    fn from(event: CallEvent) -> Self {
        match event {
            CallEvent::Incoming { peer_id, call_id } => SessionEvent::IncomingCall { peer_id, call_id },
            CallEvent::StateChanged { peer_id, state, .. } => {
                SessionEvent::CallStateChanged { peer_id, state }
            }
        }
    }
}

/// Receiving end of a session's events
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

struct PendingStreams {
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    calls: mpsc::UnboundedReceiver<CallEvent>,
}

#[derive(Clone)]
pub struct Session {
    transport: PeerTransport,
    rooms: RoomStore,
    settings: Arc<RwLock<SessionSettings>>,
    policy: Arc<RwLock<PrivacyPolicy>>,
    invites: InviteProtocol,
    router: MessageRouter,
    calls: CallSignaling,
    events: mpsc::UnboundedSender<SessionEvent>,
    pending: Arc<Mutex<Option<PendingStreams>>>,
    event_loop: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Session {
    /// Build a session over `backend`. Nothing touches the network until `start`.
    pub fn new(
        backend: Arc<dyn ChannelBackend>,
        media: Arc<dyn MediaDevices>,
        settings: SessionSettings,
    ) -> Result<(Self, SessionEvents), CoreError> {
        settings.validate()?;

        let (transport, transport_rx) = PeerTransport::new(backend);
        let transport = transport.with_connect_timeout(settings.connect_timeout);
        let rooms = RoomStore::new();
        let policy = Arc::new(RwLock::new(settings.privacy));

        let invites = InviteProtocol::new(transport.clone(), rooms.clone(), policy.clone());
        let router = MessageRouter::new(
            transport.clone(),
            rooms.clone(),
            policy.clone(),
            invites.clone(),
        );
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let calls = CallSignaling::new(transport.clone(), media, policy.clone(), call_tx);

        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            transport,
            rooms,
            settings: Arc::new(RwLock::new(settings)),
            policy,
            invites,
            router,
            calls,
            events,
            pending: Arc::new(Mutex::new(Some(PendingStreams {
                transport: transport_rx,
                calls: call_rx,
            }))),
            event_loop: Arc::new(Mutex::new(None)),
        };
        Ok((session, events_rx))
    }

    // ------------------------------------------------------------------------
    // LIFECYCLE
    // ------------------------------------------------------------------------

    /// Register on the network and start handling inbound events
    pub async fn start(&self) -> Result<String, CoreError> {
        let (profile, anonymize) = {
            let settings = self.settings.read();
            (settings.profile(), settings.anonymize)
        };
        let peer_id = self.transport.initialize(profile, anonymize).await?;

        if let Some(streams) = self.pending.lock().take() {
            let handle = tokio::spawn(self.clone().run(streams));
            *self.event_loop.lock() = Some(handle);
        }

        info!("Session ready as {}", peer_id);
        self.emit(SessionEvent::Ready(peer_id.clone()));
        Ok(peer_id)
    }

    /// Hang up, close every channel and leave the network
    pub async fn shutdown(&self) {
        if self.calls.in_call() {
            let _ = self.calls.end_call();
        }
        self.transport.teardown().await;
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        info!("Session shut down");
    }

    /// Switch anonymized routing. Tears the registration down and registers
    /// again, which closes every channel and yields a new peer ID.
    pub async fn set_anonymize(&self, anonymize: bool) -> Result<String, CoreError> {
        let old_peer_id = self
            .transport
            .local_peer_id()
            .ok_or(TransportError::NotInitialized)?;
        if self.settings.read().anonymize == anonymize {
            return Ok(old_peer_id);
        }

        if self.calls.in_call() {
            let _ = self.calls.end_call();
        }
        self.transport.teardown().await;

        let profile = {
            let mut settings = self.settings.write();
            settings.anonymize = anonymize;
            settings.profile()
        };
        let peer_id = self.transport.initialize(profile, anonymize).await?;
        self.rooms.rehost(&old_peer_id, &peer_id);

        info!(
            "Re-registered as {} (anonymized: {}), was {}",
            peer_id, anonymize, old_peer_id
        );
        self.emit(SessionEvent::Ready(peer_id.clone()));
        Ok(peer_id)
    }

    // ------------------------------------------------------------------------
    // ROOMS
    // ------------------------------------------------------------------------

    /// Host a new group or channel
    pub fn create_room(
        &self,
        name: &str,
        description: &str,
        room_type: RoomType,
    ) -> Result<Room, CoreError> {
        let local = self
            .transport
            .local_peer_id()
            .ok_or(TransportError::NotInitialized)?;
        let room = Room::hosted(name, description, room_type, &local);
        self.rooms.create(room.clone());
        self.emit(SessionEvent::RoomCreated(room.clone()));
        Ok(room)
    }

    /// Invite a peer into a room we host
    pub async fn invite(&self, room_id: &str, peer_id: &str) -> Result<(), CoreError> {
        self.invites.send_invite(room_id, peer_id).await?;
        Ok(())
    }

    /// Connect to a peer and open the direct room with it
    pub async fn open_direct(&self, peer_id: &str) -> Result<Room, CoreError> {
        let profile = self.local_profile()?;
        if !self.transport.connect(peer_id, profile).await {
            return Err(CoreError::Unreachable(peer_id.to_string()));
        }

        let name = self
            .transport
            .registry()
            .metadata(peer_id)
            .map(|info| info.nickname);
        let room = Room::direct(peer_id, name, true);
        if self.rooms.create(room.clone()) {
            self.emit(SessionEvent::RoomCreated(room.clone()));
        } else {
            self.set_peer_status(peer_id, true);
        }

        self.rooms
            .get(&room.id)
            .ok_or(CoreError::UnknownRoom(room.id))
    }

    /// Manually reconnect a room's peers. Returns true if all are reachable.
    pub async fn reconnect(&self, room_id: &str) -> Result<bool, CoreError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CoreError::UnknownRoom(room_id.to_string()))?;
        let profile = self.local_profile()?;

        let targets = if room.is_admin {
            room.participants.clone()
        } else {
            vec![room.peer_id.clone()]
        };

        let mut all_connected = true;
        for peer_id in targets {
            if self.transport.connect(&peer_id, profile.clone()).await {
                self.set_peer_status(&peer_id, true);
            } else {
                all_connected = false;
            }
        }
        Ok(all_connected)
    }

    /// Send text into a room
    pub fn send(&self, room_id: &str, text: &str) -> Result<SendReport, CoreError> {
        Ok(self.router.send(room_id, Body::Text(text.to_string()))?)
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.list()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id)
    }

    // ------------------------------------------------------------------------
    // CALLS
    // ------------------------------------------------------------------------

    pub async fn start_call(&self, peer_id: &str) -> Result<String, CoreError> {
        Ok(self.calls.start_call(peer_id).await?)
    }

    pub async fn answer_call(&self, accept: bool) -> Result<(), CoreError> {
        Ok(self.calls.answer(accept).await?)
    }

    pub fn end_call(&self) -> Result<(), CoreError> {
        Ok(self.calls.end_call()?)
    }

    pub fn call_state(&self) -> CallState {
        self.calls.state()
    }

    // ------------------------------------------------------------------------
    // SETTINGS & STATUS
    // ------------------------------------------------------------------------

    pub fn update_privacy(&self, policy: PrivacyPolicy) {
        *self.policy.write() = policy;
        self.settings.write().privacy = policy;
        debug!("Privacy policy updated: {:?}", policy);
    }

    pub fn privacy(&self) -> PrivacyPolicy {
        *self.policy.read()
    }

    pub fn local_peer_id(&self) -> Option<String> {
        self.transport.local_peer_id()
    }

    pub fn is_anonymized(&self) -> bool {
        self.settings.read().anonymize
    }

    /// Whether the channel to a peer is open
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.transport.is_open(peer_id)
    }

    fn local_profile(&self) -> Result<SenderInfo, CoreError> {
        self.transport
            .identity()
            .map(|identity| identity.sender_info())
            .ok_or(CoreError::Transport(TransportError::NotInitialized))
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_peer_status(&self, peer_id: &str, connected: bool) {
        for room_id in self.rooms.update_connection_state(peer_id, connected) {
            self.emit(SessionEvent::RoomStatusChanged { room_id, connected });
        }
    }

    // ------------------------------------------------------------------------
    // EVENT LOOP
    // ------------------------------------------------------------------------

    async fn run(self, mut streams: PendingStreams) {
        loop {
            tokio::select! {
                event = streams.transport.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => break,
                },
                Some(event) = streams.calls.recv() => self.emit(event.into()),
            }
        }
        debug!("Session event loop stopped");
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        debug!("Transport event: {}", event);
        match event {
            TransportEvent::ConnectionOpened { peer_id, metadata } => {
                self.set_peer_status(&peer_id, true);
                self.emit(SessionEvent::PeerConnected { peer_id, metadata });
            }

            TransportEvent::ConnectionClosed { peer_id } => {
                self.set_peer_status(&peer_id, false);
                self.calls.handle_remote_close(&peer_id, None);
                self.emit(SessionEvent::PeerDisconnected(peer_id));
            }

            TransportEvent::InboundPayload { peer_id, envelope } => {
                match self.router.handle_inbound(&peer_id, envelope) {
                    RouteOutcome::Delivered {
                        message,
                        created_room,
                        ..
                    } => {
                        if let Some(room) = created_room {
                            self.emit(SessionEvent::RoomCreated(room));
                        }
                        self.emit(SessionEvent::MessageDelivered(message));
                    }
                    RouteOutcome::Invite(InviteOutcome::Created(room)) => {
                        self.emit(SessionEvent::RoomCreated(room.clone()));
                        self.join_host(room);
                    }
                    RouteOutcome::Invite(_) | RouteOutcome::Dropped => {}
                }
            }

            TransportEvent::IncomingCallOffer { peer_id, offer } => {
                self.calls.handle_offer(&peer_id, offer);
            }

            TransportEvent::CallAnswered {
                peer_id,
                call_id,
                media,
            } => {
                self.calls.handle_answer(&peer_id, &call_id, media);
            }

            TransportEvent::CallClosed { peer_id, call_id } => {
                self.calls.handle_remote_close(&peer_id, Some(&call_id));
            }
        }
    }

    /// Connect back to the host of a room we were just invited to
    fn join_host(&self, room: Room) {
        let session = self.clone();
        tokio::spawn(async move {
            let Ok(profile) = session.local_profile() else {
                return;
            };
            if session.transport.connect(&room.peer_id, profile).await {
                session.set_peer_status(&room.peer_id, true);
            } else {
                warn!("Could not reach host {} of {}", room.peer_id, room.name);
            }
        });
    }
}
