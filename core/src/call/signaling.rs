//! Call signaling — one call at a time, offered and answered over an open channel
//!
//! Caller: Idle -> Offering -> Accepted -> Active -> Ended, or Rejected if the
//! callee refuses. Callee: Ringing -> Accepted -> Active -> Ended, or Rejected
//! on decline. Media capture and rendering belong to the `MediaDevices`
//! collaborator; this module only moves descriptors between the two sides.
//! The call object is dropped when it reaches a terminal state.

use crate::message::{MediaDescriptor, MediaOffer};
use crate::privacy::{admit_call, PrivacyPolicy};
use crate::transport::{PeerTransport, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Offering,
    Ringing,
    Accepted,
    Active,
    Ended,
    Rejected,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Rejected)
    }

    /// State reached when the remote side goes away
    fn after_remote_close(self) -> CallState {
        match self {
            CallState::Accepted | CallState::Active => CallState::Ended,
            _ => CallState::Rejected,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Offering => "offering",
            CallState::Ringing => "ringing",
            CallState::Accepted => "accepted",
            CallState::Active => "active",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// The call in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub call_id: String,
    pub peer_id: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub local_media: Option<MediaDescriptor>,
    pub remote_media: Option<MediaDescriptor>,
}

/// What the local side asks the media collaborator for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media permission denied")]
    PermissionDenied,

    #[error("Media unavailable: {0}")]
    Unavailable(String),
}

/// Local capture and remote rendering
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Start capturing local media
    async fn acquire_local(&self, constraints: MediaConstraints) -> Result<MediaDescriptor, MediaError>;

    /// Render the remote side's media
    fn attach_remote(&self, peer_id: &str, media: &MediaDescriptor);

    /// Stop capturing local media
    fn release_local(&self, media: &MediaDescriptor);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("No open channel to {0}")]
    NotConnected(String),

    #[error("Another call is in progress")]
    Busy,

    #[error("No call in progress")]
    NoCall,

    #[error("The call is not ringing")]
    NotRinging,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Notifications for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// An admitted offer is waiting for the user's decision
    Incoming { peer_id: String, call_id: String },
    StateChanged {
        peer_id: String,
        call_id: String,
        state: CallState,
    },
}

/// What became of an inbound offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Ringing,
    /// Calls are disabled; closed without asking the user
    Denied,
    /// Another call is in progress; closed
    Busy,
}

#[derive(Clone)]
pub struct CallSignaling {
    transport: PeerTransport,
    media: Arc<dyn MediaDevices>,
    policy: Arc<RwLock<PrivacyPolicy>>,
    constraints: MediaConstraints,
    call: Arc<Mutex<Option<Call>>>,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl CallSignaling {
    pub fn new(
        transport: PeerTransport,
        media: Arc<dyn MediaDevices>,
        policy: Arc<RwLock<PrivacyPolicy>>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            transport,
            media,
            policy,
            constraints: MediaConstraints::default(),
            call: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// State of the current call, `Idle` when there is none
    pub fn state(&self) -> CallState {
        self.call
            .lock()
            .as_ref()
            .map(|call| call.state)
            .unwrap_or(CallState::Idle)
    }

    /// Whether a call occupies the slot. True from the start of `start_call`,
    /// including while local media is still being acquired.
    pub fn in_call(&self) -> bool {
        self.call.lock().is_some()
    }

    pub fn current(&self) -> Option<Call> {
        self.call.lock().clone()
    }

    fn emit(&self, peer_id: &str, call_id: &str, state: CallState) {
        let _ = self.events.send(CallEvent::StateChanged {
            peer_id: peer_id.to_string(),
            call_id: call_id.to_string(),
            state,
        });
    }

    /// Move the call with `call_id` to `state`, returning the updated call
    fn advance(&self, call_id: &str, state: CallState) -> Option<Call> {
        let mut slot = self.call.lock();
        let call = slot.as_mut().filter(|call| call.call_id == call_id)?;
        call.state = state;
        let snapshot = call.clone();
        if state.is_terminal() {
            *slot = None;
        }
        Some(snapshot)
    }

    fn finish(&self, call_id: &str, state: CallState) {
        if let Some(call) = self.advance(call_id, state) {
            if let Some(media) = &call.local_media {
                self.media.release_local(media);
            }
            info!("Call {} with {} {}", call.call_id, call.peer_id, state);
            self.emit(&call.peer_id, &call.call_id, state);
        }
    }

    // ------------------------------------------------------------------------
    // CALLER
    // ------------------------------------------------------------------------

    /// Offer a call to a connected peer. Returns the call ID.
    pub async fn start_call(&self, peer_id: &str) -> Result<String, CallError> {
        if !self.transport.is_open(peer_id) {
            return Err(CallError::NotConnected(peer_id.to_string()));
        }

        let call_id = uuid::Uuid::new_v4().to_string();
        {
            let mut slot = self.call.lock();
            if slot.is_some() {
                return Err(CallError::Busy);
            }
            *slot = Some(Call {
                call_id: call_id.clone(),
                peer_id: peer_id.to_string(),
                direction: CallDirection::Outgoing,
                state: CallState::Idle,
                local_media: None,
                remote_media: None,
            });
        }

        let local = match self.media.acquire_local(self.constraints).await {
            Ok(local) => local,
            Err(e) => {
                warn!("Could not acquire media for call to {}: {}", peer_id, e);
                self.finish(&call_id, CallState::Ended);
                return Err(CallError::Media(e));
            }
        };

        let offering = {
            let mut slot = self.call.lock();
            match slot.as_mut().filter(|call| call.call_id == call_id) {
                Some(call) => {
                    call.local_media = Some(local.clone());
                    call.state = CallState::Offering;
                    true
                }
                None => false,
            }
        };
        if !offering {
            // Ended while media was being acquired
            self.media.release_local(&local);
            return Err(CallError::NoCall);
        }
        self.emit(peer_id, &call_id, CallState::Offering);

        let offer = MediaOffer {
            call_id: call_id.clone(),
            media: local,
        };
        if let Err(e) = self.transport.offer_call(peer_id, &offer) {
            self.finish(&call_id, CallState::Ended);
            return Err(CallError::Transport(e));
        }

        info!("Calling {} ({})", peer_id, call_id);
        Ok(call_id)
    }

    /// The callee accepted our offer
    pub fn handle_answer(&self, peer_id: &str, call_id: &str, media: MediaDescriptor) {
        let accepted = {
            let mut slot = self.call.lock();
            match slot.as_mut() {
                Some(call)
                    if call.call_id == call_id
                        && call.peer_id == peer_id
                        && call.state == CallState::Offering =>
                {
                    call.state = CallState::Accepted;
                    call.remote_media = Some(media.clone());
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            debug!("Ignoring answer {} from {}", call_id, peer_id);
            return;
        }
        self.emit(peer_id, call_id, CallState::Accepted);

        self.media.attach_remote(peer_id, &media);
        if self.advance(call_id, CallState::Active).is_some() {
            self.emit(peer_id, call_id, CallState::Active);
        }
    }

    // ------------------------------------------------------------------------
    // CALLEE
    // ------------------------------------------------------------------------

    /// An offer arrived. Gated on the privacy policy before any media is touched.
    pub fn handle_offer(&self, peer_id: &str, offer: MediaOffer) -> OfferOutcome {
        let policy = *self.policy.read();
        if !admit_call(&policy, peer_id).is_admitted() {
            let _ = self.transport.close_call(peer_id, &offer.call_id);
            return OfferOutcome::Denied;
        }

        {
            let mut slot = self.call.lock();
            if slot.is_some() {
                drop(slot);
                debug!("Busy; refusing call {} from {}", offer.call_id, peer_id);
                let _ = self.transport.close_call(peer_id, &offer.call_id);
                return OfferOutcome::Busy;
            }
            *slot = Some(Call {
                call_id: offer.call_id.clone(),
                peer_id: peer_id.to_string(),
                direction: CallDirection::Incoming,
                state: CallState::Ringing,
                local_media: None,
                remote_media: Some(offer.media),
            });
        }

        info!("Incoming call {} from {}", offer.call_id, peer_id);
        let _ = self.events.send(CallEvent::Incoming {
            peer_id: peer_id.to_string(),
            call_id: offer.call_id.clone(),
        });
        self.emit(peer_id, &offer.call_id, CallState::Ringing);
        OfferOutcome::Ringing
    }

    /// The user's decision on a ringing call
    pub async fn answer(&self, accept: bool) -> Result<(), CallError> {
        let call = self.current().ok_or(CallError::NoCall)?;
        if call.state != CallState::Ringing {
            return Err(CallError::NotRinging);
        }

        if !accept {
            let _ = self.transport.close_call(&call.peer_id, &call.call_id);
            self.finish(&call.call_id, CallState::Rejected);
            return Ok(());
        }

        let local = match self.media.acquire_local(self.constraints).await {
            Ok(local) => local,
            Err(e) => {
                warn!("Could not acquire media to answer {}: {}", call.peer_id, e);
                let _ = self.transport.close_call(&call.peer_id, &call.call_id);
                self.finish(&call.call_id, CallState::Ended);
                return Err(CallError::Media(e));
            }
        };

        let accepted = {
            let mut slot = self.call.lock();
            match slot
                .as_mut()
                .filter(|c| c.call_id == call.call_id && c.state == CallState::Ringing)
            {
                Some(c) => {
                    c.state = CallState::Accepted;
                    c.local_media = Some(local.clone());
                    true
                }
                None => false,
            }
        };
        if !accepted {
            // Caller hung up while media was being acquired
            self.media.release_local(&local);
            return Err(CallError::NoCall);
        }
        self.emit(&call.peer_id, &call.call_id, CallState::Accepted);

        if let Err(e) = self.transport.answer_call(&call.peer_id, &call.call_id, local) {
            self.finish(&call.call_id, CallState::Ended);
            return Err(CallError::Transport(e));
        }

        if let Some(remote) = &call.remote_media {
            self.media.attach_remote(&call.peer_id, remote);
        }
        if self.advance(&call.call_id, CallState::Active).is_some() {
            self.emit(&call.peer_id, &call.call_id, CallState::Active);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // EITHER SIDE
    // ------------------------------------------------------------------------

    /// The remote side closed the call, or the channel to it dropped
    /// (`call_id` is `None`).
    pub fn handle_remote_close(&self, peer_id: &str, call_id: Option<&str>) {
        let target = {
            let slot = self.call.lock();
            slot.as_ref()
                .filter(|call| call.peer_id == peer_id)
                .filter(|call| call_id.map_or(true, |id| id == call.call_id))
                .map(|call| (call.call_id.clone(), call.state.after_remote_close()))
        };

        if let Some((call_id, state)) = target {
            self.finish(&call_id, state);
        }
    }

    /// Hang up the current call
    pub fn end_call(&self) -> Result<(), CallError> {
        let call = self.current().ok_or(CallError::NoCall)?;
        if let Err(e) = self.transport.close_call(&call.peer_id, &call.call_id) {
            debug!("Close for call {} not sent: {}", call.call_id, e);
        }
        self.finish(&call.call_id, CallState::Ended);
        Ok(())
    }
}
