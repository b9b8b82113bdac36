//! Transport abstraction layer for Ghostlink
//!
//! Defines the events, errors and the channel backend seam that
//! `PeerTransport` drives.

use crate::message::{MediaDescriptor, MediaOffer, SenderInfo, WireEnvelope, WireFrame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifecycle state of a connection to one peer.
///
/// Only ever advances Connecting -> Open -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Events from the transport to the session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A channel to a peer is open. `metadata` is present when the remote opened it.
    ConnectionOpened {
        peer_id: String,
        metadata: Option<SenderInfo>,
    },
    /// A channel to a peer closed (remote hangup, transport drop or local teardown)
    ConnectionClosed { peer_id: String },
    /// An application payload arrived
    InboundPayload {
        peer_id: String,
        envelope: WireEnvelope,
    },
    /// A remote peer is offering a call
    IncomingCallOffer { peer_id: String, offer: MediaOffer },
    /// The callee accepted our offer
    CallAnswered {
        peer_id: String,
        call_id: String,
        media: MediaDescriptor,
    },
    /// The remote side closed a call
    CallClosed { peer_id: String, call_id: String },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::ConnectionOpened { peer_id, metadata } => write!(
                f,
                "ConnectionOpened {{ peer_id: {}, inbound: {} }}",
                peer_id,
                metadata.is_some()
            ),
            TransportEvent::ConnectionClosed { peer_id } => {
                write!(f, "ConnectionClosed {{ peer_id: {} }}", peer_id)
            }
            TransportEvent::InboundPayload { peer_id, envelope } => write!(
                f,
                "InboundPayload {{ peer_id: {}, kind: {} }}",
                peer_id, envelope.kind
            ),
            TransportEvent::IncomingCallOffer { peer_id, offer } => write!(
                f,
                "IncomingCallOffer {{ peer_id: {}, call_id: {} }}",
                peer_id, offer.call_id
            ),
            TransportEvent::CallAnswered { peer_id, call_id, .. } => write!(
                f,
                "CallAnswered {{ peer_id: {}, call_id: {} }}",
                peer_id, call_id
            ),
            TransportEvent::CallClosed { peer_id, call_id } => write!(
                f,
                "CallClosed {{ peer_id: {}, call_id: {} }}",
                peer_id, call_id
            ),
        }
    }
}

/// Raw events a channel backend reports to `PeerTransport`
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A frame arrived from a remote peer
    Frame { from: String, frame: WireFrame },
    /// The channel to a remote peer closed
    Closed { peer_id: String },
}

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    #[error("Directory unreachable: {0}")]
    Connect(String),

    #[error("Transport already initialized")]
    AlreadyInitialized,

    #[error("Transport not initialized")]
    NotInitialized,

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Channel not open: {0}")]
    ChannelNotOpen(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A source of raw channels to remote peers.
///
/// Implementations register the local identity with a rendezvous directory,
/// open channels on request and push every inbound frame and channel close
/// into the sender handed to `register`.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Register with the directory and return the local peer id
    async fn register(
        &self,
        profile: &SenderInfo,
        anonymize: bool,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Result<String, TransportError>;

    /// Open a channel to a remote peer; resolves once the channel is usable
    async fn open(&self, remote: &str) -> Result<(), TransportError>;

    /// Hand one frame to an open channel without waiting for delivery
    fn transmit(&self, remote: &str, frame: WireFrame) -> Result<(), TransportError>;

    /// Close the channel to a remote peer
    async fn close(&self, remote: &str);

    /// Close everything and leave the directory
    async fn deregister(&self);
}
