//! Message routing over a star topology
//!
//! Every group has one host holding a direct channel to each participant.
//! Participants send group messages to the host only; the host delivers
//! locally and relays the envelope verbatim to every other participant.
//! Direct chats are plain unicasts. Nothing carries sequence numbers, so
//! bursts from several senders may interleave differently per recipient.

use super::invite::{InviteOutcome, InviteProtocol};
use crate::message::{validate_envelope, Body, DeliveredMessage, PayloadKind, WireEnvelope};
use crate::privacy::{admit_direct_message, PrivacyPolicy};
use crate::store::{Room, RoomStore};
use crate::transport::PeerTransport;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Not registered on the network")]
    NotInitialized,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result of routing one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to the local conversation surface
    Delivered {
        message: DeliveredMessage,
        /// Room created on the fly for a first direct message
        created_room: Option<Room>,
        /// Number of participants the host relayed to
        relayed: usize,
    },
    /// An invite, handled by the invite protocol
    Invite(InviteOutcome),
    /// Silently dropped
    Dropped,
}

/// Outcome of an outbound send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
    /// Envelopes handed to the transport
    pub handed_off: usize,
    /// Recipients whose channel was not open or whose send failed
    pub failed: usize,
}

#[derive(Clone)]
pub struct MessageRouter {
    transport: PeerTransport,
    rooms: RoomStore,
    policy: Arc<RwLock<PrivacyPolicy>>,
    invites: InviteProtocol,
}

impl MessageRouter {
    pub fn new(
        transport: PeerTransport,
        rooms: RoomStore,
        policy: Arc<RwLock<PrivacyPolicy>>,
        invites: InviteProtocol,
    ) -> Self {
        Self {
            transport,
            rooms,
            policy,
            invites,
        }
    }

    /// Classify and handle an envelope that arrived from `from`
    pub fn handle_inbound(&self, from: &str, envelope: WireEnvelope) -> RouteOutcome {
        match envelope.kind {
            PayloadKind::Chat => self.handle_chat(from, envelope),
            PayloadKind::GroupMsg => self.handle_group(from, envelope),
            PayloadKind::Invite => RouteOutcome::Invite(self.invites.handle_inbound(from, &envelope)),
            PayloadKind::CallOffer => {
                debug!("Call offer from {} reached the router; ignoring", from);
                RouteOutcome::Dropped
            }
        }
    }

    fn handle_chat(&self, from: &str, envelope: WireEnvelope) -> RouteOutcome {
        let room_id = Room::direct_id(from);
        let mut created_room = None;

        if !self.rooms.contains(&room_id) {
            let policy = *self.policy.read();
            if !admit_direct_message(&policy, &self.rooms, from).is_admitted() {
                return RouteOutcome::Dropped;
            }

            let name = envelope.sender_info.as_ref().map(|info| info.nickname.clone());
            let room = Room::direct(from, name, self.transport.is_open(from));
            if self.rooms.create(room.clone()) {
                created_room = Some(room);
            }
        }

        let message = DeliveredMessage::new(&room_id, from, envelope.sender_info.as_ref(), envelope.body);
        RouteOutcome::Delivered {
            message,
            created_room,
            relayed: 0,
        }
    }

    fn handle_group(&self, from: &str, envelope: WireEnvelope) -> RouteOutcome {
        let Some(room_id) = envelope.room_id.clone() else {
            debug!("Group message from {} without a room", from);
            return RouteOutcome::Dropped;
        };
        let Some(room) = self.rooms.get(&room_id) else {
            debug!("Group message from {} for unknown room {}", from, room_id);
            return RouteOutcome::Dropped;
        };

        let relayed = if room.is_admin {
            self.fan_out(&room.participants, &envelope, Some(from)).handed_off
        } else {
            0
        };

        let message = DeliveredMessage::new(&room_id, from, envelope.sender_info.as_ref(), envelope.body);
        RouteOutcome::Delivered {
            message,
            created_room: None,
            relayed,
        }
    }

    /// Send a body into a room
    pub fn send(&self, room_id: &str, body: Body) -> Result<SendReport, RouterError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RouterError::UnknownRoom(room_id.to_string()))?;
        let sender_info = self
            .transport
            .identity()
            .ok_or(RouterError::NotInitialized)?
            .sender_info();

        let envelope = if room.room_type.is_multi_party() {
            WireEnvelope::group(&room.id, body, sender_info)
        } else {
            WireEnvelope {
                kind: PayloadKind::Chat,
                room_id: None,
                sender_info: Some(sender_info),
                body,
            }
        };
        validate_envelope(&envelope).map_err(|e| RouterError::InvalidPayload(e.to_string()))?;

        let report = if room.room_type.is_multi_party() && room.is_admin {
            self.fan_out(&room.participants, &envelope, None)
        } else {
            self.fan_out(std::slice::from_ref(&room.peer_id), &envelope, None)
        };

        debug!(
            "Sent to {}: {} handed off, {} failed",
            room.id, report.handed_off, report.failed
        );
        Ok(report)
    }

    fn fan_out(&self, recipients: &[String], envelope: &WireEnvelope, exclude: Option<&str>) -> SendReport {
        let mut report = SendReport::default();
        for peer_id in recipients {
            if Some(peer_id.as_str()) == exclude {
                continue;
            }
            if !self.transport.is_open(peer_id) {
                warn!("Skipping {}: channel not open", peer_id);
                report.failed += 1;
                continue;
            }
            match self.transport.send(peer_id, envelope.clone()) {
                Ok(()) => report.handed_off += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RoomType, SenderInfo};
    use crate::transport::MemoryNetwork;

    async fn router() -> (MessageRouter, RoomStore) {
        let network = MemoryNetwork::new();
        let (transport, _events) = PeerTransport::new(Arc::new(network.backend()));
        transport
            .initialize(SenderInfo::new("host"), false)
            .await
            .unwrap();
        let rooms = RoomStore::new();
        let policy = Arc::new(RwLock::new(PrivacyPolicy::default()));
        let invites = InviteProtocol::new(transport.clone(), rooms.clone(), policy.clone());
        (MessageRouter::new(transport, rooms.clone(), policy, invites), rooms)
    }

    #[tokio::test]
    async fn test_first_chat_creates_direct_room() {
        let (router, rooms) = router().await;
        let outcome = router.handle_inbound("turtle-x", WireEnvelope::chat("hey", SenderInfo::new("xavier")));

        match outcome {
            RouteOutcome::Delivered { message, created_room, relayed } => {
                assert_eq!(message.room_id, "direct-turtle-x");
                assert_eq!(message.sender_id, "turtle-x");
                assert_eq!(message.sender_name.as_deref(), Some("xavier"));
                assert_eq!(created_room.unwrap().name, "xavier");
                assert_eq!(relayed, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        // Second message reuses the room
        let outcome = router.handle_inbound("turtle-x", WireEnvelope::chat("again", SenderInfo::new("xavier")));
        assert!(matches!(outcome, RouteOutcome::Delivered { created_room: None, .. }));
        assert_eq!(rooms.list().len(), 1);
    }

    #[tokio::test]
    async fn test_group_message_for_unknown_room_dropped() {
        let (router, rooms) = router().await;
        let envelope = WireEnvelope::group("group-nope", Body::Text("hi".into()), SenderInfo::new("p"));

        assert_eq!(router.handle_inbound("turtle-p", envelope), RouteOutcome::Dropped);
        assert!(rooms.list().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_unknown_room() {
        let (router, _rooms) = router().await;
        assert_eq!(
            router.send("group-nope", Body::Text("hi".into())),
            Err(RouterError::UnknownRoom("group-nope".into()))
        );
    }

    #[tokio::test]
    async fn test_host_send_counts_closed_participants_as_failed() {
        let (router, rooms) = router().await;
        let room = Room::hosted("R1", "", RoomType::Group, "turtle-h");
        let id = room.id.clone();
        rooms.create(room);
        rooms.append_participant(&id, "turtle-p1");
        rooms.append_participant(&id, "turtle-p2");

        let report = router.send(&id, Body::Text("hi".into())).unwrap();
        assert_eq!(report, SendReport { handed_off: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (router, rooms) = router().await;
        rooms.create(Room::direct("turtle-b", None, true));

        let body = Body::Binary(vec![0u8; crate::message::codec::MAX_BODY_SIZE + 1]);
        assert!(matches!(
            router.send("direct-turtle-b", body),
            Err(RouterError::InvalidPayload(_))
        ));
    }
}
