// Room invitations
//
// The host connects to the invitee, records it as a participant and sends
// the room's details. The invitee gates the invite against the host, creates
// the room once and leaves connecting back to the session. There is no
// acceptance acknowledgement.

use crate::message::{decode_invite, encode_invite, Body, PayloadKind, WireEnvelope};
use crate::privacy::{admit_invite, PrivacyPolicy};
use crate::store::{Room, RoomStore};
use crate::transport::{PeerTransport, TransportError};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Only the host of {0} can invite")]
    NotHost(String),

    #[error("Could not reach {0}")]
    Unreachable(String),

    #[error("Invalid invite: {0}")]
    InvalidInvite(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to an inbound invite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteOutcome {
    /// A new room was joined
    Created(Room),
    /// The room was already known; nothing changed
    Duplicate,
    /// The privacy gate refused the host
    Rejected,
    /// The body was not a valid invite
    Malformed,
}

#[derive(Clone)]
pub struct InviteProtocol {
    transport: PeerTransport,
    rooms: RoomStore,
    policy: Arc<RwLock<PrivacyPolicy>>,
}

impl InviteProtocol {
    pub fn new(
        transport: PeerTransport,
        rooms: RoomStore,
        policy: Arc<RwLock<PrivacyPolicy>>,
    ) -> Self {
        Self {
            transport,
            rooms,
            policy,
        }
    }

    /// Invite `invitee` into a room the local peer hosts
    pub async fn send_invite(&self, room_id: &str, invitee: &str) -> Result<(), InviteError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| InviteError::UnknownRoom(room_id.to_string()))?;
        if !room.is_admin {
            return Err(InviteError::NotHost(room_id.to_string()));
        }

        let identity = self
            .transport
            .identity()
            .ok_or(TransportError::NotInitialized)?;

        if !self.transport.connect(invitee, identity.sender_info()).await {
            return Err(InviteError::Unreachable(invitee.to_string()));
        }

        let body = encode_invite(&room.invite())
            .map_err(|e| InviteError::InvalidInvite(e.to_string()))?;
        let envelope = WireEnvelope {
            kind: PayloadKind::Invite,
            room_id: Some(room.id.clone()),
            sender_info: Some(identity.sender_info()),
            body: Body::Binary(body),
        };

        self.rooms.append_participant(room_id, invitee);
        self.transport.send(invitee, envelope)?;

        info!("Invited {} to {}", invitee, room.name);
        Ok(())
    }

    /// Handle an `Invite` envelope that arrived from `from`
    pub fn handle_inbound(&self, from: &str, envelope: &WireEnvelope) -> InviteOutcome {
        let invite = match &envelope.body {
            Body::Binary(bytes) => match decode_invite(bytes) {
                Ok(invite) => invite,
                Err(e) => {
                    debug!("Dropping malformed invite from {}: {}", from, e);
                    return InviteOutcome::Malformed;
                }
            },
            Body::Text(_) => {
                debug!("Dropping text-bodied invite from {}", from);
                return InviteOutcome::Malformed;
            }
        };

        let policy = *self.policy.read();
        if !admit_invite(&policy, &self.rooms, &invite.host_peer_id).is_admitted() {
            return InviteOutcome::Rejected;
        }

        let room = Room::from_invite(&invite);
        if !self.rooms.create(room.clone()) {
            debug!("Ignoring duplicate invite to {}", invite.room_id);
            return InviteOutcome::Duplicate;
        }

        info!("Joined {} hosted by {}", room.name, invite.host_peer_id);
        InviteOutcome::Created(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Invite, RoomType, SenderInfo};
    use crate::privacy::DmPolicy;
    use crate::transport::MemoryNetwork;

    fn protocol(policy: PrivacyPolicy) -> (InviteProtocol, RoomStore) {
        let network = MemoryNetwork::new();
        let (transport, _events) = PeerTransport::new(Arc::new(network.backend()));
        let rooms = RoomStore::new();
        let protocol = InviteProtocol::new(transport, rooms.clone(), Arc::new(RwLock::new(policy)));
        (protocol, rooms)
    }

    fn invite_envelope(room_id: &str, host: &str) -> WireEnvelope {
        let invite = Invite {
            room_id: room_id.into(),
            name: "R1".into(),
            description: "planning".into(),
            room_type: RoomType::Group,
            host_peer_id: host.into(),
            bot_persona_ref: None,
        };
        WireEnvelope {
            kind: PayloadKind::Invite,
            room_id: Some(room_id.into()),
            sender_info: Some(SenderInfo::new("host")),
            body: Body::Binary(encode_invite(&invite).unwrap()),
        }
    }

    #[test]
    fn test_inbound_invite_creates_room_once() {
        let (protocol, rooms) = protocol(PrivacyPolicy::default());
        let envelope = invite_envelope("group-1", "turtle-h");

        match protocol.handle_inbound("turtle-h", &envelope) {
            InviteOutcome::Created(room) => {
                assert_eq!(room.peer_id, "turtle-h");
                assert!(room.is_private && room.is_p2p);
                assert!(!room.is_admin && !room.is_connected);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(
            protocol.handle_inbound("turtle-h", &envelope),
            InviteOutcome::Duplicate
        );
        assert_eq!(rooms.list().len(), 1);
    }

    #[test]
    fn test_contacts_only_rejects_unknown_host() {
        let (protocol, rooms) = protocol(PrivacyPolicy {
            allow_calls: true,
            dm_policy: DmPolicy::ContactsOnly,
        });

        let envelope = invite_envelope("group-1", "turtle-h");
        assert_eq!(
            protocol.handle_inbound("turtle-h", &envelope),
            InviteOutcome::Rejected
        );
        assert!(rooms.list().is_empty());

        rooms.create(Room::direct("turtle-h", None, true));
        assert!(matches!(
            protocol.handle_inbound("turtle-h", &envelope),
            InviteOutcome::Created(_)
        ));
    }

    #[test]
    fn test_malformed_invite() {
        let (protocol, rooms) = protocol(PrivacyPolicy::default());
        let envelope = WireEnvelope {
            kind: PayloadKind::Invite,
            room_id: None,
            sender_info: None,
            body: Body::Text("join us".into()),
        };

        assert_eq!(
            protocol.handle_inbound("turtle-h", &envelope),
            InviteOutcome::Malformed
        );
        assert!(rooms.list().is_empty());
    }

    #[tokio::test]
    async fn test_send_invite_requires_host() {
        let (protocol, rooms) = protocol(PrivacyPolicy::default());
        rooms.create(Room::direct("turtle-b", None, true));

        assert_eq!(
            protocol.send_invite("group-missing", "turtle-b").await,
            Err(InviteError::UnknownRoom("group-missing".into()))
        );
        assert_eq!(
            protocol.send_invite("direct-turtle-b", "turtle-c").await,
            Err(InviteError::NotHost("direct-turtle-b".into()))
        );
    }

    #[tokio::test]
    async fn test_oversized_invite_leaves_participants_unchanged() {
        let network = MemoryNetwork::new();
        let (host, _host_events) = PeerTransport::new(Arc::new(network.backend()));
        let (guest, _guest_events) = PeerTransport::new(Arc::new(network.backend()));
        let host_id = host.initialize(SenderInfo::new("host"), false).await.unwrap();
        let guest_id = guest.initialize(SenderInfo::new("guest"), false).await.unwrap();

        let rooms = RoomStore::new();
        let protocol = InviteProtocol::new(
            host,
            rooms.clone(),
            Arc::new(RwLock::new(PrivacyPolicy::default())),
        );
        let room = Room::hosted("R1", &"x".repeat(70 * 1024), RoomType::Group, &host_id);
        rooms.create(room.clone());

        assert!(matches!(
            protocol.send_invite(&room.id, &guest_id).await,
            Err(InviteError::InvalidInvite(_))
        ));
        assert!(rooms.get(&room.id).unwrap().participants.is_empty());
    }
}
