// Message types — what travels between peers and what reaches the conversation surface

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of payload an envelope carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// One-to-one chat text
    Chat,
    /// Group or channel message, always tagged with a room id
    GroupMsg,
    /// Room invitation (body is an encoded `Invite`)
    Invite,
    /// Audio/video call offer (body is an encoded `MediaOffer`)
    CallOffer,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Chat => write!(f, "Chat"),
            PayloadKind::GroupMsg => write!(f, "GroupMsg"),
            PayloadKind::Invite => write!(f, "Invite"),
            PayloadKind::CallOffer => write!(f, "CallOffer"),
        }
    }
}

/// Envelope body: text for chat, opaque bytes for everything else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Text(text) => text.len(),
            Body::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text content (only for `Body::Text`)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            Body::Binary(_) => None,
        }
    }
}

/// Who sent a payload, as the sender describes itself.
///
/// Also used as the connection metadata a peer presents when it opens a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub nickname: String,
    pub avatar_ref: Option<String>,
}

impl SenderInfo {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            avatar_ref: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

/// The logical wire envelope.
///
/// There is no version field; both peers must interpret it identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub kind: PayloadKind,
    pub room_id: Option<String>,
    pub sender_info: Option<SenderInfo>,
    pub body: Body,
}

impl WireEnvelope {
    /// Create a 1:1 chat envelope
    pub fn chat(text: &str, sender_info: SenderInfo) -> Self {
        Self {
            kind: PayloadKind::Chat,
            room_id: None,
            sender_info: Some(sender_info),
            body: Body::Text(text.to_string()),
        }
    }

    /// Create a group message envelope tagged with its room
    pub fn group(room_id: &str, body: Body, sender_info: SenderInfo) -> Self {
        Self {
            kind: PayloadKind::GroupMsg,
            room_id: Some(room_id.to_string()),
            sender_info: Some(sender_info),
            body,
        }
    }
}

/// Room type as carried by invites and rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    Direct,
    Group,
    Channel,
}

impl RoomType {
    /// Group and Channel rooms use star-topology fan-out
    pub fn is_multi_party(&self) -> bool {
        matches!(self, RoomType::Group | RoomType::Channel)
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomType::Direct => write!(f, "Direct"),
            RoomType::Group => write!(f, "Group"),
            RoomType::Channel => write!(f, "Channel"),
        }
    }
}

/// A room invitation sent by the host to an invitee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub room_id: String,
    pub name: String,
    pub description: String,
    pub room_type: RoomType,
    pub host_peer_id: String,
    /// Opaque reference to the room's persona, carried through untouched
    pub bot_persona_ref: Option<String>,
}

/// Description of a media stream, as produced by the media collaborator.
///
/// The engine never inspects it; it is handed from one side's capture to the
/// other side's renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub stream_id: String,
    pub audio: bool,
    pub video: bool,
}

/// Call offer carried in a `CallOffer` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOffer {
    pub call_id: String,
    pub media: MediaDescriptor,
}

/// Everything that travels on a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFrame {
    /// First frame on a freshly opened channel, carrying the opener's metadata
    Hello(SenderInfo),
    /// An application payload
    Payload(WireEnvelope),
    /// Callee accepted the call and attached its media
    CallAnswer {
        call_id: String,
        media: MediaDescriptor,
    },
    /// Either side hung up or refused the call
    CallClose { call_id: String },
}

impl fmt::Display for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFrame::Hello(info) => write!(f, "Hello {{ nickname: {} }}", info.nickname),
            WireFrame::Payload(envelope) => write!(
                f,
                "Payload {{ kind: {}, room: {:?}, body_len: {} }}",
                envelope.kind,
                envelope.room_id,
                envelope.body.len()
            ),
            WireFrame::CallAnswer { call_id, .. } => write!(f, "CallAnswer {{ call_id: {} }}", call_id),
            WireFrame::CallClose { call_id } => write!(f, "CallClose {{ call_id: {} }}", call_id),
        }
    }
}

/// A message delivered to the conversation surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    /// Unique message ID (UUID v4), assigned on delivery
    pub id: String,
    pub room_id: String,
    /// Peer the payload arrived from on the transport
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub body: Body,
    /// Unix timestamp (milliseconds)
    pub timestamp: u64,
}

impl DeliveredMessage {
    pub fn new(room_id: &str, sender_id: &str, sender_info: Option<&SenderInfo>, body: Body) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_info.map(|info| info.nickname.clone()),
            sender_avatar: sender_info.and_then(|info| info.avatar_ref.clone()),
            body,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Get text content (only valid for text bodies)
    pub fn text_content(&self) -> Option<&str> {
        self.body.as_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_envelope() {
        let envelope = WireEnvelope::chat("hello", SenderInfo::new("alice"));

        assert_eq!(envelope.kind, PayloadKind::Chat);
        assert!(envelope.room_id.is_none());
        assert_eq!(envelope.body.as_text(), Some("hello"));
        assert_eq!(envelope.sender_info.unwrap().nickname, "alice");
    }

    #[test]
    fn test_group_envelope_carries_room() {
        let envelope = WireEnvelope::group(
            "group-1",
            Body::Text("yo".into()),
            SenderInfo::new("bob").with_avatar("avatar-7"),
        );

        assert_eq!(envelope.kind, PayloadKind::GroupMsg);
        assert_eq!(envelope.room_id.as_deref(), Some("group-1"));
        assert_eq!(
            envelope.sender_info.unwrap().avatar_ref.as_deref(),
            Some("avatar-7")
        );
    }

    #[test]
    fn test_body_len() {
        assert_eq!(Body::Text("abc".into()).len(), 3);
        assert_eq!(Body::Binary(vec![0u8; 10]).len(), 10);
        assert!(Body::Binary(Vec::new()).is_empty());
        assert!(Body::Binary(vec![1]).as_text().is_none());
    }

    #[test]
    fn test_delivered_message_attribution() {
        let info = SenderInfo::new("carol").with_avatar("a1");
        let msg = DeliveredMessage::new("direct-x", "x", Some(&info), Body::Text("hi".into()));

        assert_eq!(msg.sender_id, "x");
        assert_eq!(msg.sender_name.as_deref(), Some("carol"));
        assert_eq!(msg.sender_avatar.as_deref(), Some("a1"));
        assert_eq!(msg.text_content(), Some("hi"));
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_room_type_multi_party() {
        assert!(!RoomType::Direct.is_multi_party());
        assert!(RoomType::Group.is_multi_party());
        assert!(RoomType::Channel.is_multi_party());
    }
}
