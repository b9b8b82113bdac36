// Message codec — bincode serialization with size limits

use super::types::{Body, Invite, MediaOffer, WireEnvelope, WireFrame};
use anyhow::{bail, Result};

/// Maximum encoded frame size: 256 KB
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Maximum envelope body: 64 KB
pub const MAX_BODY_SIZE: usize = 64 * 1024;

fn check_body(body: &Body) -> Result<()> {
    if body.len() > MAX_BODY_SIZE {
        bail!(
            "Body too large: {} bytes (max {})",
            body.len(),
            MAX_BODY_SIZE
        );
    }
    Ok(())
}

/// Serialize a WireFrame to bytes (bincode)
pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>> {
    if let WireFrame::Payload(envelope) = frame {
        check_body(&envelope.body)?;
    }

    let bytes = bincode::serialize(frame)?;

    if bytes.len() > MAX_FRAME_SIZE {
        bail!(
            "Encoded frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize bytes to a WireFrame
pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame> {
    if bytes.len() > MAX_FRAME_SIZE {
        bail!(
            "Frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        );
    }

    let frame: WireFrame = bincode::deserialize(bytes)?;
    Ok(frame)
}

/// Check that an envelope would fit on the wire
pub fn validate_envelope(envelope: &WireEnvelope) -> Result<()> {
    check_body(&envelope.body)
}

/// Serialize an Invite to bytes, for use as an `Invite` envelope body
pub fn encode_invite(invite: &Invite) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(invite)?;

    if bytes.len() > MAX_BODY_SIZE {
        bail!(
            "Encoded invite too large: {} bytes (max {})",
            bytes.len(),
            MAX_BODY_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize an Invite from an envelope body
pub fn decode_invite(bytes: &[u8]) -> Result<Invite> {
    if bytes.len() > MAX_BODY_SIZE {
        bail!(
            "Invite too large: {} bytes (max {})",
            bytes.len(),
            MAX_BODY_SIZE
        );
    }

    let invite: Invite = bincode::deserialize(bytes)?;
    Ok(invite)
}

/// Serialize a MediaOffer to bytes, for use as a `CallOffer` envelope body
pub fn encode_offer(offer: &MediaOffer) -> Result<Vec<u8>> {
    Ok(bincode::serialize(offer)?)
}

/// Deserialize a MediaOffer from an envelope body
pub fn decode_offer(bytes: &[u8]) -> Result<MediaOffer> {
    if bytes.len() > MAX_BODY_SIZE {
        bail!(
            "Offer too large: {} bytes (max {})",
            bytes.len(),
            MAX_BODY_SIZE
        );
    }

    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::{MediaDescriptor, PayloadKind, RoomType, SenderInfo};
    use proptest::prelude::*;

    fn room_type_strategy() -> impl Strategy<Value = RoomType> {
        prop_oneof![
            Just(RoomType::Direct),
            Just(RoomType::Group),
            Just(RoomType::Channel),
        ]
    }

    proptest! {
        #[test]
        fn invite_survives_encoding(
            room_id in "[a-z0-9-]{1,40}",
            name in ".{0,64}",
            description in ".{0,128}",
            room_type in room_type_strategy(),
            host in "[a-z0-9-]{1,52}",
            persona in proptest::option::of("[a-z0-9]{1,16}"),
        ) {
            let invite = Invite {
                room_id,
                name,
                description,
                room_type,
                host_peer_id: host,
                bot_persona_ref: persona,
            };

            let bytes = encode_invite(&invite).unwrap();
            let restored = decode_invite(&bytes).unwrap();
            prop_assert_eq!(invite, restored);
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = WireFrame::Payload(WireEnvelope::chat("hello world", SenderInfo::new("a")));
        let bytes = encode_frame(&frame).unwrap();
        let restored = decode_frame(&bytes).unwrap();

        assert_eq!(frame, restored);
    }

    #[test]
    fn test_reject_oversized_body() {
        let envelope = WireEnvelope {
            kind: PayloadKind::GroupMsg,
            room_id: Some("r".into()),
            sender_info: None,
            body: Body::Binary(vec![0u8; MAX_BODY_SIZE + 1]),
        };

        assert!(validate_envelope(&envelope).is_err());
        assert!(encode_frame(&WireFrame::Payload(envelope)).is_err());
    }

    #[test]
    fn test_reject_oversized_decode() {
        let big_bytes = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(decode_frame(&big_bytes).is_err());
    }

    #[test]
    fn test_reject_garbage_invite() {
        assert!(decode_invite(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_offer_roundtrip() {
        let offer = MediaOffer {
            call_id: "call-1".into(),
            media: MediaDescriptor {
                stream_id: "local-1".into(),
                audio: true,
                video: false,
            },
        };

        let restored = decode_offer(&encode_offer(&offer).unwrap()).unwrap();
        assert_eq!(offer, restored);
    }
}
