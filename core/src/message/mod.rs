// Message module — wire envelope, frames and their serialization

pub mod types;
pub mod codec;

pub use types::{
    Body, DeliveredMessage, Invite, MediaDescriptor, MediaOffer, PayloadKind, RoomType,
    SenderInfo, WireEnvelope, WireFrame,
};
pub use codec::{
    decode_frame, decode_invite, decode_offer, encode_frame, encode_invite, encode_offer,
    validate_envelope,
};
