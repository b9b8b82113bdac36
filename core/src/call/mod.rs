// Call — offer/answer/hangup signaling for one call at a time

pub mod signaling;

pub use signaling::{
    Call, CallDirection, CallError, CallEvent, CallSignaling, CallState, MediaConstraints,
    MediaDevices, MediaError, OfferOutcome,
};
