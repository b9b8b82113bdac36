//! Routing — invitations and star-topology message delivery
//!
//! - Invite: hosts bring peers into rooms; invitees gate and join
//! - Router: classifies inbound payloads and fans group traffic out from the host

pub mod invite;
pub mod router;

pub use invite::{InviteError, InviteOutcome, InviteProtocol};
pub use router::{MessageRouter, RouteOutcome, RouterError, SendReport};
