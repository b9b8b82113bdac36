// Identity — who this session is on the network

use crate::message::SenderInfo;
use serde::{Deserialize, Serialize};

/// The local peer's identity for one registration.
///
/// Immutable for the life of a registration. Toggling anonymized routing
/// tears the registration down and yields a new identity with a new peer ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Peer ID assigned at registration
    pub peer_id: String,
    pub nickname: String,
    pub avatar_ref: Option<String>,
    /// Whether this registration routes through the relay
    pub anonymized: bool,
}

impl PeerIdentity {
    pub fn new(peer_id: String, profile: SenderInfo, anonymized: bool) -> Self {
        Self {
            peer_id,
            nickname: profile.nickname,
            avatar_ref: profile.avatar_ref,
            anonymized,
        }
    }

    /// Metadata presented to remote peers
    pub fn sender_info(&self) -> SenderInfo {
        SenderInfo {
            nickname: self.nickname.clone(),
            avatar_ref: self.avatar_ref.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_info_mirrors_profile() {
        let profile = SenderInfo::new("alice").with_avatar("avatars/alice.png");
        let identity = PeerIdentity::new("turtle-0a1b2c3d".into(), profile.clone(), false);

        assert_eq!(identity.sender_info(), profile);
        assert!(!identity.anonymized);
    }
}
