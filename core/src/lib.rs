// Ghostlink Core — peer-to-peer rooms, direct chat and calls
//
// Every peer registers with a rendezvous directory, then talks over direct
// channels. Groups form a star around their host, who relays each message to
// the other participants.

pub mod call;
pub mod identity;
pub mod message;
pub mod privacy;
pub mod routing;
pub mod session;
pub mod settings;
pub mod store;
pub mod transport;

use thiserror::Error;

pub use call::{CallError, CallState, MediaConstraints, MediaDevices, MediaError};
pub use identity::PeerIdentity;
pub use message::{Body, DeliveredMessage, MediaDescriptor, RoomType, SenderInfo};
pub use privacy::{DmPolicy, PrivacyPolicy};
pub use routing::{InviteError, RouterError, SendReport};
pub use session::{Session, SessionEvent, SessionEvents};
pub use settings::{SessionSettings, SettingsError};
pub use store::Room;
pub use transport::{
    ChannelBackend, DirectoryConfig, DirectoryNode, MemoryNetwork, SwarmBackend, SwarmConfig,
    TransportError,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Invite(#[from] InviteError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Could not reach {0}")]
    Unreachable(String),
}

/// Install a `RUST_LOG`-driven subscriber (default `info`). Idempotent.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ============================================================================
// TESTS
// ============================================================================
