// Transport module — peer channels, connection state and backends

pub mod abstraction;
pub mod behaviour;
pub mod directory;
pub mod memory;
pub mod peer;
pub mod registry;
pub mod swarm;

pub use abstraction::{
    BackendEvent, ChannelBackend, ConnectionState, TransportError, TransportEvent,
};
pub use directory::{DirectoryConfig, DirectoryNode};
pub use memory::{MemoryBackend, MemoryNetwork};
pub use peer::PeerTransport;
pub use registry::{Connection, ConnectionRegistry};
pub use swarm::{SwarmBackend, SwarmConfig};
