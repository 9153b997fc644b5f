//! Network Layer
//!
//! Peer-side replication (authority, spawns, remote calls, handlers) and
//! the relay that carries it, either over WebSockets or in-process.
//! Only the relay is shared; every peer runs its own copy of the world.

pub mod protocol;
pub mod authority;
pub mod replication;
pub mod handlers;
pub mod casting;
pub mod session;
pub mod relay;
pub mod loopback;
pub mod server;
pub mod client;

pub use protocol::{
    OpCode, Operation, Payload, PeerInfo, PeerMessage, PeerProperties, RelayMessage, RemoteCall,
    Target,
};
pub use authority::{AuthorityResolver, Peer};
pub use replication::{Invocation, ReplicationError, Replicator};
pub use handlers::HandlerRegistry;
pub use session::{PeerSession, PlayerInput, SessionContext, SessionError};
pub use relay::{RelayError, RelayRoom};
pub use loopback::Loopback;
pub use server::{GameServer, GameServerError, ServerConfig};
pub use client::{ClientError, RelayClient};
