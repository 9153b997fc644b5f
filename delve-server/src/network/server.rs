//! WebSocket Relay Server
//!
//! Hosts relay rooms for remote peers. Each connection speaks JSON text
//! frames: [`PeerMessage`] in, [`RelayMessage`] out. Game logic never runs
//! here; the server only assigns actor numbers, elects masters and fans
//! payloads out.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::entity::PeerId;
use crate::network::protocol::{PeerMessage, RelayMessage};
use crate::network::relay::{Outgoing, RelayError, RelayRoom};

/// Environment variable for the bind address.
pub const BIND_ENV: &str = "DELVE_BIND";

/// Environment variable for the connection limit.
pub const MAX_CONNECTIONS_ENV: &str = "DELVE_MAX_CONNECTIONS";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Peers allowed in one room.
    pub max_peers_per_room: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            max_peers_per_room: 4,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DELVE_BIND` and `DELVE_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.bind_addr = bind
                .parse()
                .map_err(|e| GameServerError::Internal(format!("{}={}: {}", BIND_ENV, bind, e)))?;
        }
        if let Ok(max) = std::env::var(MAX_CONNECTIONS_ENV) {
            config.max_connections = max
                .parse()
                .map_err(|e| GameServerError::Internal(format!("{}={}: {}", MAX_CONNECTIONS_ENV, max, e)))?;
        }
        Ok(config)
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Relay rejected the request.
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Connected client state.
struct ConnectedClient {
    /// Room and actor number once joined.
    membership: Option<(String, PeerId)>,
    connected_at: Instant,
}

/// Outgoing channel of one connection.
type PeerSender = mpsc::UnboundedSender<RelayMessage>;

/// A relay room and the outgoing channel of each member.
struct RoomHandle {
    relay: RelayRoom,
    senders: BTreeMap<PeerId, PeerSender>,
}

impl RoomHandle {
    /// Queue each outgoing message on its recipient's channel. Called with
    /// the rooms lock held, so every connection sees the room's messages
    /// in the order the relay produced them.
    fn deliver(&self, out: Outgoing) {
        for (peer, msg) in out {
            let Some(tx) = self.senders.get(&peer) else {
                continue;
            };
            if tx.send(msg).is_err() {
                debug!(%peer, "Dropping message for closed connection");
            }
        }
    }
}

type Rooms = Arc<RwLock<BTreeMap<String, RoomHandle>>>;
type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The relay server.
pub struct GameServer {
    config: ServerConfig,
    rooms: Rooms,
    clients: Clients,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            rooms: Arc::new(RwLock::new(BTreeMap::new())),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let rooms = self.rooms.clone();
        let max_peers = self.config.max_peers_per_room;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<RelayMessage>();

            clients.write().await.insert(
                addr,
                ConnectedClient { membership: None, connected_at: Instant::now() },
            );

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let peer_msg = match PeerMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(RelayMessage::Error {
                                            message: "Invalid message format".to_string(),
                                        });
                                        continue;
                                    }
                                };

                                let leaving = matches!(peer_msg, PeerMessage::Leave);
                                Self::handle_peer_message(addr, peer_msg, &clients, &rooms, max_peers, &msg_tx).await;
                                if leaving {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(RelayMessage::Error {
                            message: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Leave the room before dropping the client
            let client = clients.write().await.remove(&addr);
            let connected_for = client.as_ref().map(|c| c.connected_at.elapsed()).unwrap_or_default();
            if let Some((room, peer)) = client.and_then(|c| c.membership) {
                Self::leave_room(&rooms, &room, peer).await;
            }

            sender_task.abort();
            info!("Client {} cleaned up after {:?}", addr, connected_for);
        });
    }

    /// Handle one message from a connected client.
    async fn handle_peer_message(
        addr: SocketAddr,
        msg: PeerMessage,
        clients: &Clients,
        rooms: &Rooms,
        max_peers: usize,
        tx: &PeerSender,
    ) {
        let membership = {
            let clients = clients.read().await;
            let Some(client) = clients.get(&addr) else {
                return;
            };
            client.membership.clone()
        };

        let result = match (msg, membership) {
            (PeerMessage::Join { room, nickname, properties }, None) => {
                let mut rooms = rooms.write().await;
                let handle = rooms.entry(room.clone()).or_insert_with(|| RoomHandle {
                    relay: RelayRoom::new(room.clone(), max_peers),
                    senders: BTreeMap::new(),
                });
                match handle.relay.join(nickname, properties) {
                    Ok((peer, out)) => {
                        handle.senders.insert(peer, tx.clone());
                        if let Some(client) = clients.write().await.get_mut(&addr) {
                            client.membership = Some((room.clone(), peer));
                        }
                        handle.deliver(out);
                        Ok(())
                    }
                    Err(e) => {
                        if handle.relay.is_empty() {
                            rooms.remove(&room);
                        }
                        Err(e.to_string())
                    }
                }
            }
            (PeerMessage::Join { .. }, Some(_)) => Err("Already in a room".to_string()),
            (_, None) => Err("Not in a room".to_string()),

            (PeerMessage::SetProperties { properties }, Some((room, peer))) => {
                Self::with_room(rooms, &room, |handle| handle.relay.set_properties(peer, properties)).await
            }
            (PeerMessage::Send { target, payload }, Some((room, peer))) => {
                Self::with_room(rooms, &room, |handle| handle.relay.route(peer, target, payload)).await
            }
            (PeerMessage::Leave, Some((room, peer))) => {
                if let Some(client) = clients.write().await.get_mut(&addr) {
                    client.membership = None;
                }
                Self::leave_room(rooms, &room, peer).await;
                return;
            }
        };

        if let Err(message) = result {
            debug!("Rejected message from {}: {}", addr, message);
            let _ = tx.send(RelayMessage::Error { message });
        }
    }

    async fn with_room(
        rooms: &Rooms,
        room: &str,
        f: impl FnOnce(&mut RoomHandle) -> Result<Outgoing, RelayError>,
    ) -> Result<(), String> {
        let mut rooms = rooms.write().await;
        let handle = rooms.get_mut(room).ok_or_else(|| format!("Unknown room {}", room))?;
        let out = f(handle).map_err(|e| e.to_string())?;
        handle.deliver(out);
        Ok(())
    }

    async fn leave_room(rooms: &Rooms, room: &str, peer: PeerId) {
        let mut rooms = rooms.write().await;
        let Some(handle) = rooms.get_mut(room) else {
            return;
        };
        handle.senders.remove(&peer);
        let out = match handle.relay.leave(peer) {
            Ok(out) => out,
            Err(e) => {
                warn!(room, %peer, "Leave failed: {}", e);
                return;
            }
        };
        handle.deliver(out);
        if handle.relay.is_empty() {
            info!(room, "Room closed");
            rooms.remove(room);
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get open room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::EntityId;
    use crate::network::protocol::{Operation, Payload, PeerProperties, RemoteCall, Target};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_peers_per_room, 4);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    fn kills(n: u32) -> Payload {
        Payload::Call(RemoteCall { entity: EntityId::SCENE, op: Operation::KillCountChanged { kills: n } })
    }

    #[test]
    fn test_room_deliveries_queue_in_relay_order() {
        let mut handle = RoomHandle { relay: RelayRoom::new("crypt", 4), senders: BTreeMap::new() };
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (late_tx, mut late_rx) = mpsc::unbounded_channel();

        let (host, out) = handle.relay.join("host", PeerProperties::default()).unwrap();
        handle.senders.insert(host, host_tx);
        handle.deliver(out);
        let out = handle.relay.route(host, Target::OthersBuffered, kills(1)).unwrap();
        handle.deliver(out);

        let (late, out) = handle.relay.join("late", PeerProperties::default()).unwrap();
        handle.senders.insert(late, late_tx);
        handle.deliver(out);
        let out = handle.relay.route(host, Target::Others, kills(2)).unwrap();
        handle.deliver(out);

        // The joiner sees its welcome, then the replay, then live traffic
        let mut received = Vec::new();
        while let Ok(msg) = late_rx.try_recv() {
            received.push(msg);
        }
        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], RelayMessage::Joined { you, .. } if you == late));
        assert_eq!(received[1], RelayMessage::Deliver { sender: host, payload: kills(1) });
        assert_eq!(received[2], RelayMessage::Deliver { sender: host, payload: kills(2) });

        assert!(matches!(host_rx.try_recv(), Ok(RelayMessage::Joined { .. })));
        assert!(matches!(host_rx.try_recv(), Ok(RelayMessage::PeerJoined { peer }) if peer.id == late));
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = GameServer::new(ServerConfig::default());
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_join_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let serving = server.clone();
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let join = PeerMessage::Join {
            room: "crypt".to_string(),
            nickname: "a".to_string(),
            properties: PeerProperties::default(),
        };
        ws.send(Message::Text(join.to_json().unwrap())).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        let Message::Text(text) = reply else {
            panic!("expected text frame");
        };
        match RelayMessage::from_json(&text).unwrap() {
            RelayMessage::Joined { you, master, peers, .. } => {
                assert_eq!(you, PeerId(1));
                assert_eq!(master, you);
                assert_eq!(peers.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.room_count().await, 1);

        server.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
