//! WebSocket Peer Client
//!
//! Connects a [`PeerSession`] to a relay server. A reader task parses
//! incoming frames into [`RelayMessage`]s and a writer task sends the
//! session's outgoing [`PeerMessage`]s; the session itself is driven at
//! the fixed tick rate by [`RelayClient::run`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::physics::PhysicsQuery;
use crate::network::protocol::{PeerMessage, RelayMessage};
use crate::network::session::PeerSession;
use crate::TICK_RATE;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection is gone.
    #[error("Connection closed")]
    Closed,
}

/// A peer session connected to a relay server.
pub struct RelayClient {
    session: PeerSession,
    incoming: mpsc::Receiver<RelayMessage>,
    outgoing: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayClient {
    /// Connect and ask to join `room`.
    pub async fn connect(url: &str, room: &str, session: PeerSession) -> Result<Self, ClientError> {
        info!("Connecting to {}...", url);
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (incoming_tx, incoming) = mpsc::channel::<RelayMessage>(256);
        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(256);

        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match RelayMessage::from_json(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to parse relay message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay closed connection");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Reader task ended");
        });

        let writer = tokio::spawn(async move {
            while let Some(json) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(json)).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Writer task ended");
        });

        let client = Self { session, incoming, outgoing, reader, writer };
        client.send(client.session.join_message(room)).await?;
        Ok(client)
    }

    /// The driven session.
    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    /// The driven session, for input and lobby actions.
    pub fn session_mut(&mut self) -> &mut PeerSession {
        &mut self.session
    }

    async fn send(&self, msg: PeerMessage) -> Result<(), ClientError> {
        let json = msg.to_json()?;
        self.outgoing.send(json).await.map_err(|_| ClientError::Closed)
    }

    /// Send everything the session queued.
    pub async fn flush(&mut self) -> Result<(), ClientError> {
        for msg in self.session.drain_outgoing() {
            self.send(msg).await?;
        }
        Ok(())
    }

    /// Wait for one relay message and apply it.
    pub async fn next_message(&mut self) -> Result<(), ClientError> {
        let msg = self.incoming.recv().await.ok_or(ClientError::Closed)?;
        self.session.handle_relay(msg);
        self.flush().await
    }

    /// Apply every relay message already received.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.incoming.try_recv() {
            self.session.handle_relay(msg);
            applied += 1;
        }
        applied
    }

    /// Tick the session at the fixed rate, `ticks` times or until the
    /// connection closes.
    pub async fn run(&mut self, physics: &dyn PhysicsQuery, ticks: Option<u64>) -> Result<(), ClientError> {
        let mut timer = interval(Duration::from_micros(1_000_000 / TICK_RATE as u64));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticked = 0u64;
        while ticks.map_or(true, |limit| ticked < limit) {
            timer.tick().await;
            if self.reader.is_finished() {
                return Err(ClientError::Closed);
            }
            self.poll();
            self.session.tick(physics);
            self.flush().await?;
            ticked += 1;
        }
        Ok(())
    }

    /// Leave the room and close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.session.leave();
        self.flush().await?;
        drop(self.outgoing);
        let _ = self.writer.await;
        self.reader.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use crate::config::GameConfig;
    use crate::game::physics::ProximityPhysics;
    use crate::network::protocol::PeerProperties;
    use crate::network::server::{GameServer, ServerConfig};

    #[tokio::test]
    async fn test_client_joins_and_starts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let config = GameConfig::default();
        let physics = ProximityPhysics::from_config(&config);
        let properties = PeerProperties { class: None, ready: true };
        let session = PeerSession::new(Arc::new(config), "solo", properties);

        let mut client = RelayClient::connect(&format!("ws://{}", addr), "crypt", session).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), client.next_message()).await.unwrap().unwrap();
        assert!(client.session().is_authority());

        client.session_mut().start_game().unwrap();
        client.run(&physics, Some(3)).await.unwrap();
        assert!(client.session().local_player().is_some());

        client.close().await.unwrap();
        server.shutdown();
    }
}
