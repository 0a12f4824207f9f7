//! WebSocket Room Server
//!
//! Async WebSocket server hosting rooms. Each connection gets a reader loop
//! that parses client frames and applies them to the target room, and a
//! writer task that drains the connection's outbound queue.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::config::ServerConfig;
use crate::game::state::{PlayerId, now_millis};
use crate::network::protocol::{
    ClientMessage, ErrorCode, JoinRejected, JoinRequest, ServerError, ServerMessage,
};
use crate::network::registry::{RegistryError, RoomRegistry};
use crate::network::room::MessageSender;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Id assigned at accept time.
    player_id: PlayerId,
    /// Room joined, if any.
    room_id: Option<String>,
    /// Connection time.
    connected_at: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The room server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Room registry.
    registry: Arc<RoomRegistry>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(RoomRegistry::new(config.registry.clone()));

        Self {
            config,
            registry,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Room server v{} listening on {} (max {} players per room)",
            self.config.version,
            listener.local_addr()?,
            self.config.registry.max_players,
        );

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

                            debug!("New connection from {}", addr);
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

        self.registry.clear().await;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let registry = self.registry.clone();
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
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
            let player_id = PlayerId::generate();

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id: player_id.clone(),
                    room_id: None,
                    connected_at: Instant::now(),
                });
            }
            info!(player = %player_id, "Player connected from {}", addr);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(to = %addr, "-> {}", text);
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                #[cfg(feature = "debug-tracing")]
                                tracing::trace!(from = %addr, "<- {}", text);

                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidMessage,
                                            message: "Invalid message format".to_string(),
                                        }));
                                        continue;
                                    }
                                };

                                Self::handle_client_message(
                                    addr,
                                    &player_id,
                                    client_msg,
                                    &clients,
                                    &registry,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                    code: ErrorCode::UnsupportedFrame,
                                    message: "Binary frames are not supported".to_string(),
                                }));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();

            let removed = clients.write().await.remove(&addr);
            if let Some(client) = removed {
                if let Some(room_id) = client.room_id {
                    registry.leave(&room_id, &client.player_id).await;
                }
                debug!(
                    player = %client.player_id,
                    connected_secs = client.connected_at.elapsed().as_secs(),
                    "Client {} cleaned up", addr,
                );
            }
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        player_id: &PlayerId,
        msg: ClientMessage,
        clients: &Clients,
        registry: &Arc<RoomRegistry>,
        sender: &MessageSender,
    ) {
        match msg {
            ClientMessage::JoinGame(req) => {
                Self::handle_join(addr, player_id, req, clients, registry, sender).await;
            }
            other => {
                Self::handle_room_message(player_id, other, registry).await;
            }
        }
    }

    /// Handle `join-game`.
    async fn handle_join(
        addr: SocketAddr,
        player_id: &PlayerId,
        req: JoinRequest,
        clients: &Clients,
        registry: &Arc<RoomRegistry>,
        sender: &MessageSender,
    ) {
        // A connection is in at most one room.
        let previous = clients.read().await.get(&addr).and_then(|c| c.room_id.clone());
        if let Some(previous) = previous {
            registry.leave(&previous, player_id).await;
            if let Some(client) = clients.write().await.get_mut(&addr) {
                client.room_id = None;
            }
        }

        let outcome = match registry
            .join(req.room_id.as_deref(), player_id.clone(), req.player_name, sender.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(RegistryError::RoomFull { max_players, current_players }) => {
                let _ = sender.send(ServerMessage::JoinError(JoinRejected {
                    error: "Room is full".to_string(),
                    max_players,
                    current_players,
                }));
                return;
            }
        };

        if let Some(client) = clients.write().await.get_mut(&addr) {
            client.room_id = Some(outcome.room_id);
        }
    }

    /// Apply a room-scoped message. Unknown rooms and non-members are ignored.
    async fn handle_room_message(
        player_id: &PlayerId,
        msg: ClientMessage,
        registry: &Arc<RoomRegistry>,
    ) {
        let Some(room_id) = msg.room_id() else {
            return;
        };
        let Some(room) = registry.get(room_id).await else {
            debug!(room = %room_id, player = %player_id, "Ignoring message for unknown room");
            return;
        };

        let mut room = room.write().await;
        if !room.has_player(player_id) {
            debug!(room = %room.id, player = %player_id, "Ignoring message from non-member");
            return;
        }

        match msg {
            ClientMessage::StartGame(req) => {
                room.apply_start_game(req.level);
            }
            ClientMessage::StartWave(req) => {
                room.apply_start_wave(req.ducks, req.bullets);
            }
            ClientMessage::ShotFired(req) => {
                if !room.apply_shot_fired(player_id, req.click_point, req.radius) {
                    debug!(room = %room.id, player = %player_id, "Shot ignored, no bullets");
                }
            }
            ClientMessage::DucksHit(req) => {
                room.apply_ducks_hit(player_id, req.ducks_hit, req.points);
            }
            ClientMessage::DuckShot(req) => {
                room.apply_duck_shot(&req.duck_id);
            }
            ClientMessage::EndWave(_) => {
                room.apply_end_wave();
            }
            ClientMessage::EndLevel(_) => {
                room.apply_end_level();
            }
            ClientMessage::PauseGame(req) => {
                room.apply_pause(player_id, req.paused);
            }
            ClientMessage::DuckPosition(req) => {
                room.record_duck_position(&req.duck_id, req.x, req.y, req.alive, now_millis());
            }
            ClientMessage::JoinGame(_) => {}
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

    /// Get live room count.
    pub async fn room_count(&self) -> usize {
        self.registry.room_count().await
    }

    /// The room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
