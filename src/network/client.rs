//! Client Session Adapter
//!
//! Game-facing handle to one server connection. Translates local actions into
//! protocol messages and inbound messages into hook calls.
//!
//! ## Hooks
//!
//! Each inbound event kind has one assignable slot. Assigning replaces the
//! previous callback; an unset slot silently drops the event. Hooks run on
//! the connection's reader task, after the adapter has updated its own view
//! of the room (ids and roster).
//!
//! ## Outbound
//!
//! Room-scoped sends are fire-and-forget: without a live connection and a
//! joined room they do nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::game::level::Level;
use crate::game::state::{Player, PlayerId, RoomSnapshot};
use crate::network::orchestrator::SessionCommands;
use crate::network::protocol::{
    ClientMessage, DuckPositionReport, DuckShot, DuckShotRequest, DucksHitRequest, GamePaused,
    GameStarted, JoinRequest, JoinRejected, JoinedRoom, PauseRequest, PlayerJoined, PlayerLeft,
    Point, RoomRef, Scoreboard, ServerMessage, ShotFired, ShotRequest, StartGameRequest,
    StartWaveRequest, WaveStarted,
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Socket open.
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Upper bound on [`SessionClient::join`] waiting for the server's answer.
    pub join_timeout: Duration,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
            outbound_buffer: 64,
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connect or join did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure while connecting.
    #[error("Connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    /// Operation needs a live connection.
    #[error("Not connected to server")]
    NotConnected,

    /// The server refused the join.
    #[error("Join rejected: {} ({}/{} players)", .0.error, .0.current_players, .0.max_players)]
    JoinRejected(JoinRejected),

    /// The outbound queue is full; the message was not sent.
    #[error("Outbound queue full")]
    QueueFull,

    /// The connection closed while waiting.
    #[error("Connection closed")]
    Closed,
}

type Hook<T> = Option<Arc<dyn Fn(&T) + Send + Sync>>;

#[derive(Default)]
struct Hooks {
    joined_room: Hook<JoinedRoom>,
    join_error: Hook<JoinRejected>,
    player_joined: Hook<PlayerJoined>,
    player_left: Hook<PlayerLeft>,
    game_state_update: Hook<RoomSnapshot>,
    game_started: Hook<GameStarted>,
    wave_started: Hook<WaveStarted>,
    wave_ended: Hook<()>,
    level_ended: Hook<Scoreboard>,
    shot_fired: Hook<ShotFired>,
    score_update: Hook<Scoreboard>,
    duck_shot: Hook<DuckShot>,
    game_paused: Hook<GamePaused>,
    disconnected: Hook<()>,
}

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    requested_name: Option<String>,
    room_id: Option<String>,
    player_id: Option<PlayerId>,
    player_name: Option<String>,
    players: Vec<Player>,
}

type JoinWaiter = oneshot::Sender<Result<JoinedRoom, JoinRejected>>;

struct ClientInner {
    config: ClientConfig,
    session: RwLock<Session>,
    hooks: RwLock<Hooks>,
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    pending_join: Mutex<Option<JoinWaiter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one server connection. Cheap to clone.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

// Hook state stays usable even if a hook panicked while a guard was held.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

macro_rules! hook_setters {
    ($($(#[$doc:meta])* $setter:ident => $slot:ident: $ty:ty;)*) => {
        $(
            $(#[$doc])*
            pub fn $setter<F>(&self, hook: F)
            where
                F: Fn(&$ty) + Send + Sync + 'static,
            {
                write(&self.inner.hooks).$slot = Some(Arc::new(hook));
            }
        )*
    };
}

impl SessionClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                session: RwLock::new(Session::default()),
                hooks: RwLock::new(Hooks::default()),
                outbound: Mutex::new(None),
                pending_join: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open a connection.
    ///
    /// Bounded by [`ClientConfig::connect_timeout`]. On timeout the half-open
    /// attempt is dropped and the client stays disconnected. An existing
    /// connection is closed first.
    pub async fn connect(&self, server_url: &str, player_name: Option<&str>) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Disconnected {
            self.disconnect();
        }

        {
            let mut session = write(&self.inner.session);
            session.state = ConnectionState::Connecting;
            session.requested_name = player_name.map(str::to_string);
        }

        let timeout = self.inner.config.connect_timeout;
        let ws_stream = match tokio::time::timeout(timeout, connect_async(server_url)).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                write(&self.inner.session).state = ConnectionState::Disconnected;
                warn!("Failed to connect to {}: {}", server_url, e);
                return Err(ClientError::Connection(e));
            }
            Err(_) => {
                write(&self.inner.session).state = ConnectionState::Disconnected;
                warn!("Connection to {} timed out", server_url);
                return Err(ClientError::Timeout(timeout));
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ClientMessage>(self.inner.config.outbound_buffer);

        // Writer: ends once every sender is dropped, then closes the socket.
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        *lock(&self.inner.outbound) = Some(msg_tx);
        write(&self.inner.session).state = ConnectionState::Connected;

        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(msg) => inner.dispatch(msg),
                        Err(e) => debug!("Ignoring unparsable server frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Connection error: {}", e);
                        break;
                    }
                }
            }
            inner.close_session();
        });

        *lock(&self.inner.reader) = Some(reader);

        info!("Connected to {}", server_url);
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
        self.inner.close_session();
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        read(&self.inner.session).state
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    // =========================================================================
    // Joining
    // =========================================================================

    /// Send `join-game`. The answer arrives through the join hooks.
    ///
    /// `player_name` defaults to the name given to [`connect`](Self::connect).
    pub fn join_game(&self, room_id: Option<&str>, player_name: Option<&str>) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let player_name = player_name
            .map(str::to_string)
            .or_else(|| read(&self.inner.session).requested_name.clone());

        let msg = ClientMessage::JoinGame(JoinRequest {
            room_id: room_id.map(str::to_string),
            player_name,
        });

        self.inner.send(msg)
    }

    /// Join and wait for the server's answer.
    pub async fn join(&self, room_id: Option<&str>, player_name: Option<&str>) -> Result<JoinedRoom, ClientError> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.inner.pending_join) = Some(tx);

        if let Err(e) = self.join_game(room_id, player_name) {
            lock(&self.inner.pending_join).take();
            return Err(e);
        }

        let timeout = self.inner.config.join_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(joined))) => Ok(joined),
            Ok(Ok(Err(rejected))) => Err(ClientError::JoinRejected(rejected)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                lock(&self.inner.pending_join).take();
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    // =========================================================================
    // Room view
    // =========================================================================

    /// Joined room, if any.
    pub fn room_id(&self) -> Option<String> {
        read(&self.inner.session).room_id.clone()
    }

    /// Id the server assigned to this connection.
    pub fn player_id(&self) -> Option<PlayerId> {
        read(&self.inner.session).player_id.clone()
    }

    /// Display name in use.
    pub fn player_name(&self) -> Option<String> {
        read(&self.inner.session).player_name.clone()
    }

    /// Last known roster.
    pub fn players(&self) -> Vec<Player> {
        read(&self.inner.session).players.clone()
    }

    /// This client's roster entry.
    pub fn current_player(&self) -> Option<Player> {
        let session = read(&self.inner.session);
        let id = session.player_id.as_ref()?;
        session.players.iter().find(|p| &p.id == id).cloned()
    }

    /// Everyone else in the room.
    pub fn other_players(&self) -> Vec<Player> {
        let session = read(&self.inner.session);
        session.players
            .iter()
            .filter(|p| Some(&p.id) != session.player_id.as_ref())
            .cloned()
            .collect()
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Reset the room for a level.
    pub fn start_game(&self, level: &Level) {
        self.inner.send_in_room(|room_id| ClientMessage::StartGame(StartGameRequest {
            room_id,
            level: level.clone(),
        }));
    }

    /// Advance the room to its next wave.
    pub fn start_wave(&self, ducks: u32, bullets: u32) {
        self.inner.send_in_room(|room_id| ClientMessage::StartWave(StartWaveRequest {
            room_id,
            ducks,
            bullets,
        }));
    }

    /// Report a local shot.
    pub fn fire_shot(&self, click_point: Point, radius: f64) {
        self.inner.send_in_room(|room_id| ClientMessage::ShotFired(ShotRequest {
            room_id,
            click_point,
            radius,
        }));
    }

    /// Report hits from a local shot.
    pub fn report_ducks_hit(&self, ducks_hit: u32, points: u32) {
        self.inner.send_in_room(|room_id| ClientMessage::DucksHit(DucksHitRequest {
            room_id,
            ducks_hit,
            points,
        }));
    }

    /// Report that a duck went down.
    pub fn report_duck_shot(&self, duck_id: &str) {
        self.inner.send_in_room(|room_id| ClientMessage::DuckShot(DuckShotRequest {
            room_id,
            duck_id: duck_id.to_string(),
        }));
    }

    /// End the current wave.
    pub fn end_wave(&self) {
        self.inner.send_in_room(|room_id| ClientMessage::EndWave(RoomRef { room_id }));
    }

    /// End the current level.
    pub fn end_level(&self) {
        self.inner.send_in_room(|room_id| ClientMessage::EndLevel(RoomRef { room_id }));
    }

    /// Pause or resume for everyone else.
    pub fn pause_game(&self, paused: bool) {
        self.inner.send_in_room(|room_id| ClientMessage::PauseGame(PauseRequest { room_id, paused }));
    }

    /// Checkpoint a duck position.
    pub fn report_duck_position(&self, duck_id: &str, x: f64, y: f64, alive: bool) {
        self.inner.send_in_room(|room_id| ClientMessage::DuckPosition(DuckPositionReport {
            room_id,
            duck_id: duck_id.to_string(),
            x,
            y,
            alive,
        }));
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    hook_setters! {
        /// Join accepted.
        on_joined_room => joined_room: JoinedRoom;
        /// Join refused.
        on_join_error => join_error: JoinRejected;
        /// Someone else joined.
        on_player_joined => player_joined: PlayerJoined;
        /// Someone left.
        on_player_left => player_left: PlayerLeft;
        /// Full room snapshot.
        on_game_state_update => game_state_update: RoomSnapshot;
        /// A level started.
        on_game_started => game_started: GameStarted;
        /// A wave started.
        on_wave_started => wave_started: WaveStarted;
        /// The wave ended.
        on_wave_ended => wave_ended: ();
        /// The level ended.
        on_level_ended => level_ended: Scoreboard;
        /// Another player fired. Own shots are not echoed.
        on_shot_fired => shot_fired: ShotFired;
        /// Scores changed.
        on_score_update => score_update: Scoreboard;
        /// A duck went down.
        on_duck_shot => duck_shot: DuckShot;
        /// Another player paused or resumed.
        on_game_paused => game_paused: GamePaused;
        /// The connection closed.
        on_disconnected => disconnected: ();
    }
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = read(&self.inner.session);
        f.debug_struct("SessionClient")
            .field("state", &session.state)
            .field("room_id", &session.room_id)
            .field("player_id", &session.player_id)
            .finish()
    }
}

impl SessionCommands for SessionClient {
    fn start_game(&self, level: &Level) {
        SessionClient::start_game(self, level);
    }

    fn start_wave(&self, ducks: u32, bullets: u32) {
        SessionClient::start_wave(self, ducks, bullets);
    }

    fn end_wave(&self) {
        SessionClient::end_wave(self);
    }

    fn end_level(&self) {
        SessionClient::end_level(self);
    }
}

impl ClientInner {
    /// Queue a message for the writer task.
    fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            return Err(ClientError::Closed);
        };
        tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!("Outbound queue full, dropping message");
                ClientError::QueueFull
            }
            TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    fn send_in_room<F>(&self, build: F)
    where
        F: FnOnce(String) -> ClientMessage,
    {
        let room_id = {
            let session = read(&self.session);
            if session.state != ConnectionState::Connected {
                return;
            }
            match &session.room_id {
                Some(id) => id.clone(),
                None => return,
            }
        };
        if let Err(e) = self.send(build(room_id)) {
            debug!("Dropped outbound message: {}", e);
        }
    }

    /// Tear down the session. Fires the disconnect hook once per connection.
    fn close_session(&self) {
        let was_connected = {
            let mut session = write(&self.session);
            let was_connected = session.state == ConnectionState::Connected;
            session.state = ConnectionState::Disconnected;
            session.room_id = None;
            session.player_id = None;
            session.players.clear();
            was_connected
        };

        // Dropping the sender lets the writer flush and close the socket.
        lock(&self.outbound).take();
        lock(&self.pending_join).take();

        if was_connected {
            info!("Disconnected from server");
            call(self.hook(|h| h.disconnected.clone()), &());
        }
    }

    /// Clone a hook out so it runs without the hooks lock held.
    fn hook<T>(&self, pick: impl FnOnce(&Hooks) -> Hook<T>) -> Hook<T> {
        pick(&read(&self.hooks))
    }

    fn resolve_join(&self, result: Result<JoinedRoom, JoinRejected>) {
        if let Some(waiter) = lock(&self.pending_join).take() {
            let _ = waiter.send(result);
        }
    }

    /// Update the local room view, then run the matching hook.
    fn dispatch(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::JoinedRoom(joined) => {
                {
                    let mut session = write(&self.session);
                    session.room_id = Some(joined.room_id.clone());
                    session.player_id = Some(joined.player_id.clone());
                    session.player_name = Some(joined.player_name.clone());
                    session.players = joined.game_state.players.clone();
                }
                debug!(room = %joined.room_id, player = %joined.player_id, "Joined room");
                let hook = self.hook(|h| h.joined_room.clone());
                self.resolve_join(Ok(joined.clone()));
                call(hook, &joined);
            }
            ServerMessage::JoinError(rejected) => {
                debug!("Join rejected: {}", rejected.error);
                let hook = self.hook(|h| h.join_error.clone());
                self.resolve_join(Err(rejected.clone()));
                call(hook, &rejected);
            }
            ServerMessage::PlayerJoined(joined) => {
                {
                    let mut session = write(&self.session);
                    if !session.players.iter().any(|p| p.id == joined.player_id) {
                        let player = Player::new(joined.player_id.clone(), joined.player_name.clone());
                        session.players.push(player);
                    }
                }
                call(self.hook(|h| h.player_joined.clone()), &joined);
            }
            ServerMessage::PlayerLeft(left) => {
                write(&self.session).players.retain(|p| p.id != left.player_id);
                call(self.hook(|h| h.player_left.clone()), &left);
            }
            ServerMessage::GameStateUpdate(snapshot) => {
                write(&self.session).players = snapshot.players.clone();
                call(self.hook(|h| h.game_state_update.clone()), &snapshot);
            }
            ServerMessage::GameStarted(started) => {
                write(&self.session).players = started.players.clone();
                call(self.hook(|h| h.game_started.clone()), &started);
            }
            ServerMessage::WaveStarted(started) => {
                call(self.hook(|h| h.wave_started.clone()), &started);
            }
            ServerMessage::WaveEnded => {
                call(self.hook(|h| h.wave_ended.clone()), &());
            }
            ServerMessage::LevelEnded(board) => {
                write(&self.session).players = board.players.clone();
                call(self.hook(|h| h.level_ended.clone()), &board);
            }
            ServerMessage::ShotFired(shot) => {
                let own = read(&self.session).player_id.as_ref() == Some(&shot.player_id);
                if !own {
                    call(self.hook(|h| h.shot_fired.clone()), &shot);
                }
            }
            ServerMessage::ScoreUpdate(board) => {
                write(&self.session).players = board.players.clone();
                call(self.hook(|h| h.score_update.clone()), &board);
            }
            ServerMessage::DuckShot(shot) => {
                call(self.hook(|h| h.duck_shot.clone()), &shot);
            }
            ServerMessage::GamePaused(paused) => {
                call(self.hook(|h| h.game_paused.clone()), &paused);
            }
            ServerMessage::Error(err) => {
                warn!("Server error {:?}: {}", err.code, err.message);
            }
        }
    }
}

fn call<T>(hook: Hook<T>, value: &T) {
    if let Some(hook) = hook {
        hook(value);
    }
}
