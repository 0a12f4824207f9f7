//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged with its kind:
//! `{"type": "start-wave", "roomId": "MAIN", "ducks": 2, "bullets": 10}`.

use serde::{Serialize, Deserialize};

use crate::game::level::Level;
use crate::game::state::{GameState, Player, PlayerId, RoomSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join (or create) a room.
    JoinGame(JoinRequest),

    /// Reset the room for a level.
    StartGame(StartGameRequest),

    /// Advance to the next wave.
    StartWave(StartWaveRequest),

    /// The local player fired.
    ShotFired(ShotRequest),

    /// The local player hit ducks.
    DucksHit(DucksHitRequest),

    /// A specific duck went down.
    DuckShot(DuckShotRequest),

    /// The wave is over.
    EndWave(RoomRef),

    /// The level is over.
    EndLevel(RoomRef),

    /// Pause or resume.
    PauseGame(PauseRequest),

    /// Sparse position checkpoint for one duck.
    DuckPosition(DuckPositionReport),
}

/// Join request. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Room to join; the server's default room when absent.
    #[serde(default)]
    pub room_id: Option<String>,
    /// Display name; `Player N` when absent.
    #[serde(default)]
    pub player_name: Option<String>,
}

/// Bare room reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    /// Target room.
    pub room_id: String,
}

/// Start a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    /// Target room.
    pub room_id: String,
    /// Level to play.
    pub level: Level,
}

/// Start a wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWaveRequest {
    /// Target room.
    pub room_id: String,
    /// Ducks in the wave.
    pub ducks: u32,
    /// Bullets per player.
    pub bullets: u32,
}

/// A point on the stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// A fired shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotRequest {
    /// Target room.
    pub room_id: String,
    /// Where the player clicked.
    pub click_point: Point,
    /// Shot radius.
    pub radius: f64,
}

/// Hits reported by the shooter's hit-testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DucksHitRequest {
    /// Target room.
    pub room_id: String,
    /// Ducks hit by one shot.
    pub ducks_hit: u32,
    /// Points earned.
    pub points: u32,
}

/// A duck went down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckShotRequest {
    /// Target room.
    pub room_id: String,
    /// Duck id (`d0`, `d1`, ...).
    pub duck_id: String,
}

/// Pause toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    /// Target room.
    pub room_id: String,
    /// New pause state.
    pub paused: bool,
}

/// Position checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckPositionReport {
    /// Target room.
    pub room_id: String,
    /// Duck id.
    pub duck_id: String,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Still flying.
    pub alive: bool,
}

impl ClientMessage {
    /// Room the message targets. `None` for a join without a room id.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ClientMessage::JoinGame(req) => req.room_id.as_deref(),
            ClientMessage::StartGame(req) => Some(&req.room_id),
            ClientMessage::StartWave(req) => Some(&req.room_id),
            ClientMessage::ShotFired(req) => Some(&req.room_id),
            ClientMessage::DucksHit(req) => Some(&req.room_id),
            ClientMessage::DuckShot(req) => Some(&req.room_id),
            ClientMessage::EndWave(req) | ClientMessage::EndLevel(req) => Some(&req.room_id),
            ClientMessage::PauseGame(req) => Some(&req.room_id),
            ClientMessage::DuckPosition(req) => Some(&req.room_id),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Join accepted.
    JoinedRoom(JoinedRoom),

    /// Join refused (room full).
    JoinError(JoinRejected),

    /// Someone else joined.
    PlayerJoined(PlayerJoined),

    /// Someone left.
    PlayerLeft(PlayerLeft),

    /// Full room snapshot.
    GameStateUpdate(RoomSnapshot),

    /// A level started.
    GameStarted(GameStarted),

    /// A wave started; carries the shared seed.
    WaveStarted(WaveStarted),

    /// The wave ended.
    WaveEnded,

    /// The level ended.
    LevelEnded(Scoreboard),

    /// A player fired.
    ShotFired(ShotFired),

    /// Scores changed.
    ScoreUpdate(Scoreboard),

    /// A duck went down.
    DuckShot(DuckShot),

    /// Pause toggled by another player.
    GamePaused(GamePaused),

    /// A frame could not be handled.
    Error(ServerError),
}

/// Join accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    /// Room joined.
    pub room_id: String,
    /// Id assigned to this connection.
    pub player_id: PlayerId,
    /// Display name in use.
    pub player_name: String,
    /// Room state at join time.
    pub game_state: RoomSnapshot,
}

/// Join refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRejected {
    /// Human-readable reason.
    pub error: String,
    /// Room capacity.
    pub max_players: usize,
    /// Players in the room.
    pub current_players: usize,
}

/// Another player joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    /// New player's id.
    pub player_id: PlayerId,
    /// New player's name.
    pub player_name: String,
}

/// A player left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    /// Departed player's id.
    pub player_id: PlayerId,
}

/// A level started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStarted {
    /// Level in play.
    pub level: Level,
    /// Roster after the reset.
    pub players: Vec<Player>,
}

/// A wave started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveStarted {
    /// Wave number within the level (1-based).
    pub wave: u32,
    /// Ducks in the wave.
    pub ducks: u32,
    /// Bullets per player.
    pub bullets: u32,
    /// Wave start, milliseconds since the Unix epoch.
    pub wave_start_time: i64,
    /// Shared generator seed.
    pub seed: u32,
}

/// Roster plus counters, used by `score-update` and `level-ended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scoreboard {
    /// Roster.
    pub players: Vec<Player>,
    /// Shared counters.
    pub game_state: GameState,
}

/// A player fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotFired {
    /// Shooter id.
    pub player_id: PlayerId,
    /// Shooter name.
    pub player_name: String,
    /// Where they clicked.
    pub click_point: Point,
    /// Shot radius.
    pub radius: f64,
}

/// A duck went down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckShot {
    /// Duck id.
    pub duck_id: String,
}

/// Pause toggled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GamePaused {
    /// New pause state.
    pub paused: bool,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame was not a valid client message.
    InvalidMessage,
    /// Binary frames are not part of the protocol.
    UnsupportedFrame,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
