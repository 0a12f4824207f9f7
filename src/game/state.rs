//! Game State Definitions
//!
//! Roster and shared wave state held by a room, in the exact shape they are
//! serialized into snapshots. Wire field names are camelCase.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::level::Level;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Connection-scoped player identifier.
///
/// Unique within the server process; a reconnect gets a new id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id for a new connection.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// A member of a room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Connection-scoped id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Accumulated score.
    pub score: u32,
    /// Ducks this player has shot.
    pub ducks_shot: u32,
    /// Bullets left this wave.
    pub bullets: u32,
    /// Connection flag.
    pub connected: bool,
}

impl Player {
    /// Create a freshly joined player.
    pub fn new(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name,
            score: 0,
            ducks_shot: 0,
            bullets: 0,
            connected: true,
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Shared level/wave counters of a room.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Level in play (None before `start-game` and after `end-level`).
    pub level: Option<Level>,
    /// Current wave, 0 before the first wave of a level.
    pub wave: u32,
    /// Ducks in the current wave.
    pub ducks: u32,
    /// Ducks shot this level, all players.
    pub ducks_shot: u32,
    /// Ducks missed this level.
    pub ducks_missed: u32,
    /// Score this level, all players.
    pub total_score: u32,
    /// Shared bullet gauge: the minimum bullets across players after a shot.
    #[serde(rename = "bullets")]
    pub bullet_gauge: u32,
    /// Wave start, milliseconds since the Unix epoch.
    pub wave_start_time: Option<i64>,
    /// Pause flag.
    pub paused: bool,
}

impl GameState {
    /// Reset counters at the start of a level.
    pub fn reset_for_level(&mut self, level: Level) {
        self.level = Some(level);
        self.wave = 0;
        self.ducks_shot = 0;
        self.ducks_missed = 0;
        self.total_score = 0;
        self.paused = false;
    }
}

// =============================================================================
// POSITION CACHE
// =============================================================================

/// Best-effort position checkpoint for one duck.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Still flying.
    pub alive: bool,
    /// When recorded, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A position record with its duck id, as it appears in snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectPosition {
    /// Duck id.
    pub id: String,
    /// The record.
    #[serde(flatten)]
    pub record: PositionRecord,
}

/// Full room state, sent on join and in `game-state-update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Roster.
    pub players: Vec<Player>,
    /// Shared counters.
    pub game_state: GameState,
    /// Sparse position cache.
    pub object_positions: Vec<ObjectPosition>,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
