//! Game Data Module
//!
//! Everything clients and server agree on about the game itself.
//!
//! ## Module Structure
//!
//! - `level`: Level description carried by `start-game`
//! - `spawn`: Seeded wave planning and the renderer's spawn seam
//! - `state`: Players, shared counters, room snapshots

pub mod level;
pub mod spawn;
pub mod state;

// Re-export key types
pub use level::Level;
pub use spawn::{DuckKind, DuckMirror, DuckSpawn, DuckSpawner, plan_wave};
pub use state::{GameState, Player, PlayerId, RoomSnapshot};
