//! # Duck Sync
//!
//! Room server and session synchronizer for multiplayer Duck Hunt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DUCK SYNC                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/               - Deterministic primitives              │
//! │  └── rng.rs          - LCG sequence generator, wave seeds    │
//! │                                                              │
//! │  game/               - Shared game data                      │
//! │  ├── level.rs        - Level description                     │
//! │  ├── spawn.rs        - Seeded wave planning, spawn seam      │
//! │  └── state.rs        - Players, counters, snapshots          │
//! │                                                              │
//! │  network/            - Networking                            │
//! │  ├── protocol.rs     - Message types                         │
//! │  ├── room.rs         - Authoritative room state              │
//! │  ├── registry.rs     - Room lifecycle and capacity           │
//! │  ├── server.rs       - WebSocket room server                 │
//! │  ├── client.rs       - Client session adapter                │
//! │  └── orchestrator.rs - Initiator / follower role logic       │
//! │                                                              │
//! │  config.rs           - Environment configuration             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Synchronization Model
//!
//! Ducks are never streamed. The server stamps each wave with a start time
//! and derives a 32-bit seed from it. Every client seeds its own
//! [`SequenceGenerator`] with that value and draws the same duck set.
//! Only discrete events (shots, hits, kills, wave and level boundaries)
//! travel over the wire.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{ConfigError, ServerConfig};
pub use crate::core::rng::{SequenceGenerator, derive_wave_seed};
pub use game::level::Level;
pub use game::spawn::{DuckMirror, DuckSpawner};
pub use game::state::{Player, PlayerId, RoomSnapshot};
pub use network::client::{ClientConfig, ClientError, SessionClient};
pub use network::orchestrator::{Orchestrator, Role, SessionCommands};
pub use network::registry::DEFAULT_ROOM_ID;
pub use network::server::GameServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
