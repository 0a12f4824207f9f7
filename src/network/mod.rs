//! Network Layer
//!
//! Authoritative room server and the client side of the session protocol.
//! Wall-clock time enters the system here (wave start stamps); everything
//! derived from it downstream is deterministic.

pub mod protocol;
pub mod room;
pub mod registry;
pub mod server;
pub mod client;
pub mod orchestrator;

pub use protocol::{ClientMessage, ServerMessage, WaveStarted};
pub use room::{MessageSender, Room};
pub use registry::{JoinOutcome, RegistryConfig, RegistryError, RoomRegistry};
pub use server::{GameServer, GameServerError};
pub use client::{ClientConfig, ClientError, ConnectionState, SessionClient};
pub use orchestrator::{attach, Orchestrator, Role, SessionCommands, WaveProgress};
