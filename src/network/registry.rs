//! Room Registry
//!
//! Creates, resolves and garbage-collects rooms. Capacity is enforced here,
//! atomically with the membership insert.
//!
//! An emptied room is not dropped immediately. [`RoomRegistry::schedule_eviction`]
//! arms a grace timer keyed by room id; when it fires the room is removed only
//! if it is *still* empty. A player joining during the grace window therefore
//! keeps the room alive without cancelling anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::game::state::{Player, PlayerId};
use crate::network::protocol::{JoinedRoom, PlayerJoined, PlayerLeft, ServerMessage};
use crate::network::room::{MessageSender, Room};

/// Well-known room used when a join names none.
pub const DEFAULT_ROOM_ID: &str = "MAIN";

/// Default room capacity.
pub const DEFAULT_MAX_PLAYERS: usize = 20;

/// Default grace window before an empty room is evicted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum players per room.
    pub max_players: usize,
    /// Room used when a join names none.
    pub default_room_id: String,
    /// Delay between a room emptying and its eviction check.
    pub grace_period: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            default_room_id: DEFAULT_ROOM_ID.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The room is at capacity.
    #[error("Room is full")]
    RoomFull {
        /// Room capacity.
        max_players: usize,
        /// Players in the room.
        current_players: usize,
    },
}

/// Shared handle to a room.
pub type RoomHandle = Arc<RwLock<Room>>;

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Resolved room id.
    pub room_id: String,
    /// The room.
    pub room: RoomHandle,
    /// The new roster entry.
    pub player: Player,
}

/// A pending eviction timer and the generation it was armed with.
struct Eviction {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns every room in the process.
pub struct RoomRegistry {
    config: RegistryConfig,
    rooms: RwLock<HashMap<String, RoomHandle>>,
    evictions: Mutex<HashMap<String, Eviction>>,
    next_generation: AtomicU64,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            evictions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn resolve_id(&self, room_id: Option<&str>) -> String {
        match room_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.config.default_room_id.clone(),
        }
    }

    /// Resolve a room, creating it when unknown.
    ///
    /// Fails with [`RegistryError::RoomFull`] when the room is at capacity.
    pub async fn get_or_create(&self, room_id: Option<&str>) -> Result<RoomHandle, RegistryError> {
        let id = self.resolve_id(room_id);
        let mut rooms = self.rooms.write().await;
        let room = self.get_or_insert(&mut rooms, &id);

        let current_players = room.read().await.player_count();
        if current_players >= self.config.max_players {
            return Err(self.full(current_players));
        }

        Ok(room)
    }

    /// Join a room, creating it when unknown.
    ///
    /// Resolution, the capacity check and the insert happen under the registry
    /// lock, so concurrent joins cannot overfill a room and an eviction cannot
    /// remove a room between its lookup and the insert.
    ///
    /// The joiner gets `joined-room`, the others `player-joined`, and everyone
    /// `game-state-update`, all queued before the room lock is released. No
    /// other broadcast can reach the joiner ahead of `joined-room`.
    pub async fn join(
        &self,
        room_id: Option<&str>,
        player_id: PlayerId,
        name: Option<String>,
        sender: MessageSender,
    ) -> Result<JoinOutcome, RegistryError> {
        let id = self.resolve_id(room_id);
        let mut rooms = self.rooms.write().await;
        let room = self.get_or_insert(&mut rooms, &id);

        let player = {
            let mut guard = room.write().await;
            let current_players = guard.player_count();
            if current_players >= self.config.max_players {
                debug!(room = %id, current_players, "Join rejected, room full");
                return Err(self.full(current_players));
            }
            let player = guard.add_player(player_id.clone(), name, sender);
            let snapshot = guard.snapshot();

            guard.send_to(&player_id, ServerMessage::JoinedRoom(JoinedRoom {
                room_id: id.clone(),
                player_id: player_id.clone(),
                player_name: player.name.clone(),
                game_state: snapshot.clone(),
            }));
            guard.broadcast_except(&player_id, ServerMessage::PlayerJoined(PlayerJoined {
                player_id: player_id.clone(),
                player_name: player.name.clone(),
            }));
            guard.broadcast(ServerMessage::GameStateUpdate(snapshot));
            player
        };

        info!(room = %id, player = %player.id, name = %player.name, "Player joined");
        Ok(JoinOutcome {
            room_id: id,
            room,
            player,
        })
    }

    fn get_or_insert(&self, rooms: &mut HashMap<String, RoomHandle>, id: &str) -> RoomHandle {
        rooms
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(room = %id, "Created new room");
                Arc::new(RwLock::new(Room::new(id)))
            })
            .clone()
    }

    fn full(&self, current_players: usize) -> RegistryError {
        RegistryError::RoomFull {
            max_players: self.config.max_players,
            current_players,
        }
    }

    /// Look up a room without creating it.
    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Whether a room exists.
    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Remove a player, tell the rest, and arm eviction if the room emptied.
    ///
    /// Returns false when the room or the player is unknown.
    pub async fn leave(self: &Arc<Self>, room_id: &str, player_id: &PlayerId) -> bool {
        let Some(room) = self.get(room_id).await else {
            return false;
        };

        let now_empty = {
            let mut guard = room.write().await;
            if guard.remove_player(player_id).is_none() {
                return false;
            }
            guard.broadcast(ServerMessage::PlayerLeft(PlayerLeft {
                player_id: player_id.clone(),
            }));
            guard.is_empty()
        };

        info!(room = %room_id, player = %player_id, "Player left");
        if now_empty {
            self.schedule_eviction(room_id).await;
        }
        true
    }

    /// Arm the grace timer for a room.
    ///
    /// Re-arming replaces an older timer for the same room.
    pub async fn schedule_eviction(self: &Arc<Self>, room_id: &str) {
        let registry = Arc::clone(self);
        let id = room_id.to_string();
        let grace = self.config.grace_period;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Held across the spawn so the timer cannot finish before its entry exists.
        let mut evictions = self.evictions.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.evict_if_empty(&id, generation).await;
        });

        if let Some(previous) = evictions.insert(room_id.to_string(), Eviction { generation, handle }) {
            previous.handle.abort();
        }
        debug!(room = %room_id, grace_secs = grace.as_secs(), "Eviction armed");
    }

    /// Disarm a pending eviction. Returns whether one was pending.
    pub async fn cancel_eviction(&self, room_id: &str) -> bool {
        match self.evictions.lock().await.remove(room_id) {
            Some(eviction) => {
                eviction.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Timer body: remove the room only if it is still empty.
    async fn evict_if_empty(&self, room_id: &str, generation: u64) {
        {
            let mut rooms = self.rooms.write().await;
            let still_empty = match rooms.get(room_id) {
                Some(room) => room.read().await.is_empty(),
                None => false,
            };

            if still_empty {
                rooms.remove(room_id);
                info!(room = %room_id, "Cleaned up empty room");
            } else {
                debug!(room = %room_id, "Eviction skipped, room occupied or gone");
            }
        }

        let mut evictions = self.evictions.lock().await;
        if evictions.get(room_id).is_some_and(|e| e.generation == generation) {
            evictions.remove(room_id);
        }
    }

    /// Remove a room unconditionally.
    pub async fn remove(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.write().await.remove(room_id)
    }

    /// Drop every room and disarm every timer.
    pub async fn clear(&self) {
        for (_, eviction) in self.evictions.lock().await.drain() {
            eviction.handle.abort();
        }
        self.rooms.write().await.clear();
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry(max_players: usize) -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new(RegistryConfig {
            max_players,
            grace_period: Duration::from_secs(300),
            ..Default::default()
        }))
    }

    async fn join(
        reg: &RoomRegistry,
        room: Option<&str>,
        id: &str,
    ) -> (Result<JoinOutcome, RegistryError>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (reg.join(room, PlayerId::new(id), None, tx).await, rx)
    }

    /// Let spawned timer tasks run after the clock moves.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_join_default_room() {
        let reg = registry(4);
        let (result, _rx) = join(&reg, None, "A1").await;
        let outcome = result.unwrap();

        assert_eq!(outcome.room_id, DEFAULT_ROOM_ID);
        assert!(reg.contains(DEFAULT_ROOM_ID).await);
        assert_eq!(outcome.player.name, "Player 1");
    }

    #[tokio::test]
    async fn test_empty_room_id_means_default() {
        let reg = registry(4);
        let (result, _rx) = join(&reg, Some(""), "A1").await;
        assert_eq!(result.unwrap().room_id, DEFAULT_ROOM_ID);
    }

    #[tokio::test]
    async fn test_room_full() {
        let reg = registry(2);
        let (_a, _rx_a) = join(&reg, Some("R1"), "A1").await;
        let (_b, _rx_b) = join(&reg, Some("R1"), "B1").await;
        let (result, _rx_c) = join(&reg, Some("R1"), "C1").await;

        assert_eq!(result.unwrap_err(), RegistryError::RoomFull {
            max_players: 2,
            current_players: 2,
        });
        let room = reg.get("R1").await.unwrap();
        assert_eq!(room.read().await.player_count(), 2);

        assert!(matches!(
            reg.get_or_create(Some("R1")).await,
            Err(RegistryError::RoomFull { current_players: 2, .. }),
        ));
    }

    #[tokio::test]
    async fn test_concurrent_joins_respect_capacity() {
        let reg = registry(5);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::unbounded_channel();
                let ok = reg.join(Some("R1"), PlayerId::new(format!("P{}", i)), None, tx).await.is_ok();
                (ok, rx)
            }));
        }

        let mut joined = 0;
        let mut receivers = Vec::new();
        for task in tasks {
            let (ok, rx) = task.await.unwrap();
            if ok {
                joined += 1;
            }
            receivers.push(rx);
        }

        assert_eq!(joined, 5);
        assert_eq!(reg.get("R1").await.unwrap().read().await.player_count(), 5);
    }

    #[tokio::test]
    async fn test_join_announces_in_order() {
        let reg = registry(4);
        let (_a, mut rx_a) = join(&reg, None, "A1").await;
        let (_b, mut rx_b) = join(&reg, None, "B1").await;

        match rx_b.try_recv().unwrap() {
            ServerMessage::JoinedRoom(joined) => {
                assert_eq!(joined.player_id, PlayerId::new("B1"));
                assert_eq!(joined.game_state.players.len(), 2);
            }
            other => panic!("expected joined-room first, got {:?}", other),
        }
        assert!(matches!(rx_b.try_recv().unwrap(), ServerMessage::GameStateUpdate(_)));

        let to_a: Vec<ServerMessage> = std::iter::from_fn(|| rx_a.try_recv().ok()).collect();
        assert!(matches!(&to_a[0], ServerMessage::JoinedRoom(j) if j.player_id == PlayerId::new("A1")));
        assert!(matches!(&to_a[2], ServerMessage::PlayerJoined(p) if p.player_id == PlayerId::new("B1")));
        assert_eq!(to_a.len(), 4);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_player_left() {
        let reg = registry(4);
        let (_a, _rx_a) = join(&reg, None, "A1").await;
        let (_b, mut rx_b) = join(&reg, None, "B1").await;
        while rx_b.try_recv().is_ok() {}

        assert!(reg.leave(DEFAULT_ROOM_ID, &PlayerId::new("A1")).await);
        assert!(!reg.leave(DEFAULT_ROOM_ID, &PlayerId::new("A1")).await);
        assert!(!reg.leave("NOPE", &PlayerId::new("B1")).await);

        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerMessage::PlayerLeft(PlayerLeft { player_id: PlayerId::new("A1") }),
        );
        let room = reg.get(DEFAULT_ROOM_ID).await.unwrap();
        assert_eq!(room.read().await.player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_evicted_after_grace() {
        let reg = registry(4);
        let (_a, _rx) = join(&reg, None, "A1").await;
        reg.leave(DEFAULT_ROOM_ID, &PlayerId::new("A1")).await;

        // Still present inside the grace window.
        tokio::time::advance(Duration::from_secs(299)).await;
        settle().await;
        assert!(reg.contains(DEFAULT_ROOM_ID).await);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!reg.contains(DEFAULT_ROOM_ID).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_during_grace_keeps_room() {
        let reg = registry(4);
        let (_a, _rx_a) = join(&reg, None, "A1").await;
        reg.leave(DEFAULT_ROOM_ID, &PlayerId::new("A1")).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        let (_b, _rx_b) = join(&reg, None, "B1").await;

        // The timer still fires but finds the room occupied.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert!(reg.contains(DEFAULT_ROOM_ID).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_eviction() {
        let reg = registry(4);
        reg.get_or_create(Some("R1")).await.unwrap();
        reg.schedule_eviction("R1").await;
        assert!(reg.cancel_eviction("R1").await);
        assert!(!reg.cancel_eviction("R1").await);

        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        assert!(reg.contains("R1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_keeps_newer_entry() {
        let reg = registry(4);
        let (_a, _rx) = join(&reg, Some("R1"), "A1").await;
        reg.schedule_eviction("R1").await;
        reg.schedule_eviction("R1").await;

        // The first timer finishing late must not forget the second.
        reg.evict_if_empty("R1", 0).await;
        assert!(reg.contains("R1").await);
        assert!(reg.cancel_eviction("R1").await);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let reg = registry(4);
        reg.get_or_create(Some("R1")).await.unwrap();
        reg.get_or_create(Some("R2")).await.unwrap();
        assert_eq!(reg.room_count().await, 2);

        assert!(reg.remove("R1").await.is_some());
        assert!(reg.remove("R1").await.is_none());

        reg.schedule_eviction("R2").await;
        reg.clear().await;
        assert_eq!(reg.room_count().await, 0);
    }
}
