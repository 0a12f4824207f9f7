//! Room Entity
//!
//! Authoritative state of one room: the roster, the shared level/wave
//! counters and a sparse duck position cache. Every `apply_*` operation
//! mutates that state and rebroadcasts to the members.
//!
//! Each member's outbound queue is unbounded, so a broadcast never blocks the
//! room and never drops a message for a live connection. Only a closed queue
//! (connection already gone) loses the message.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::rng::derive_wave_seed;
use crate::game::level::Level;
use crate::game::state::{
    GameState, ObjectPosition, Player, PlayerId, PositionRecord, RoomSnapshot, now_millis,
};
use crate::network::protocol::{
    DuckShot, GamePaused, GameStarted, Point, Scoreboard, ServerMessage, ShotFired, WaveStarted,
};

/// Outbound queue of one connection.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A roster entry plus its outbound queue.
#[derive(Debug)]
struct Member {
    player: Player,
    sender: MessageSender,
}

/// A room.
#[derive(Debug)]
pub struct Room {
    /// Room identifier.
    pub id: String,
    /// Members keyed by connection id.
    members: HashMap<PlayerId, Member>,
    /// Shared counters.
    game_state: GameState,
    /// Sparse duck position cache.
    object_positions: HashMap<String, PositionRecord>,
}

impl Room {
    /// Create an empty room.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
            game_state: GameState::default(),
            object_positions: HashMap::new(),
        }
    }

    // =========================================================================
    // Roster
    // =========================================================================

    /// Add a player. Capacity is enforced by the registry, not here.
    pub fn add_player(
        &mut self,
        player_id: PlayerId,
        name: Option<String>,
        sender: MessageSender,
    ) -> Player {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Player {}", self.members.len() + 1));
        let player = Player::new(player_id.clone(), name);

        self.members.insert(player_id, Member {
            player: player.clone(),
            sender,
        });

        player
    }

    /// Remove a player. Returns the removed entry, `None` if absent.
    pub fn remove_player(&mut self, player_id: &PlayerId) -> Option<Player> {
        self.members.remove(player_id).map(|m| m.player)
    }

    /// Look up a player.
    pub fn player(&self, player_id: &PlayerId) -> Option<&Player> {
        self.members.get(player_id).map(|m| &m.player)
    }

    /// Whether the connection is a member.
    pub fn has_player(&self, player_id: &PlayerId) -> bool {
        self.members.contains_key(player_id)
    }

    /// Number of members.
    pub fn player_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Shared counters.
    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    /// Roster, ordered by player id so snapshots are stable.
    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.members.values().map(|m| m.player.clone()).collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Reset the room for `level` and broadcast `game-started`.
    pub fn apply_start_game(&mut self, level: Level) {
        for member in self.members.values_mut() {
            member.player.score = 0;
            member.player.ducks_shot = 0;
            member.player.bullets = level.bullets;
        }
        self.game_state.reset_for_level(level.clone());

        debug!(room = %self.id, "Game started");
        self.broadcast(ServerMessage::GameStarted(GameStarted {
            level,
            players: self.players(),
        }));
    }

    /// Advance to the next wave using the wall clock.
    pub fn apply_start_wave(&mut self, ducks: u32, bullets: u32) -> WaveStarted {
        self.apply_start_wave_at(ducks, bullets, now_millis())
    }

    /// Advance to the next wave starting at `now_ms`.
    ///
    /// Not deduplicated: each call advances the wave counter.
    pub fn apply_start_wave_at(&mut self, ducks: u32, bullets: u32, now_ms: i64) -> WaveStarted {
        self.game_state.wave += 1;
        self.game_state.ducks = ducks;
        self.game_state.bullet_gauge = bullets;
        self.game_state.wave_start_time = Some(now_ms);
        self.object_positions.clear();

        for member in self.members.values_mut() {
            member.player.bullets = bullets;
        }

        let started = WaveStarted {
            wave: self.game_state.wave,
            ducks,
            bullets,
            wave_start_time: now_ms,
            seed: derive_wave_seed(now_ms),
        };

        debug!(room = %self.id, wave = started.wave, seed = started.seed, "Wave started");
        self.broadcast(ServerMessage::WaveStarted(started.clone()));
        started
    }

    /// Spend one of the shooter's bullets and broadcast the shot.
    ///
    /// Returns false (and does nothing) for an unknown shooter or an empty gun.
    pub fn apply_shot_fired(&mut self, player_id: &PlayerId, click_point: Point, radius: f64) -> bool {
        let Some(member) = self.members.get_mut(player_id) else {
            return false;
        };
        if member.player.bullets == 0 {
            return false;
        }

        member.player.bullets -= 1;
        let shot = ShotFired {
            player_id: player_id.clone(),
            player_name: member.player.name.clone(),
            click_point,
            radius,
        };

        self.game_state.bullet_gauge = self.members
            .values()
            .map(|m| m.player.bullets)
            .min()
            .unwrap_or(0);

        self.broadcast(ServerMessage::ShotFired(shot));
        true
    }

    /// Credit hits to a player and broadcast `score-update`.
    pub fn apply_ducks_hit(&mut self, player_id: &PlayerId, count: u32, points: u32) -> bool {
        let Some(member) = self.members.get_mut(player_id) else {
            return false;
        };

        member.player.ducks_shot = member.player.ducks_shot.saturating_add(count);
        member.player.score = member.player.score.saturating_add(points);
        self.game_state.ducks_shot = self.game_state.ducks_shot.saturating_add(count);
        self.game_state.total_score = self.game_state.total_score.saturating_add(points);

        self.broadcast(ServerMessage::ScoreUpdate(self.scoreboard()));
        true
    }

    /// Mark a duck dead in the cache (if cached) and broadcast `duck-shot`.
    pub fn apply_duck_shot(&mut self, duck_id: &str) {
        if let Some(record) = self.object_positions.get_mut(duck_id) {
            record.alive = false;
        }

        self.broadcast(ServerMessage::DuckShot(DuckShot {
            duck_id: duck_id.to_string(),
        }));
    }

    /// Broadcast `wave-ended`.
    pub fn apply_end_wave(&self) {
        self.broadcast(ServerMessage::WaveEnded);
    }

    /// Broadcast `level-ended` with the final roster and counters, then clear
    /// the level so later joiners see no level in progress.
    pub fn apply_end_level(&mut self) {
        self.broadcast(ServerMessage::LevelEnded(self.scoreboard()));
        self.game_state.level = None;
    }

    /// Record the pause flag and tell everyone except the sender.
    pub fn apply_pause(&mut self, player_id: &PlayerId, paused: bool) {
        self.game_state.paused = paused;
        self.broadcast_except(player_id, ServerMessage::GamePaused(GamePaused { paused }));
    }

    /// Store a position checkpoint. Not rebroadcast.
    pub fn record_duck_position(&mut self, duck_id: &str, x: f64, y: f64, alive: bool, now_ms: i64) {
        self.object_positions.insert(duck_id.to_string(), PositionRecord {
            x,
            y,
            alive,
            timestamp: now_ms,
        });
    }

    /// Cached position of a duck.
    pub fn duck_position(&self, duck_id: &str) -> Option<&PositionRecord> {
        self.object_positions.get(duck_id)
    }

    // =========================================================================
    // Snapshots & delivery
    // =========================================================================

    /// Full room state.
    pub fn snapshot(&self) -> RoomSnapshot {
        let mut object_positions: Vec<ObjectPosition> = self.object_positions
            .iter()
            .map(|(id, record)| ObjectPosition {
                id: id.clone(),
                record: record.clone(),
            })
            .collect();
        object_positions.sort_by(|a, b| a.id.cmp(&b.id));

        RoomSnapshot {
            players: self.players(),
            game_state: self.game_state.clone(),
            object_positions,
        }
    }

    fn scoreboard(&self) -> Scoreboard {
        Scoreboard {
            players: self.players(),
            game_state: self.game_state.clone(),
        }
    }

    /// Send to every member.
    pub fn broadcast(&self, message: ServerMessage) {
        for (id, member) in &self.members {
            deliver(&self.id, id, &member.sender, message.clone());
        }
    }

    /// Send to every member except `skip`.
    pub fn broadcast_except(&self, skip: &PlayerId, message: ServerMessage) {
        for (id, member) in self.members.iter().filter(|(id, _)| *id != skip) {
            deliver(&self.id, id, &member.sender, message.clone());
        }
    }

    /// Send to one member.
    pub fn send_to(&self, player_id: &PlayerId, message: ServerMessage) {
        if let Some(member) = self.members.get(player_id) {
            deliver(&self.id, player_id, &member.sender, message);
        }
    }
}

fn deliver(room_id: &str, player_id: &PlayerId, sender: &MessageSender, message: ServerMessage) {
    if sender.send(message).is_err() {
        debug!(room = room_id, player = %player_id, "Dropped outbound message, connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(room: &mut Room, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        room.add_player(PlayerId::new(id), None, tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn level(bullets: u32) -> Level {
        Level { bullets, ..Default::default() }
    }

    #[tokio::test]
    async fn test_add_remove_player() {
        let mut room = Room::new("MAIN");
        let _rx = join(&mut room, "A1");
        assert_eq!(room.player_count(), 1);
        assert_eq!(room.player(&PlayerId::new("A1")).unwrap().name, "Player 1");

        let _rx2 = join(&mut room, "B1");
        assert_eq!(room.player(&PlayerId::new("B1")).unwrap().name, "Player 2");

        assert!(room.remove_player(&PlayerId::new("A1")).is_some());
        assert!(room.remove_player(&PlayerId::new("A1")).is_none());
        assert_eq!(room.player_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_name_kept() {
        let mut room = Room::new("MAIN");
        let (tx, _rx) = mpsc::unbounded_channel();
        let player = room.add_player(PlayerId::new("A1"), Some("Alice".to_string()), tx);
        assert_eq!(player.name, "Alice");
    }

    #[tokio::test]
    async fn test_start_game_resets() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");
        room.apply_ducks_hit(&PlayerId::new("A1"), 2, 200);
        room.apply_pause(&PlayerId::new("B9"), true);
        drain(&mut rx);

        room.apply_start_game(level(10));

        let state = room.game_state();
        assert_eq!(state.wave, 0);
        assert_eq!(state.total_score, 0);
        assert_eq!(state.ducks_shot, 0);
        assert!(!state.paused);

        let player = room.player(&PlayerId::new("A1")).unwrap();
        assert_eq!(player.bullets, 10);
        assert_eq!(player.score, 0);

        match drain(&mut rx).as_slice() {
            [ServerMessage::GameStarted(started)] => {
                assert_eq!(started.level.bullets, 10);
                assert_eq!(started.players.len(), 1);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_wave_advances_and_seeds() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");
        room.record_duck_position("d0", 1.0, 2.0, true, 0);

        let started = room.apply_start_wave_at(2, 10, 0x1_2345_6789);
        assert_eq!(started.wave, 1);
        assert_eq!(started.seed, 0x2345_6789);
        assert_eq!(room.game_state().wave_start_time, Some(0x1_2345_6789));
        assert!(room.duck_position("d0").is_none());

        // Not deduplicated.
        let again = room.apply_start_wave_at(2, 10, 5);
        assert_eq!(again.wave, 2);

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[0], ServerMessage::WaveStarted(w) if w.wave == 1 && w.ducks == 2));
    }

    #[tokio::test]
    async fn test_shot_updates_gauge() {
        let mut room = Room::new("MAIN");
        let mut rx_a = join(&mut room, "A1");
        let _rx_b = join(&mut room, "B1");
        room.apply_start_wave_at(2, 3, 1);
        drain(&mut rx_a);

        let a = PlayerId::new("A1");
        assert!(room.apply_shot_fired(&a, Point { x: 10.0, y: 20.0 }, 60.0));
        assert_eq!(room.player(&a).unwrap().bullets, 2);
        assert_eq!(room.game_state().bullet_gauge, 2);

        assert!(room.apply_shot_fired(&a, Point::default(), 60.0));
        assert_eq!(room.game_state().bullet_gauge, 1);

        match drain(&mut rx_a).first() {
            Some(ServerMessage::ShotFired(shot)) => {
                assert_eq!(shot.player_id, a);
                assert_eq!(shot.player_name, "Player 1");
                assert_eq!(shot.click_point, Point { x: 10.0, y: 20.0 });
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shot_rejected_without_bullets() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");

        assert!(!room.apply_shot_fired(&PlayerId::new("A1"), Point::default(), 60.0));
        assert!(!room.apply_shot_fired(&PlayerId::new("ZZ"), Point::default(), 60.0));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_ducks_hit_accumulates() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");
        let a = PlayerId::new("A1");

        assert!(room.apply_ducks_hit(&a, 1, 100));
        assert!(room.apply_ducks_hit(&a, 2, 300));
        assert!(!room.apply_ducks_hit(&PlayerId::new("ZZ"), 5, 500));

        let player = room.player(&a).unwrap();
        assert_eq!(player.score, 400);
        assert_eq!(player.ducks_shot, 3);
        assert_eq!(room.game_state().total_score, 400);

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[1], ServerMessage::ScoreUpdate(b) if b.game_state.ducks_shot == 3));
    }

    #[tokio::test]
    async fn test_duck_shot_unknown_id_still_broadcasts() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");

        room.apply_duck_shot("never-seen");
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::DuckShot(DuckShot { duck_id: "never-seen".to_string() })],
        );
    }

    #[tokio::test]
    async fn test_duck_shot_marks_cached_dead() {
        let mut room = Room::new("MAIN");
        room.record_duck_position("d0", 1.0, 2.0, true, 7);
        room.apply_duck_shot("d0");
        assert!(!room.duck_position("d0").unwrap().alive);
        assert_eq!(room.snapshot().object_positions.len(), 1);
    }

    #[tokio::test]
    async fn test_pause_skips_sender() {
        let mut room = Room::new("MAIN");
        let mut rx_a = join(&mut room, "A1");
        let mut rx_b = join(&mut room, "B1");

        room.apply_pause(&PlayerId::new("A1"), true);
        assert!(room.game_state().paused);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::GamePaused(GamePaused { paused: true })]);
    }

    #[tokio::test]
    async fn test_end_level_snapshot() {
        let mut room = Room::new("MAIN");
        let mut rx = join(&mut room, "A1");
        room.apply_start_game(level(3));
        room.apply_ducks_hit(&PlayerId::new("A1"), 1, 50);
        drain(&mut rx);

        room.apply_end_wave();
        room.apply_end_level();
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0], ServerMessage::WaveEnded);
        assert!(matches!(
            &msgs[1],
            ServerMessage::LevelEnded(b) if b.game_state.total_score == 50 && b.game_state.level.is_some()
        ));
        assert!(room.snapshot().game_state.level.is_none());
    }

    #[tokio::test]
    async fn test_burst_keeps_wave_started() {
        let mut room = Room::new("MAIN");
        let _rx_a = join(&mut room, "A1");
        let mut rx_b = join(&mut room, "B1");
        let a = PlayerId::new("A1");

        room.apply_start_wave_at(2, 100, 1);
        for _ in 0..70 {
            assert!(room.apply_shot_fired(&a, Point::default(), 60.0));
        }
        room.apply_start_wave_at(2, 100, 2);

        let msgs = drain(&mut rx_b);
        assert_eq!(msgs.len(), 72);
        let waves: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::WaveStarted(w) => Some(w.wave),
                _ => None,
            })
            .collect();
        assert_eq!(waves, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_block_others() {
        let mut room = Room::new("MAIN");
        let rx_a = join(&mut room, "A1");
        let mut rx_b = join(&mut room, "B1");
        drop(rx_a);

        room.apply_end_wave();
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::WaveEnded]);
    }
}
