//! Orchestrator Role Logic
//!
//! Decides, per client, who drives level and wave progression. There is no
//! lock or election. The first client to start a level before hearing a
//! `game-started` becomes the initiator and issues `start-game` and every
//! `start-wave`. Clients that hear `game-started` first, or join a room whose
//! level is already running, become followers and only reproduce waves from
//! the broadcast seed.
//!
//! ```text
//!            start_level             game-started (not initiator)
//! Undecided ────────────> Initiator   Undecided ───────────────> Follower
//!     ^                       │                                     │
//!     └───── level-ended ─────┴──────────────── level-ended ────────┘
//!
//!     any role ── disconnected ──> Offline (local progression)
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::core::rng::{derive_wave_seed, SequenceGenerator};
use crate::game::level::Level;
use crate::game::spawn::DuckSpawner;
use crate::game::state::{now_millis, RoomSnapshot};
use crate::network::client::SessionClient;
use crate::network::protocol::{GameStarted, WaveStarted};

/// Outbound commands the orchestrator issues.
pub trait SessionCommands {
    /// Reset the room for a level.
    fn start_game(&self, level: &Level);
    /// Advance the room to its next wave.
    fn start_wave(&self, ducks: u32, bullets: u32);
    /// End the current wave.
    fn end_wave(&self);
    /// End the current level.
    fn end_level(&self);
}

/// Progression role of this client for the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No level in progress.
    #[default]
    Undecided,
    /// Drives the room's level and waves.
    Initiator,
    /// Reproduces waves from broadcast seeds.
    Follower,
    /// No server; progresses locally.
    Offline,
}

/// What [`Orchestrator::finish_wave`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveProgress {
    /// Requested (or locally started) the next wave.
    NextWave,
    /// The level is over.
    LevelComplete,
    /// Not ours to advance; waiting for the initiator.
    Waiting,
}

/// Per-client progression state.
#[derive(Debug)]
pub struct Orchestrator<C, S> {
    commands: C,
    spawner: S,
    role: Role,
    level: Option<Level>,
    game_started_seen: bool,
    wave: u32,
    /// Wave whose successor the initiator already requested.
    advance_requested_for: Option<u32>,
    seed: Option<u32>,
    wave_start_time: Option<i64>,
    rng: SequenceGenerator,
}

impl<C: SessionCommands, S: DuckSpawner> Orchestrator<C, S> {
    /// Create an undecided orchestrator.
    pub fn new(commands: C, spawner: S) -> Self {
        Self {
            commands,
            spawner,
            role: Role::Undecided,
            level: None,
            game_started_seen: false,
            wave: 0,
            advance_requested_for: None,
            seed: None,
            wave_start_time: None,
            rng: SequenceGenerator::default(),
        }
    }

    /// Create an orchestrator with no server.
    pub fn offline(commands: C, spawner: S) -> Self {
        let mut orchestrator = Self::new(commands, spawner);
        orchestrator.role = Role::Offline;
        orchestrator
    }

    /// Local request to play `level`.
    pub fn start_level(&mut self, level: Level) {
        match self.role {
            Role::Offline => {
                info!(level = level.id, "Starting level locally");
                self.level = Some(level);
                self.wave = 0;
                self.start_local_wave();
            }
            _ if self.game_started_seen => {
                debug!("Level already started by another client, following");
                self.role = Role::Follower;
            }
            _ => {
                info!(level = level.id, "Starting level as initiator");
                self.role = Role::Initiator;
                self.commands.start_game(&level);
                self.commands.start_wave(level.ducks, level.bullets);
                self.wave = 0;
                self.advance_requested_for = Some(0);
                self.level = Some(level);
            }
        }
    }

    /// Inbound `game-started`.
    pub fn handle_game_started(&mut self, started: &GameStarted) {
        if self.role != Role::Initiator && self.role != Role::Offline {
            self.role = Role::Follower;
        }
        self.level = Some(started.level.clone());
        self.game_started_seen = true;
        self.wave = 0;
        debug!(role = ?self.role, "Game started");
    }

    /// Inbound `joined-room`. A level already running in the room makes this
    /// client a follower of it.
    pub fn handle_joined_room(&mut self, snapshot: &RoomSnapshot) {
        let Some(level) = snapshot.game_state.level.clone() else {
            return;
        };
        if self.role != Role::Initiator && self.role != Role::Offline {
            self.role = Role::Follower;
        }
        info!(level = level.id, wave = snapshot.game_state.wave, "Joined a level in progress");
        self.level = Some(level);
        self.game_started_seen = true;
        self.wave = snapshot.game_state.wave;

        // Rebuild the running wave from its start stamp.
        if let Some(start) = snapshot.game_state.wave_start_time.filter(|_| self.wave > 0) {
            self.wave_start_time = Some(start);
            self.spawn_wave(snapshot.game_state.ducks, derive_wave_seed(start));
        }
    }

    /// Inbound `wave-started`. Every role reproduces the wave from its seed.
    pub fn handle_wave_started(&mut self, started: &WaveStarted) {
        self.wave = started.wave;
        self.wave_start_time = Some(started.wave_start_time);
        self.spawn_wave(started.ducks, started.seed);
    }

    /// The local simulation finished the current wave.
    ///
    /// The initiator advances at most once per wave; repeated calls before the
    /// next `wave-started` arrives return [`WaveProgress::Waiting`].
    pub fn finish_wave(&mut self) -> WaveProgress {
        let Some(level) = self.level.clone() else {
            return WaveProgress::Waiting;
        };

        match self.role {
            Role::Initiator => {
                if self.advance_requested_for == Some(self.wave) {
                    return WaveProgress::Waiting;
                }
                self.advance_requested_for = Some(self.wave);
                self.commands.end_wave();
                if level.is_last_wave(self.wave) {
                    self.commands.end_level();
                    WaveProgress::LevelComplete
                } else {
                    self.commands.start_wave(level.ducks, level.bullets);
                    WaveProgress::NextWave
                }
            }
            Role::Offline => {
                if level.is_last_wave(self.wave) {
                    self.level = None;
                    WaveProgress::LevelComplete
                } else {
                    self.start_local_wave();
                    WaveProgress::NextWave
                }
            }
            Role::Follower | Role::Undecided => WaveProgress::Waiting,
        }
    }

    /// Inbound `duck-shot`.
    pub fn handle_duck_shot(&mut self, duck_id: &str) {
        self.spawner.mark_shot(duck_id);
    }

    /// Inbound `level-ended`.
    pub fn handle_level_ended(&mut self) {
        if self.role != Role::Offline {
            self.role = Role::Undecided;
        }
        self.game_started_seen = false;
        self.advance_requested_for = None;
        self.wave = 0;
    }

    /// The connection dropped; continue locally.
    pub fn handle_disconnected(&mut self) {
        info!(previous = ?self.role, "Connection lost, continuing offline");
        self.role = Role::Offline;
    }

    fn start_local_wave(&mut self) {
        let Some(ducks) = self.level.as_ref().map(|l| l.ducks) else {
            return;
        };
        let now = now_millis();
        self.wave += 1;
        self.wave_start_time = Some(now);
        self.spawn_wave(ducks, derive_wave_seed(now));
    }

    fn spawn_wave(&mut self, ducks: u32, seed: u32) {
        let speed = self.level.as_ref().map(|l| l.speed).unwrap_or_else(|| Level::default().speed);
        self.seed = Some(seed);
        self.rng = SequenceGenerator::new(seed);
        debug!(wave = self.wave, ducks, seed, "Spawning wave");
        self.spawner.spawn(ducks, speed, self.wave, seed);
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Level in progress.
    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    /// Current wave number.
    pub fn wave(&self) -> u32 {
        self.wave
    }

    /// Seed of the current wave.
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// Start of the current wave, milliseconds since the Unix epoch.
    pub fn wave_start_time(&self) -> Option<i64> {
        self.wave_start_time
    }

    /// Generator seeded with the current wave's seed, for further shared draws.
    pub fn rng_mut(&mut self) -> &mut SequenceGenerator {
        &mut self.rng
    }

    /// The spawn collaborator.
    pub fn spawner(&self) -> &S {
        &self.spawner
    }
}

/// Route a client's inbound events into a shared orchestrator.
pub fn attach<S>(orchestrator: &Arc<Mutex<Orchestrator<SessionClient, S>>>, client: &SessionClient)
where
    S: DuckSpawner + Send + 'static,
{
    fn with<S: DuckSpawner>(
        orchestrator: &Mutex<Orchestrator<SessionClient, S>>,
        f: impl FnOnce(&mut Orchestrator<SessionClient, S>),
    ) {
        let mut guard = orchestrator.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard);
    }

    let o = Arc::clone(orchestrator);
    client.on_joined_room(move |joined| with(&o, |orc| orc.handle_joined_room(&joined.game_state)));

    let o = Arc::clone(orchestrator);
    client.on_game_started(move |started| with(&o, |orc| orc.handle_game_started(started)));

    let o = Arc::clone(orchestrator);
    client.on_wave_started(move |started| with(&o, |orc| orc.handle_wave_started(started)));

    let o = Arc::clone(orchestrator);
    client.on_duck_shot(move |shot| with(&o, |orc| orc.handle_duck_shot(&shot.duck_id)));

    let o = Arc::clone(orchestrator);
    client.on_level_ended(move |_| with(&o, |orc| orc.handle_level_ended()));

    let o = Arc::clone(orchestrator);
    client.on_disconnected(move |_| with(&o, |orc| orc.handle_disconnected()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use crate::game::spawn::{plan_wave, DuckMirror};
    use crate::game::state::GameState;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        StartGame(u32),
        StartWave(u32, u32),
        EndWave,
        EndLevel,
    }

    #[derive(Debug, Default)]
    struct Recorder {
        sent: RefCell<Vec<Sent>>,
    }

    impl SessionCommands for Recorder {
        fn start_game(&self, level: &Level) {
            self.sent.borrow_mut().push(Sent::StartGame(level.bullets));
        }
        fn start_wave(&self, ducks: u32, bullets: u32) {
            self.sent.borrow_mut().push(Sent::StartWave(ducks, bullets));
        }
        fn end_wave(&self) {
            self.sent.borrow_mut().push(Sent::EndWave);
        }
        fn end_level(&self) {
            self.sent.borrow_mut().push(Sent::EndLevel);
        }
    }

    fn orchestrator() -> Orchestrator<Recorder, DuckMirror> {
        Orchestrator::new(Recorder::default(), DuckMirror::new())
    }

    fn level(waves: u32) -> Level {
        Level { waves, ducks: 2, bullets: 10, ..Default::default() }
    }

    fn game_started(level: Level) -> GameStarted {
        GameStarted { level, players: Vec::new() }
    }

    fn wave_started(wave: u32, seed: u32) -> WaveStarted {
        WaveStarted { wave, ducks: 2, bullets: 10, wave_start_time: 1_000 + wave as i64, seed }
    }

    fn sent(orc: &Orchestrator<Recorder, DuckMirror>) -> Vec<Sent> {
        orc.commands.sent.borrow().clone()
    }

    #[test]
    fn test_first_starter_initiates() {
        let mut orc = orchestrator();
        orc.start_level(level(2));

        assert_eq!(orc.role(), Role::Initiator);
        assert_eq!(sent(&orc), vec![Sent::StartGame(10), Sent::StartWave(2, 10)]);

        // Own game-started echo keeps the role.
        orc.handle_game_started(&game_started(level(2)));
        assert_eq!(orc.role(), Role::Initiator);
    }

    #[test]
    fn test_follower_after_game_started() {
        let mut orc = orchestrator();
        orc.handle_game_started(&game_started(level(2)));
        assert_eq!(orc.role(), Role::Follower);

        orc.start_level(level(2));
        assert_eq!(orc.role(), Role::Follower);
        assert!(sent(&orc).is_empty());
    }

    #[test]
    fn test_every_role_spawns_from_seed() {
        let mut initiator = orchestrator();
        let mut follower = orchestrator();
        initiator.start_level(level(2));
        follower.handle_game_started(&game_started(level(2)));

        let started = wave_started(1, 0xC0FFEE);
        initiator.handle_wave_started(&started);
        follower.handle_wave_started(&started);

        assert_eq!(initiator.spawner().ducks(), follower.spawner().ducks());
        assert_eq!(follower.spawner().ducks().len(), 2);
        assert_eq!(follower.seed(), Some(0xC0FFEE));
        assert_eq!(follower.wave_start_time(), Some(1_001));
        assert_eq!(initiator.rng_mut().next_u32(), follower.rng_mut().next_u32());
    }

    #[test]
    fn test_initiator_advances_then_ends_level() {
        let mut orc = orchestrator();
        orc.start_level(level(2));
        orc.handle_game_started(&game_started(level(2)));
        orc.handle_wave_started(&wave_started(1, 7));

        assert_eq!(orc.finish_wave(), WaveProgress::NextWave);
        orc.handle_wave_started(&wave_started(2, 8));
        assert_eq!(orc.finish_wave(), WaveProgress::LevelComplete);

        assert_eq!(sent(&orc), vec![
            Sent::StartGame(10),
            Sent::StartWave(2, 10),
            Sent::EndWave,
            Sent::StartWave(2, 10),
            Sent::EndWave,
            Sent::EndLevel,
        ]);
    }

    #[test]
    fn test_initiator_advances_once_per_wave() {
        let mut orc = orchestrator();
        orc.start_level(level(3));

        // Initial start-wave still in flight.
        assert_eq!(orc.finish_wave(), WaveProgress::Waiting);

        orc.handle_wave_started(&wave_started(1, 7));
        assert_eq!(orc.finish_wave(), WaveProgress::NextWave);
        assert_eq!(orc.finish_wave(), WaveProgress::Waiting);
        assert_eq!(orc.finish_wave(), WaveProgress::Waiting);

        orc.handle_wave_started(&wave_started(2, 8));
        assert_eq!(orc.finish_wave(), WaveProgress::NextWave);

        let starts = sent(&orc).iter().filter(|s| matches!(s, Sent::StartWave(..))).count();
        assert_eq!(starts, 3);
    }

    #[test]
    fn test_late_joiner_follows_running_level() {
        let mut orc = orchestrator();
        let running = Level { speed: 4.0, ..level(3) };
        let snapshot = RoomSnapshot {
            game_state: GameState {
                level: Some(running.clone()),
                wave: 2,
                ducks: 2,
                wave_start_time: Some(0x1_0000_0042),
                ..Default::default()
            },
            ..Default::default()
        };

        orc.handle_joined_room(&snapshot);
        assert_eq!(orc.role(), Role::Follower);
        assert_eq!(orc.wave(), 2);
        assert_eq!(orc.seed(), Some(0x42));
        assert_eq!(orc.spawner().ducks(), plan_wave(2, 4.0, 2, 0x42).as_slice());

        orc.start_level(level(3));
        assert_eq!(orc.role(), Role::Follower);
        assert!(sent(&orc).is_empty());

        orc.handle_wave_started(&wave_started(3, 9));
        assert_eq!(orc.spawner().ducks(), plan_wave(2, 4.0, 3, 9).as_slice());
    }

    #[test]
    fn test_joining_idle_room_stays_undecided() {
        let mut orc = orchestrator();
        orc.handle_joined_room(&RoomSnapshot::default());
        assert_eq!(orc.role(), Role::Undecided);

        orc.start_level(level(1));
        assert_eq!(orc.role(), Role::Initiator);
    }

    #[test]
    fn test_follower_never_starts_waves() {
        let mut orc = orchestrator();
        orc.handle_game_started(&game_started(level(3)));
        orc.handle_wave_started(&wave_started(1, 7));

        assert_eq!(orc.finish_wave(), WaveProgress::Waiting);
        assert!(sent(&orc).is_empty());
    }

    #[test]
    fn test_duck_shot_reaches_spawner() {
        let mut orc = orchestrator();
        orc.handle_game_started(&game_started(level(1)));
        orc.handle_wave_started(&wave_started(1, 7));

        orc.handle_duck_shot("d0");
        assert!(!orc.spawner().is_alive("d0"));
        assert!(orc.spawner().is_alive("d1"));
    }

    #[test]
    fn test_level_ended_resets_role() {
        let mut orc = orchestrator();
        orc.handle_game_started(&game_started(level(1)));
        orc.handle_level_ended();
        assert_eq!(orc.role(), Role::Undecided);

        // Next level can be initiated by this client.
        orc.start_level(level(1));
        assert_eq!(orc.role(), Role::Initiator);
    }

    #[test]
    fn test_offline_progression() {
        let mut orc = Orchestrator::offline(Recorder::default(), DuckMirror::new());
        orc.start_level(level(2));

        assert_eq!(orc.wave(), 1);
        assert_eq!(orc.spawner().ducks().len(), 2);
        assert_eq!(orc.finish_wave(), WaveProgress::NextWave);
        assert_eq!(orc.wave(), 2);
        assert_eq!(orc.finish_wave(), WaveProgress::LevelComplete);
        assert!(sent(&orc).is_empty());
    }

    #[test]
    fn test_disconnect_falls_back_offline() {
        let mut orc = orchestrator();
        orc.handle_game_started(&game_started(level(3)));
        orc.handle_wave_started(&wave_started(1, 7));
        orc.handle_disconnected();

        assert_eq!(orc.role(), Role::Offline);
        assert_eq!(orc.finish_wave(), WaveProgress::NextWave);
        assert_eq!(orc.wave(), 2);
    }
}
