//! Deterministic Wave Spawning
//!
//! A wave is never streamed. Every client feeds the wave seed into a fresh
//! [`SequenceGenerator`] and draws the same choices in the same order, so the
//! duck set (ids, kinds, multipliers, first waypoints) is identical everywhere.
//!
//! The renderer plugs in through [`DuckSpawner`]; [`DuckMirror`] is the
//! headless implementation used by followers and tests.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::rng::SequenceGenerator;

/// Stage width in pixels.
pub const STAGE_WIDTH: f64 = 800.0;

/// Stage height in pixels.
pub const STAGE_HEIGHT: f64 = 600.0;

// =============================================================================
// DUCK KINDS
// =============================================================================

/// Duck variety. Index order is part of the determinism contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuckKind {
    /// Common, slow.
    Blue,
    /// Medium value.
    Red,
    /// Rare, fast, high multiplier.
    Black,
}

impl DuckKind {
    /// All kinds, in draw order.
    pub const ALL: [DuckKind; 3] = [DuckKind::Blue, DuckKind::Red, DuckKind::Black];

    /// Inclusive score multiplier range.
    pub fn multiplier_range(self) -> (u32, u32) {
        match self {
            DuckKind::Blue => (1, 2),
            DuckKind::Red => (2, 4),
            DuckKind::Black => (4, 6),
        }
    }

    /// Speed factor applied to the level speed.
    pub fn base_speed(self) -> f64 {
        match self {
            DuckKind::Blue => 1.0,
            DuckKind::Red => 1.2,
            DuckKind::Black => 1.5,
        }
    }
}

/// A point on the stage.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// Seed-derived choices for one duck.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckSpawn {
    /// Stable id shared by all clients (`d0`, `d1`, ...).
    pub id: String,
    /// Duck variety.
    pub kind: DuckKind,
    /// Score multiplier.
    pub multiplier: u32,
    /// Flight speed after the kind's factor.
    pub speed: f64,
    /// First flight destination from the launch point.
    pub first_waypoint: Waypoint,
}

/// Id of the duck at `index` within a wave.
pub fn duck_id(index: u32) -> String {
    format!("d{}", index)
}

/// Derive the duck set for a wave.
///
/// Draw order per duck is fixed: kind, multiplier, waypoint x, waypoint y.
/// `wave` does not enter the draws; it is carried for the collaborator.
pub fn plan_wave(count: u32, speed: f64, _wave: u32, seed: u32) -> Vec<DuckSpawn> {
    let mut rng = SequenceGenerator::new(seed);

    (0..count)
        .map(|i| {
            let kind = DuckKind::ALL[rng.next_int(DuckKind::ALL.len() as u32) as usize];
            let (lo, hi) = kind.multiplier_range();
            let multiplier = lo + rng.next_int(hi - lo + 1);
            let x = rng.range(0.0, STAGE_WIDTH);
            let y = rng.range(0.0, STAGE_HEIGHT);

            DuckSpawn {
                id: duck_id(i),
                kind,
                multiplier,
                speed: speed * kind.base_speed(),
                first_waypoint: Waypoint { x, y },
            }
        })
        .collect()
}

// =============================================================================
// COLLABORATOR SEAM
// =============================================================================

/// The rendering layer's spawn interface.
pub trait DuckSpawner {
    /// Spawn a wave from its shared seed.
    fn spawn(&mut self, count: u32, speed: f64, wave: u32, seed: u32);

    /// A duck was shot somewhere in the room.
    fn mark_shot(&mut self, duck_id: &str);
}

/// Headless local mirror of the current wave.
#[derive(Clone, Debug, Default)]
pub struct DuckMirror {
    wave: u32,
    seed: u32,
    ducks: Vec<DuckSpawn>,
    shot: BTreeSet<String>,
}

impl DuckMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ducks of the current wave.
    pub fn ducks(&self) -> &[DuckSpawn] {
        &self.ducks
    }

    /// Current wave number.
    pub fn wave(&self) -> u32 {
        self.wave
    }

    /// Seed of the current wave.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Whether a duck is still flying. Unknown ids are not alive.
    pub fn is_alive(&self, duck_id: &str) -> bool {
        self.ducks.iter().any(|d| d.id == duck_id) && !self.shot.contains(duck_id)
    }

    /// Ducks still flying.
    pub fn alive_count(&self) -> usize {
        self.ducks.iter().filter(|d| !self.shot.contains(&d.id)).count()
    }
}

impl DuckSpawner for DuckMirror {
    fn spawn(&mut self, count: u32, speed: f64, wave: u32, seed: u32) {
        self.wave = wave;
        self.seed = seed;
        self.ducks = plan_wave(count, speed, wave, seed);
        self.shot.clear();
    }

    fn mark_shot(&mut self, duck_id: &str) {
        self.shot.insert(duck_id.to_string());
    }
}
