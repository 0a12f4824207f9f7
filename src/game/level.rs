//! Level Description
//!
//! The shape of a level as it travels inside `start-game` and `game-started`.
//! Fields missing on the wire take the level creator's defaults.

use serde::{Serialize, Deserialize};

/// A playable level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Level {
    /// Level identifier (-1 for generated levels).
    pub id: i32,
    /// Display title.
    pub title: String,
    /// Waves in the level.
    pub waves: u32,
    /// Ducks per wave.
    pub ducks: u32,
    /// Base points for each duck shot.
    pub points_per_duck: u32,
    /// Flight speed, 0 (slow) to 10 (fast).
    pub speed: f64,
    /// Bullets each player gets per wave.
    pub bullets: u32,
    /// Shot radius in stage pixels.
    pub radius: f64,
    /// Wave time limit in seconds.
    pub time: u32,
}

impl Default for Level {
    fn default() -> Self {
        Self {
            id: -1,
            title: "Generated Level".to_string(),
            waves: 1,
            ducks: 1,
            points_per_duck: 100,
            speed: 8.0,
            bullets: 100,
            radius: 60.0,
            time: 30,
        }
    }
}

impl Level {
    /// Whether `wave` is the last wave of this level.
    pub fn is_last_wave(&self, wave: u32) -> bool {
        wave >= self.waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_level_takes_defaults() {
        let level: Level = serde_json::from_str(r#"{"bullets":10,"ducks":2}"#).unwrap();
        assert_eq!(level.bullets, 10);
        assert_eq!(level.ducks, 2);
        assert_eq!(level.waves, 1);
        assert_eq!(level.points_per_duck, 100);
        assert_eq!(level.time, 30);
    }

    #[test]
    fn test_camel_case_wire_names() {
        let json = serde_json::to_string(&Level::default()).unwrap();
        assert!(json.contains("\"pointsPerDuck\":100"));
    }

    #[test]
    fn test_is_last_wave() {
        let level = Level { waves: 3, ..Default::default() };
        assert!(!level.is_last_wave(2));
        assert!(level.is_last_wave(3));
    }
}
