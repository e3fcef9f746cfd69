// src/migration.rs
//
// Threshold migration trigger plus a linear-trend mobility predictor for
// anticipating where a client is headed before its session degrades.

use std::fmt;

/// Cost thresholds above which a session should migrate. The comparison
/// is inclusive on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationThresholds {
    pub queue: f64,
    pub energy: f64,
}

impl Default for MigrationThresholds {
    fn default() -> Self {
        Self {
            queue: 0.25,
            energy: 0.20,
        }
    }
}

/// True when predicted queue or energy crosses its threshold.
pub fn should_migrate(
    predicted_queue: f64,
    predicted_energy: f64,
    thresholds: &MigrationThresholds,
) -> bool {
    predicted_queue >= thresholds.queue || predicted_energy >= thresholds.energy
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobilityError {
    /// Trend extrapolation needs at least two positions.
    TrajectoryTooShort { points: usize },
}

impl fmt::Display for MobilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MobilityError::TrajectoryTooShort { points } => {
                write!(f, "trajectory has {points} point(s), need at least 2")
            }
        }
    }
}

impl std::error::Error for MobilityError {}

/// Extrapolate the next position from a 2-D position history.
///
/// The per-axis mean of consecutive deltas is treated as a constant
/// velocity and applied `steps` times past the last observation. Both
/// coordinates are rounded to 2 decimals.
pub fn predict_next_position(
    history: &[(f64, f64)],
    steps: usize,
) -> Result<(f64, f64), MobilityError> {
    if history.len() < 2 {
        return Err(MobilityError::TrajectoryTooShort {
            points: history.len(),
        });
    }

    let n = (history.len() - 1) as f64;
    let mut dx = 0.0;
    let mut dy = 0.0;
    for pair in history.windows(2) {
        dx += pair[1].0 - pair[0].0;
        dy += pair[1].1 - pair[0].1;
    }
    dx /= n;
    dy /= n;

    let last = history[history.len() - 1];
    let s = steps as f64;
    Ok((
        crate::twin::round_to(last.0 + dx * s, 2),
        crate::twin::round_to(last.1 + dy * s, 2),
    ))
}
