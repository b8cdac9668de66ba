use std::time::Duration;

/// Gravity interval per level: how long a piece rests on each row.
const GRAVITY_MS: [u64; 10] = [800, 700, 600, 500, 400, 300, 250, 200, 150, 100];

/// Levels past the table clamp to the fastest interval.
pub fn gravity_for(level: u8) -> Duration {
    let idx = (level as usize).min(GRAVITY_MS.len() - 1);
    Duration::from_millis(GRAVITY_MS[idx])
}
