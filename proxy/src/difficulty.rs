use crate::constants::POOL_DIFFICULTY_SCALE;

/// Pool difficulty carried by a raw `mining.set_difficulty` value
pub fn pool_difficulty_from_raw(raw: f64) -> f64 {
    raw / POOL_DIFFICULTY_SCALE
}

/// Difficulty handed to a worker: never looser than what the pool currently demands
pub fn effective_difficulty(base: f64, pool: Option<f64>) -> f64 {
    match pool {
        Some(pool) => base.min(pool),
        None => base,
    }
}
