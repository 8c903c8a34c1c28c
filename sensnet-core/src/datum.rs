//! Per-sensor datum assignment: a location code on Location nodes, a failure flag on Status nodes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{Role, LOCATION_MAX, LOCATION_MIN};

/// Source of the value a node stores for each newly admitted sensor.
pub trait DatumSource {
    fn assign(&mut self, role: Role) -> i32;
}

/// Pseudo-random datum. Seedable so runs can be reproduced.
pub struct RandomDatum {
    rng: StdRng,
}

impl RandomDatum {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl DatumSource for RandomDatum {
    fn assign(&mut self, role: Role) -> i32 {
        match role {
            Role::Location => self.rng.gen_range(LOCATION_MIN..=LOCATION_MAX),
            Role::Status => self.rng.gen_range(0..=1),
        }
    }
}

/// Hands out the same value every time.
pub struct FixedDatum(pub i32);

impl DatumSource for FixedDatum {
    fn assign(&mut self, _role: Role) -> i32 {
        self.0
    }
}

/// Hands out the queued values in order, then falls back to `fallback`.
pub struct ScriptedDatum {
    queue: std::collections::VecDeque<i32>,
    fallback: i32,
}

impl ScriptedDatum {
    pub fn new(values: impl IntoIterator<Item = i32>, fallback: i32) -> Self {
        Self {
            queue: values.into_iter().collect(),
            fallback,
        }
    }
}

impl DatumSource for ScriptedDatum {
    fn assign(&mut self, _role: Role) -> i32 {
        self.queue.pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_location_in_range() {
        let mut src = RandomDatum::seeded(7);
        for _ in 0..200 {
            let loc = src.assign(Role::Location);
            assert!((LOCATION_MIN..=LOCATION_MAX).contains(&loc));
        }
    }

    #[test]
    fn random_status_is_flag() {
        let mut src = RandomDatum::seeded(7);
        for _ in 0..200 {
            let flag = src.assign(Role::Status);
            assert!(flag == 0 || flag == 1);
        }
    }

    #[test]
    fn seeded_sources_repeat() {
        let mut a = RandomDatum::seeded(42);
        let mut b = RandomDatum::seeded(42);
        let xs: Vec<i32> = (0..20).map(|_| a.assign(Role::Location)).collect();
        let ys: Vec<i32> = (0..20).map(|_| b.assign(Role::Location)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn scripted_then_fallback() {
        let mut src = ScriptedDatum::new([5, 5], 1);
        assert_eq!(src.assign(Role::Location), 5);
        assert_eq!(src.assign(Role::Location), 5);
        assert_eq!(src.assign(Role::Location), 1);
    }
}
