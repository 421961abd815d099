use serde::{Deserialize, Serialize};

/// Seeded LCG driving every random choice in a simulation run.
///
/// Same seed, same sequence, on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    #[must_use]
    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // High bits of an LCG are far better distributed than the low ones.
        self.state >> 16
    }

    /// Next value in `[0, upper_exclusive)`; zero when the bound is zero.
    #[must_use]
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Index into a slice of `len` elements.
    #[must_use]
    pub fn pick_index(&mut self, len: usize) -> usize {
        let bound = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.next_bounded(bound)).unwrap_or(0)
    }

    /// Index in `[0, len)` different from `skip`. Requires `len >= 2`.
    #[must_use]
    pub fn pick_index_except(&mut self, len: usize, skip: usize) -> usize {
        let candidate = self.pick_index(len.saturating_sub(1));
        if candidate >= skip { candidate + 1 } else { candidate }
    }

    /// Bernoulli trial with an integer percentage.
    #[must_use]
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_bounded(100) < u64::from(percent)
    }
}
