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

    /// Derive an independent stream, e.g. for the oracle or the network.
    #[must_use]
    pub const fn fork(&self, salt: u64) -> Self {
        Self::new(self.state ^ salt.wrapping_mul(0xD6E8_FEB8_6659_FD93))
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state >> 11
    }

    /// Value in `[0, upper_exclusive)`; `0` when the range is empty.
    pub const fn below(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Index into a collection of `len` elements.
    pub fn index(&mut self, len: usize) -> usize {
        let upper = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.below(upper)).unwrap_or(0)
    }

    /// Bernoulli trial with an integer percentage.
    pub fn chance(&mut self, percent: u8) -> bool {
        match percent {
            0 => false,
            100.. => true,
            _ => self.below(100) < u64::from(percent),
        }
    }

    /// Fisher–Yates shuffle in place.
    pub fn shuffle<T>(&mut self, values: &mut [T]) {
        for upper in (1..values.len()).rev() {
            let pick = self.index(upper + 1);
            values.swap(upper, pick);
        }
    }
}
