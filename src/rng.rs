//! Versioned, documented pseudo-random sequence for pack generation.
//!
//! Generated packs must be byte-identical for the same
//! `(template, scenario, level, seed)` in any implementation, so the sequence
//! is pinned here rather than delegated to a general-purpose RNG crate whose
//! output may change between releases.
//!
//! # Algorithm `packsmith-lcg-v1`
//!
//! ```text
//! initial state  = FNV-1a-64("{scenario}:{level}:{seed}")
//! next state     = state * 6364136223846793005 + 1442695040888963407  (mod 2^64)
//! next_u32       = high 32 bits of the new state
//! below(n)       = (next_u32 * n) >> 32                               (n > 0)
//! ```
//!
//! FNV-1a-64 uses offset basis `0xcbf29ce484222325` and prime
//! `0x100000001b3`. Any change to the above is a new algorithm version and
//! must bump [`ALGORITHM`].

use crate::types::Level;

/// Recorded in pack provenance so consumers know which sequence produced it.
pub const ALGORITHM: &str = "packsmith-lcg-v1";

const MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const INCREMENT: u64 = 1_442_695_040_888_963_407;
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(state: u64) -> Self {
        Self { state }
    }

    /// The sequence for one generated pack.
    pub fn for_pack(scenario: &str, level: Level, seed: u64) -> Self {
        Self::new(fnv1a64(format!("{scenario}:{level}:{seed}").as_bytes()))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT);
        (self.state >> 32) as u32
    }

    /// Uniform-ish index in `0..n`. Returns 0 for `n == 0`.
    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        ((u64::from(self.next_u32()) * n as u64) >> 32) as usize
    }

    /// `k` distinct indices from `0..n`, returned in ascending order.
    ///
    /// Partial Fisher-Yates over `0..n`; `k` is clamped to `n`.
    pub fn choose_distinct(&mut self, n: usize, k: usize) -> Vec<usize> {
        let k = k.min(n);
        let mut pool: Vec<usize> = (0..n).collect();
        for i in 0..k {
            let j = i + self.below(n - i);
            pool.swap(i, j);
        }
        let mut picked = pool[..k].to_vec();
        picked.sort_unstable();
        picked
    }
}
