// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// This is a hand-rolled implementation with zero external dependencies, chosen
// for portability and to guarantee identical output across all platforms.
//
// This crate is the single PRNG used across Songloom. Every random decision
// in a run (key, tempo, arrangement, chord and beat pattern picks, Markov
// walks, effect parameters, levels, layer inclusion) is drawn from a
// `SongRng` that is threaded explicitly through the call graph. Given the same
// seed and configuration, a run makes exactly the same decisions.
//
// Parallel generation uses `fork()`: the parent stream hands out child seeds
// sequentially, so the set of child streams depends only on the parent's
// state and never on thread scheduling.
//
// **Critical constraint: determinism.** Every method on `SongRng` must produce
// identical output given the same prior state, regardless of platform, compiler
// version, or optimization level. Do not use floating-point arithmetic in the
// core generator, stdlib PRNG, or any source of non-determinism in this module.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG — the project's sole source of randomness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SongRng {
    s: [u64; 4],
}

impl SongRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    /// Two `SongRng` instances created with the same seed will produce
    /// identical output sequences.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive an independent child stream.
    ///
    /// Consumes exactly one `u64` from this generator. Children forked in the
    /// same order from the same parent state are always identical.
    pub fn fork(&mut self) -> SongRng {
        SongRng::new(self.next_u64())
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a `u32` by taking the upper 32 bits of a `u64`.
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Generate a uniform `f64` in [0, 1).
    ///
    /// Uses the upper 53 bits of a `u64` to fill the mantissa of an f64.
    /// 53 bits gives full f64 precision (IEEE 754 double has a 52-bit
    /// mantissa + 1 implicit bit).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform `f64` between `low` and `high`.
    ///
    /// Unlike the integer ranges this accepts `low == high` and then returns
    /// `low` exactly, so a degenerate `[3, 3]` parameter range always yields 3.
    /// Panics if `low > high`.
    pub fn uniform_f64(&mut self, low: f64, high: f64) -> f64 {
        assert!(low <= high, "uniform_f64: low must be <= high");
        low + self.next_f64() * (high - low)
    }

    /// Generate a uniform random integer in `[low, high)`.
    ///
    /// Uses rejection sampling to avoid modulo bias.
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        // Rejection sampling to avoid modulo bias.
        let threshold = range.wrapping_neg() % range; // = (2^64 - range) % range
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Generate a uniform random `usize` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Generate a uniform random `u32` in `[low, high]` (inclusive on both ends).
    ///
    /// Panics if `low > high`.
    pub fn range_u32_inclusive(&mut self, low: u32, high: u32) -> u32 {
        assert!(low <= high, "range_u32_inclusive: low must be <= high");
        self.range_u64(low as u64, high as u64 + 1) as u32
    }

    /// Generate a uniform random `u8` in `[low, high]` (inclusive on both ends).
    ///
    /// Panics if `low > high`.
    pub fn range_u8_inclusive(&mut self, low: u8, high: u8) -> u8 {
        assert!(low <= high, "range_u8_inclusive: low must be <= high");
        self.range_u64(low as u64, high as u64 + 1) as u8
    }

    /// Pick one element uniformly. Returns `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.range_usize(0, items.len());
        items.get(idx)
    }

    /// Return `true` with probability `p`, `false` otherwise.
    ///
    /// `p <= 0.0` always returns false, `p >= 1.0` always returns true.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// SplitMix64 — used only for seeding xoshiro256++ from a single `u64`.
///
/// This is the standard recommendation from the xoshiro authors for
/// expanding a small seed into a larger state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
