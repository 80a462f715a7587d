//! Session Random Number Generator
//!
//! Xorshift128+ stream owned by a single session. Every random decision in the
//! simulation (spawn points, power-up placement, forced tie-breaker choices,
//! friendly names) draws from it, so a session replays identically from its seed.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Seeded PRNG using the Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use rps_arena::core::rng::SessionRng;
///
/// let mut a = SessionRng::new(12345);
/// let mut b = SessionRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRng {
    state: [u64; 2],
}

impl Default for SessionRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SessionRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// SplitMix64 expands the seed so that neighbouring seeds still produce
    /// unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift is stuck forever on the all-zero state
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from a session identifier.
    pub fn for_session(session_id: &[u8; 16]) -> Self {
        Self::new(derive_session_seed(session_id, 0))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random float in range [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // 24 mantissa bits keep the result strictly below 1.0
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Generate a random float in range [min, max).
    #[inline]
    pub fn next_f32_range(&mut self, min: f32, max: f32) -> f32 {
        if min >= max {
            return min;
        }
        min + self.next_f32() * (max - min)
    }

    /// Generate a random boolean with the given probability of `true`.
    #[inline]
    pub fn next_bool(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            slice.get(idx)
        }
    }

    /// Shuffle a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Get current state.
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 step used for seed expansion.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed from a session id and a stream number.
///
/// Different `stream` values give independent streams for the same session
/// (the simulation and each agent get their own).
pub fn derive_session_seed(session_id: &[u8; 16], stream: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"RPS_ARENA_SEED_V1");
    hasher.update(session_id);
    hasher.update(stream.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}
