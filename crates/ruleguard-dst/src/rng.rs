//! Deterministic RNG for simulation
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.
//!
//! One generator per run. Clones share the same stream, so every component
//! that draws (fault injector, file system, workload) advances the same
//! sequence and call order alone determines what each one sees.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use ruleguard_core::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const HEX_DIGITS: &[u8] = b"0123456789abcdef";

/// Deterministic random number generator
///
/// Given the same seed, produces the same sequence of values.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    /// The original seed (for logging/reproduction)
    seed: i64,
    /// The underlying RNG, shared by every clone
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl DeterministicRng {
    /// Create a new deterministic RNG with the given seed
    pub fn new(seed: i64) -> Self {
        let rng = ChaCha20Rng::seed_from_u64(seed as u64);
        Self {
            seed,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Create from environment variable DST_SEED or generate random seed
    ///
    /// Always logs the seed for reproducibility.
    pub fn from_env_or_random() -> Self {
        let seed = seed_from_env_or_random();
        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);
        Self::new(seed)
    }

    /// Get the seed used to create this RNG
    pub fn seed(&self) -> i64 {
        self.seed
    }

    fn lock(&self) -> MutexGuard<'_, ChaCha20Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a random u64
    pub fn next_u64(&self) -> u64 {
        self.lock().gen()
    }

    /// Generate a non-negative 63-bit integer
    pub fn next_i64(&self) -> i64 {
        (self.next_u64() >> 1) as i64
    }

    /// Generate a random f64 in [0, 1)
    pub fn next_f64(&self) -> f64 {
        self.lock().gen()
    }

    /// Fair coin flip
    pub fn next_bool(&self) -> bool {
        self.lock().gen()
    }

    /// Uniform integer in [0, n)
    ///
    /// # Panics
    ///
    /// Panics if `n <= 0`. Asking for an empty range is a harness bug.
    pub fn int_n(&self, n: i64) -> i64 {
        assert!(n > 0, "int_n: n must be positive, got {}", n);
        self.lock().gen_range(0..n)
    }

    /// Uniform integer in [0, n), rejecting `n <= 0` with an error
    pub fn try_int_n(&self, n: i64) -> Result<i64> {
        if n <= 0 {
            return Err(Error::invalid_argument(
                "n",
                format!("must be positive, got {}", n),
            ));
        }
        Ok(self.int_n(n))
    }

    /// Generate a random value in the given range [min, max)
    pub fn next_range(&self, min: u64, max: u64) -> u64 {
        debug_assert!(min < max, "min must be less than max");
        if min >= max {
            return min;
        }
        self.lock().gen_range(min..max)
    }

    /// Generate a random index for a slice of given length
    pub fn next_index(&self, len: usize) -> usize {
        assert!(len > 0, "length must be positive");
        self.lock().gen_range(0..len)
    }

    /// True with probability `p`
    ///
    /// The bounds are exact and consume no randomness: `p <= 0` is always
    /// false, `p >= 1` always true. Anything else costs exactly one draw.
    pub fn chance(&self, p: f64) -> bool {
        if p.is_nan() || p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.next_f64() < p
    }

    /// Choose a random element from a slice
    pub fn choose<'a, T>(&self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            Some(&slice[self.next_index(slice.len())])
        }
    }

    /// Choose a random element, or `T::default()` for an empty slice
    pub fn choice<T: Clone + Default>(&self, slice: &[T]) -> T {
        self.choose(slice).cloned().unwrap_or_default()
    }

    /// Fisher-Yates over `n` elements using a caller-supplied swap
    pub fn shuffle_with(&self, n: usize, mut swap: impl FnMut(usize, usize)) {
        for i in (1..n).rev() {
            let j = self.lock().gen_range(0..=i);
            swap(i, j);
        }
    }

    /// Shuffle a slice in place
    pub fn shuffle<T>(&self, slice: &mut [T]) {
        self.shuffle_with(slice.len(), |i, j| slice.swap(i, j));
    }

    /// Duration in [min, max), or `min` when the range is empty
    pub fn duration(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let span_nanos = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
        min + Duration::from_nanos(self.lock().gen_range(0..span_nanos))
    }

    /// Random alphanumeric string
    pub fn string(&self, len: usize) -> String {
        self.from_charset(ALPHANUMERIC, len)
    }

    /// Random lowercase hex string
    pub fn hex(&self, len: usize) -> String {
        self.from_charset(HEX_DIGITS, len)
    }

    /// Random UUID-shaped identifier (8-4-4-4-12 hex digits)
    pub fn uuid(&self) -> String {
        [8, 4, 4, 4, 12]
            .iter()
            .map(|len| self.hex(*len))
            .collect::<Vec<_>>()
            .join("-")
    }

    fn from_charset(&self, charset: &[u8], len: usize) -> String {
        let mut rng = self.lock();
        (0..len)
            .map(|_| charset[rng.gen_range(0..charset.len())] as char)
            .collect()
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Seed from DST_SEED, or a fresh random one
pub fn seed_from_env_or_random() -> i64 {
    std::env::var("DST_SEED")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(rand::random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_reproducibility() {
        let rng1 = DeterministicRng::new(12345);
        let rng2 = DeterministicRng::new(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
        assert_eq!(rng1.uuid(), rng2.uuid());
        assert_eq!(rng1.string(16), rng2.string(16));
    }

    #[test]
    fn test_rng_different_seeds() {
        let rng1 = DeterministicRng::new(12345);
        let rng2 = DeterministicRng::new(54321);

        let seq1: Vec<_> = (0..10).map(|_| rng1.next_u64()).collect();
        let seq2: Vec<_> = (0..10).map(|_| rng2.next_u64()).collect();

        assert_ne!(seq1, seq2);
    }

    #[test]
    fn test_negative_seed() {
        let rng1 = DeterministicRng::new(-7);
        let rng2 = DeterministicRng::new(-7);
        assert_eq!(rng1.seed(), -7);
        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_clones_share_stream() {
        let rng = DeterministicRng::new(9);
        let shared = rng.clone();
        let reference = DeterministicRng::new(9);

        let a = rng.next_u64();
        let b = shared.next_u64();
        assert_eq!(a, reference.next_u64());
        assert_eq!(b, reference.next_u64());
    }

    #[test]
    fn test_chance_bounds_consume_nothing() {
        let rng = DeterministicRng::new(42);
        let reference = DeterministicRng::new(42);

        for _ in 0..100 {
            assert!(!rng.chance(0.0));
            assert!(!rng.chance(-1.0));
            assert!(!rng.chance(f64::NAN));
            assert!(rng.chance(1.0));
            assert!(rng.chance(2.0));
        }
        assert_eq!(rng.next_u64(), reference.next_u64());
    }

    #[test]
    fn test_chance_frequency() {
        let rng = DeterministicRng::new(22222);
        let hits = (0..10_000).filter(|_| rng.chance(0.3)).count();
        assert!((2_700..=3_300).contains(&hits), "hits = {}", hits);
    }

    #[test]
    fn test_int_n_range() {
        let rng = DeterministicRng::new(42);
        for _ in 0..1000 {
            let v = rng.int_n(7);
            assert!((0..7).contains(&v));
        }
        assert_eq!(rng.int_n(1), 0);
    }

    #[test]
    #[should_panic(expected = "n must be positive")]
    fn test_int_n_zero_panics() {
        DeterministicRng::new(1).int_n(0);
    }

    #[test]
    fn test_try_int_n_rejects_non_positive() {
        let rng = DeterministicRng::new(1);
        assert!(rng.try_int_n(0).is_err());
        assert!(rng.try_int_n(-3).is_err());
        assert!(rng.try_int_n(3).is_ok());
    }

    #[test]
    fn test_next_i64_non_negative() {
        let rng = DeterministicRng::new(5);
        for _ in 0..1000 {
            assert!(rng.next_i64() >= 0);
        }
    }

    #[test]
    fn test_rng_range() {
        let rng = DeterministicRng::new(42);
        for _ in 0..100 {
            let value = rng.next_range(10, 20);
            assert!((10..20).contains(&value));
        }
    }

    #[test]
    fn test_rng_shuffle() {
        let rng = DeterministicRng::new(42);
        let rng2 = DeterministicRng::new(42);
        let mut data1 = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let mut data2 = data1.clone();

        rng.shuffle(&mut data1);
        rng2.shuffle(&mut data2);
        assert_eq!(data1, data2);

        data1.sort();
        assert_eq!(data1, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_shuffle_with_external_swap() {
        let rng = DeterministicRng::new(3);
        let mut a = vec!['a', 'b', 'c', 'd'];
        let mut b = vec![1, 2, 3, 4];
        rng.shuffle_with(a.len(), |i, j| {
            a.swap(i, j);
            b.swap(i, j);
        });
        // Parallel arrays stay aligned
        for (letter, number) in a.iter().zip(b.iter()) {
            assert_eq!(*letter as u8 - b'a' + 1, *number as u8);
        }
    }

    #[test]
    fn test_rng_choose() {
        let rng = DeterministicRng::new(42);
        let data = vec!["a", "b", "c"];

        let choice = rng.choose(&data);
        assert!(choice.is_some());
        assert!(data.contains(choice.unwrap()));

        let empty: Vec<i32> = vec![];
        assert!(rng.choose(&empty).is_none());
    }

    #[test]
    fn test_choice_empty_returns_default() {
        let rng = DeterministicRng::new(42);
        let reference = DeterministicRng::new(42);
        let empty: Vec<String> = vec![];
        assert_eq!(rng.choice(&empty), "");
        assert_eq!(rng.next_u64(), reference.next_u64());
    }

    #[test]
    fn test_duration_bounds() {
        let rng = DeterministicRng::new(42);
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(50);
        for _ in 0..100 {
            let d = rng.duration(min, max);
            assert!(d >= min && d < max);
        }
        assert_eq!(rng.duration(max, min), max);
        assert_eq!(rng.duration(min, min), min);
    }

    #[test]
    fn test_string_and_hex_charsets() {
        let rng = DeterministicRng::new(42);
        let s = rng.string(64);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));

        let h = rng.hex(32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_uuid_shape() {
        let rng = DeterministicRng::new(42);
        let id = rng.uuid();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_ne!(id, rng.uuid());
    }
}
