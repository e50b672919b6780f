//! Random sources
//!
//! Staging names need 64 bits of strong randomness; tests need to replay or
//! force specific values. [`RandomSource`] is injected wherever randomness is
//! consumed. [`DeterministicRng`] drives fault injection in simulated stores.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of 64-bit random values
pub trait RandomSource: Send + Sync {
    fn next_u64(&self) -> Result<u64, rand::Error>;
}

/// Operating-system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn next_u64(&self) -> Result<u64, rand::Error> {
        let mut buf = [0u8; 8];
        OsRng.try_fill_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Seeded ChaCha stream; identical seeds give identical sequences
pub struct SeededRandom {
    rng: Mutex<ChaCha8Rng>,
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom").finish_non_exhaustive()
    }
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_u64(&self) -> Result<u64, rand::Error> {
        Ok(self.rng.lock().next_u64())
    }
}

/// Always yields the same value (forces staging-name collisions)
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub u64);

impl RandomSource for FixedRandom {
    fn next_u64(&self) -> Result<u64, rand::Error> {
        Ok(self.0)
    }
}

/// Deterministic RNG for simulation decisions (fault rolls, latencies)
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    pub fn gen_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }
}
