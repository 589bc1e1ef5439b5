//! Ticket hash generation over a bounded alphabet
//!
//! Exhaustive mode enumerates the whole `|A|^L` space and shuffles it once,
//! so the order tickets are handed out carries no positional bias. Sampled
//! mode draws distinct random hashes, retrying on collision.

use crate::config::{Alphabet, PoolConfig, PoolMode};
use crate::error::{LotteryError, Result};
use crate::types::MAX_POOL_SIZE;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashGenerator {
    alphabet: Alphabet,
    length: usize,
}

impl HashGenerator {
    pub fn new(alphabet: Alphabet, length: usize) -> Self {
        Self { alphabet, length }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.alphabet, config.hash_length)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Number of distinct hashes, None on overflow
    pub fn space_size(&self) -> Option<u64> {
        let base = self.alphabet.size() as u64;
        base.checked_pow(u32::try_from(self.length).ok()?)
    }

    /// Hash at `index` in lexicographic order of the space
    fn nth(&self, mut index: u64) -> String {
        let chars = self.alphabet.chars();
        let base = chars.len() as u64;
        let mut out = vec![chars[0]; self.length];
        for slot in out.iter_mut().rev() {
            *slot = chars[(index % base) as usize];
            index /= base;
        }
        // alphabet is ASCII
        out.into_iter().map(char::from).collect()
    }

    fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let chars = self.alphabet.chars();
        (0..self.length)
            .map(|_| char::from(chars[rng.gen_range(0..chars.len())]))
            .collect()
    }

    /// Every combination exactly once, shuffled
    pub fn exhaustive<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<String>> {
        let size = self
            .space_size()
            .filter(|&s| s <= MAX_POOL_SIZE)
            .ok_or(LotteryError::PoolTooLarge(self.space_size().unwrap_or(u64::MAX)))?;

        let mut hashes: Vec<String> = (0..size).map(|i| self.nth(i)).collect();
        hashes.shuffle(rng);
        Ok(hashes)
    }

    /// `count` distinct random hashes, capped at the space size
    pub fn sample<R: Rng + ?Sized>(&self, count: u64, rng: &mut R) -> Result<Vec<String>> {
        let space = self.space_size().unwrap_or(u64::MAX);
        let count = count.min(space);
        if count > MAX_POOL_SIZE {
            return Err(LotteryError::PoolTooLarge(count));
        }

        // Dense request: rejection sampling would stall near the end
        if count.saturating_mul(2) > space {
            let mut hashes = self.exhaustive(rng)?;
            hashes.truncate(count as usize);
            return Ok(hashes);
        }

        let mut seen = HashSet::with_capacity(count as usize);
        let mut hashes = Vec::with_capacity(count as usize);
        while (hashes.len() as u64) < count {
            let candidate = self.random(rng);
            if seen.insert(candidate.clone()) {
                hashes.push(candidate);
            }
        }
        Ok(hashes)
    }

    pub fn generate<R: Rng + ?Sized>(&self, mode: PoolMode, rng: &mut R) -> Result<Vec<String>> {
        // an empty hash can never match a block suffix
        if self.length == 0 {
            return Err(LotteryError::InvalidHashLength(self.length));
        }
        match mode {
            PoolMode::Exhaustive => self.exhaustive(rng),
            PoolMode::Sampled(count) => self.sample(count, rng),
        }
    }
}

/// Shuffle RNG for a pool generation
pub fn pool_rng(seed: Option<u64>) -> ChaCha20Rng {
    match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    }
}
