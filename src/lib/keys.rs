//! Match-key derivation for mate pairing.
//!
//! Two reads are mates iff their identifiers agree once the SAM-style mate
//! suffix (`/1`, `/2`) and any trailing metadata (everything from the first
//! space) are stripped. The matcher never compares full identifiers on the
//! hot path; it compares 64-bit hashes of the stripped stem.
//!
//! Hashing uses ahash with fixed seeds so keys are deterministic across runs
//! (the default `RandomState` reseeds per process). With `n` simultaneously
//! pending reads the chance of any collision is about `n^2 / 2^65` — around
//! 3e-6 even with ten million unmatched reads in flight — which normal
//! operation accepts. [`KeyValidator`] turns the risk into a fatal check.

use ahash::RandomState;
use bstr::BString;

use crate::errors::{RemateError, Result};

/// A 64-bit hash of a read identifier's pairing stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey(pub u64);

/// Strip the mate suffix and trailing metadata from an identifier.
///
/// Truncates at the first `/` or first space, whichever comes earlier, so
/// `frag/1`, `frag/2` and `frag 1:N:0:ACGT` all share the stem `frag`.
#[must_use]
pub fn pairing_stem(id: &[u8]) -> &[u8] {
    let mut end = id.len();
    if let Some(slash) = memchr(b'/', &id[..end]) {
        end = slash;
    }
    if let Some(space) = memchr(b' ', &id[..end]) {
        end = space;
    }
    &id[..end]
}

// bstr re-exports memchr internally but not publicly; a linear scan over a
// read id is already nanoseconds, so keep it local.
fn memchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Derives [`MatchKey`]s with process-stable seeds. No allocation.
#[derive(Debug, Clone)]
pub struct KeyMaker {
    state: RandomState,
}

impl KeyMaker {
    /// Fixed seeds keep keys identical run to run, which keeps diagnostics
    /// and partitioned runs comparable.
    #[must_use]
    pub fn new() -> Self {
        Self { state: RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344) }
    }

    /// Hash an identifier's pairing stem into a match key.
    #[must_use]
    pub fn key(&self, id: &[u8]) -> MatchKey {
        MatchKey(self.state.hash_one(pairing_stem(id)))
    }
}

impl Default for KeyMaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Side table mapping match keys back to the stems that produced them.
///
/// Enabled only in validation mode: every derived key is checked against the
/// table and a second, different stem under an existing key is a fatal
/// [`RemateError::KeyCollision`]. Costs one owned copy of every distinct
/// stem, which is why production runs leave it off.
#[derive(Debug, Default)]
pub struct KeyValidator {
    stems: ahash::AHashMap<MatchKey, BString>,
}

impl KeyValidator {
    /// Create an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`'s stem under `key`, failing on a collision.
    ///
    /// # Errors
    ///
    /// [`RemateError::KeyCollision`] if a different stem is already
    /// registered under `key`.
    pub fn check(&mut self, key: MatchKey, id: &[u8]) -> Result<()> {
        let stem = pairing_stem(id);
        if let Some(existing) = self.stems.get(&key) {
            if existing.as_slice() != stem {
                return Err(RemateError::KeyCollision {
                    key: key.0,
                    existing: existing.clone(),
                    incoming: BString::from(stem),
                });
            }
        } else {
            self.stems.insert(key, BString::from(stem));
        }
        Ok(())
    }

    /// Number of distinct stems seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// Whether no stems have been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}
