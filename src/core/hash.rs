//! State Hashing for Verification
//!
//! Provides deterministic hashing of battle state so both clients of a
//! session can confirm they hold the same snapshot.

use serde::Serialize;
use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for battle state hashes.
const BATTLE_STATE_DOMAIN: &[u8] = b"CARDBATTLE_STATE_V1";

/// Deterministic hasher for battle state.
///
/// Wraps SHA-256 with a domain separator.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for battle state.
    pub fn for_battle_state() -> Self {
        Self::new(BATTLE_STATE_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute the state hash of a serializable battle value.
///
/// The canonical encoding is bincode, so field order in the hashed type
/// is part of the hash. `version` is mixed in first so two identical
/// boards reached at different points in a battle hash differently.
pub fn compute_state_hash<T: Serialize>(version: u64, state: &T) -> Result<StateHash, bincode::Error> {
    let encoded = bincode::serialize(state)?;

    let mut hasher = StateHasher::for_battle_state();
    hasher.update_u64(version);
    hasher.update_bytes(&encoded);
    Ok(hasher.finalize())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        health: i32,
        hand: Vec<String>,
    }

    fn sample() -> Sample {
        Sample { health: 30, hand: vec!["Goblin".into(), "Dragon".into()] }
    }

    #[test]
    fn test_state_hash_determinism() {
        let hash1 = compute_state_hash(3, &sample()).unwrap();
        let hash2 = compute_state_hash(3, &sample()).unwrap();
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_state_hash_covers_version_and_state() {
        let base = compute_state_hash(3, &sample()).unwrap();

        assert_ne!(base, compute_state_hash(4, &sample()).unwrap());

        let mut changed = sample();
        changed.health = 29;
        assert_ne!(base, compute_state_hash(3, &changed).unwrap());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u64(1);
            h.update_u64(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u64(2);
            h.update_u64(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }
}
