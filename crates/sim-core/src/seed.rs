//! Per-entity seed derivation.
//!
//! Nothing in the simulation may call a platform RNG. Every draw stream is a
//! `ChaCha8Rng` seeded from a stable hash of the global run seed and the
//! identifiers of the entity being sampled, so parallel workers share no
//! generator state and iteration order never changes output.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derive a sub-seed from the global seed and an ordered list of identifier
/// parts.
///
/// FNV-1a fold over the part bytes, with the global seed mixed in through a
/// golden-ratio multiply and a separator byte between parts so that
/// `["ab"]` and `["a", "b"]` produce different seeds.
pub fn derive_seed(global: u64, parts: &[&str]) -> u64 {
    let mut h = FNV_OFFSET ^ global.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    for part in parts {
        for b in part.as_bytes() {
            h = (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME);
        }
        h = (h ^ 0x1f).wrapping_mul(FNV_PRIME);
    }
    h
}

/// A fresh deterministic RNG for the entity named by `parts`.
pub fn rng_for(global: u64, parts: &[&str]) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(global, parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_inputs_same_seed() {
        let a = derive_seed(420, &["2022-01", "REF-CC-001"]);
        let b = derive_seed(420, &["2022-01", "REF-CC-001"]);
        assert_eq!(a, b);
    }

    #[test]
    fn part_boundaries_matter() {
        assert_ne!(derive_seed(420, &["ab"]), derive_seed(420, &["a", "b"]));
        assert_ne!(derive_seed(420, &["a", "b"]), derive_seed(420, &["b", "a"]));
    }

    #[test]
    fn global_seed_matters() {
        assert_ne!(derive_seed(420, &["x"]), derive_seed(421, &["x"]));
    }

    #[test]
    fn rng_streams_are_reproducible() {
        let mut r1 = rng_for(42, &["period", "entity"]);
        let mut r2 = rng_for(42, &["period", "entity"]);
        let d1: Vec<f64> = (0..8).map(|_| r1.gen()).collect();
        let d2: Vec<f64> = (0..8).map(|_| r2.gen()).collect();
        assert_eq!(d1, d2);
    }
}
