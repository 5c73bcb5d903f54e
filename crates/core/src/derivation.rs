//! Stable "true" parameters for variants that were defined without explicit
//! values. The variant's identity is hashed (SHA-256 over canonical JSON) and the
//! first 32 bits seed a generator, so the same variant always receives the same
//! CTR and weight vector.

use crate::error::{LiveOpsError, LiveOpsResult};
use crate::types::{TutorialId, VariantId, CONTEXT_DIM};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

pub const DEFAULT_MIN_CTR: f64 = 0.05;
pub const DEFAULT_MAX_CTR: f64 = 0.4;

const MIN_WEIGHT: f64 = 0.05;
const MAX_WEIGHT: f64 = 0.8;

fn identity_seed(tutorial_id: TutorialId, variant_id: VariantId, name: &str) -> LiveOpsResult<u64> {
    // serde_json::Map keeps keys sorted, which makes the encoding canonical.
    let canonical = serde_json::to_string(&serde_json::json!({
        "tutorial_id": tutorial_id,
        "variant_id": variant_id,
        "name": name,
    }))?;
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    let seed = u64::from_str_radix(&digest[..8], 16).map_err(anyhow::Error::from)?;
    Ok(seed)
}

/// Deterministic CTR in `[min_ctr, max_ctr)`. Both bounds must lie in
/// `[0, 1]` with `min_ctr <= max_ctr`.
pub fn derive_base_ctr(
    tutorial_id: TutorialId,
    variant_id: VariantId,
    name: &str,
    min_ctr: f64,
    max_ctr: f64,
) -> LiveOpsResult<f64> {
    let unit = 0.0..=1.0;
    if !unit.contains(&min_ctr) || !unit.contains(&max_ctr) || min_ctr > max_ctr {
        return Err(LiveOpsError::config(format!(
            "CTR bounds must satisfy 0 <= min <= max <= 1, got [{min_ctr}, {max_ctr}]"
        )));
    }
    if min_ctr == max_ctr {
        return Ok(min_ctr);
    }
    let seed = identity_seed(tutorial_id, variant_id, name)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(rng.gen_range(min_ctr..max_ctr))
}

/// Deterministic contextual weight vector, one entry per context dimension.
pub fn derive_param_weights(
    tutorial_id: TutorialId,
    variant_id: VariantId,
    name: &str,
) -> LiveOpsResult<Vec<f64>> {
    let seed = identity_seed(tutorial_id, variant_id, name)?;
    Ok((0..CONTEXT_DIM as u64)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i));
            rng.gen_range(MIN_WEIGHT..MAX_WEIGHT)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctr_is_stable_and_bounded() {
        let a = derive_base_ctr(1, 1, "Blue", DEFAULT_MIN_CTR, DEFAULT_MAX_CTR).unwrap();
        let b = derive_base_ctr(1, 1, "Blue", DEFAULT_MIN_CTR, DEFAULT_MAX_CTR).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((DEFAULT_MIN_CTR..DEFAULT_MAX_CTR).contains(&a));
    }

    #[test]
    fn test_distinct_variants_get_distinct_ctrs() {
        let a = derive_base_ctr(1, 1, "Blue", 0.0, 1.0).unwrap();
        let b = derive_base_ctr(1, 2, "Red", 0.0, 1.0).unwrap();
        assert_ne!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_ctr_bounds_are_validated() {
        for (min, max) in [(-1e308, 1e308), (2.0, 3.0), (0.4, 0.1), (f64::NAN, 0.5)] {
            assert!(matches!(
                derive_base_ctr(1, 1, "Blue", min, max),
                Err(LiveOpsError::Configuration(_))
            ));
        }
        assert_eq!(derive_base_ctr(1, 1, "Blue", 0.3, 0.3).unwrap(), 0.3);
        assert!((0.0..1.0).contains(&derive_base_ctr(1, 1, "Blue", 0.0, 1.0).unwrap()));
    }

    #[test]
    fn test_weights_shape() {
        let weights = derive_param_weights(3, 9, "Green").unwrap();
        assert_eq!(weights.len(), CONTEXT_DIM);
        assert!(weights.iter().all(|w| (MIN_WEIGHT..MAX_WEIGHT).contains(w)));
        assert_eq!(weights, derive_param_weights(3, 9, "Green").unwrap());
    }
}
