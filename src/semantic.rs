// src/semantic.rs
//
// Semantic fidelity scoring for offloaded perception payloads.
//
// The score blends feature-vector strength, predicted link cost and object
// priority into a single [0, 1] figure used both as a state input and for
// semantic participant selection.

use rand::Rng;

use crate::twin::round_to;

/// Length of the synthetic feature probe drawn per step.
pub const FEATURE_PROBE_DIM: usize = 1280;

/// Scale dividing the feature L2 norm before clipping.
const NORM_SCALE: f64 = 100.0;

const W_FEATURES: f64 = 0.4;
const W_DELAY: f64 = 0.3;
const W_ENERGY: f64 = 0.2;
const W_PRIORITY: f64 = 0.1;

/// Object-class priority used in the fidelity blend. Unknown labels fall
/// back to the "other" weight; matching is case-insensitive.
pub fn priority_weight(object_type: &str) -> f64 {
    match object_type.to_ascii_lowercase().as_str() {
        "person" => 1.0,
        "car" => 0.9,
        "bicycle" => 0.8,
        "animal" => 0.7,
        _ => 0.5,
    }
}

/// Fidelity score in [0, 1], rounded to 3 decimals.
///
/// Composition: 0.4 * clipped feature strength + 0.3 * delay headroom
/// + 0.2 * energy headroom + 0.1 * object priority.
pub fn compute_semantic_fidelity(
    features: &[f64],
    predicted_delay: f64,
    predicted_energy: f64,
    object_type: &str,
) -> f64 {
    let norm = features.iter().map(|v| v * v).sum::<f64>().sqrt();
    let strength = (norm / NORM_SCALE).clamp(0.0, 1.0);
    let delay_headroom = 1.0 - predicted_delay.clamp(0.0, 1.0);
    let energy_headroom = 1.0 - predicted_energy.clamp(0.0, 1.0);

    let score = W_FEATURES * strength
        + W_DELAY * delay_headroom
        + W_ENERGY * energy_headroom
        + W_PRIORITY * priority_weight(object_type);
    round_to(score, 3)
}

/// Random feature probe standing in for a perception embedding.
pub fn feature_probe(rng: &mut impl Rng) -> Vec<f64> {
    (0..FEATURE_PROBE_DIM).map(|_| rng.gen_range(0.0..1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn worst_case_floor_is_priority_only() {
        // Zero features, saturated link cost, unknown class: only the
        // priority term survives -> 0.1 * 0.5.
        let score = compute_semantic_fidelity(&[0.0; 8], 1.0, 1.0, "other");
        assert_eq!(score, 0.05);
    }

    #[test]
    fn best_case_hits_one() {
        // Feature norm far above the scale saturates the strength term.
        let features = vec![10.0; 1280];
        let score = compute_semantic_fidelity(&features, 0.0, 0.0, "person");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn priority_matching_is_case_insensitive() {
        assert_eq!(priority_weight("Person"), 1.0);
        assert_eq!(priority_weight("CAR"), 0.9);
        assert_eq!(priority_weight("biCyCle"), 0.8);
        assert_eq!(priority_weight("animal"), 0.7);
        assert_eq!(priority_weight("drone"), 0.5);
    }

    #[test]
    fn out_of_range_costs_are_clipped() {
        // Negative delay/energy behave like zero cost.
        let a = compute_semantic_fidelity(&[1.0; 4], -3.0, -3.0, "car");
        let b = compute_semantic_fidelity(&[1.0; 4], 0.0, 0.0, "car");
        assert_eq!(a, b);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for _ in 0..50 {
            let features = feature_probe(&mut rng);
            let pd = rng.gen_range(-0.5..1.5);
            let pe = rng.gen_range(-0.5..1.5);
            let score = compute_semantic_fidelity(&features, pd, pe, "car");
            assert!((0.0..=1.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn probe_has_expected_length_and_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        let probe = feature_probe(&mut rng);
        assert_eq!(probe.len(), FEATURE_PROBE_DIM);
        assert!(probe.iter().all(|v| (0.0..1.0).contains(v)));
    }
}
