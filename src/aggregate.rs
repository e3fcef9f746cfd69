// src/aggregate.rs
//
// Federated averaging over actor parameter sets, plus the cosine
// divergence monitor logged per client after each round.
//
// Aggregation is strict: every participant must ship exactly the same
// tensor names and shapes as the first one, otherwise the round is
// aborted with a hard error. Silently skipping a malformed update would
// bias the global model.

use std::fmt;

use crate::params::ParamSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// No parameter sets to average.
    Empty,
    /// A participant is missing a tensor (or carries an extra one).
    KeySetMismatch { key: String },
    /// A shared tensor disagrees on shape.
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Weight vector length does not match the number of sets.
    WeightCountMismatch { sets: usize, weights: usize },
    /// Weights sum to zero or less, so normalization is undefined.
    ZeroWeightSum,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateError::Empty => write!(f, "no parameter sets to aggregate"),
            AggregateError::KeySetMismatch { key } => {
                write!(f, "parameter sets disagree on tensor {key:?}")
            }
            AggregateError::ShapeMismatch { key, expected, got } => write!(
                f,
                "tensor {key:?} has shape {got:?}, expected {expected:?}"
            ),
            AggregateError::WeightCountMismatch { sets, weights } => {
                write!(f, "{weights} weights supplied for {sets} parameter sets")
            }
            AggregateError::ZeroWeightSum => write!(f, "aggregation weights sum to zero"),
        }
    }
}

impl std::error::Error for AggregateError {}

/// Unweighted federated average: elementwise mean of every tensor.
pub fn fed_avg(sets: &[ParamSet]) -> Result<ParamSet, AggregateError> {
    let weights = vec![1.0; sets.len()];
    weighted_fed_avg(sets, &weights)
}

/// Weighted federated average. Weights are normalized by their sum, so
/// only relative magnitudes matter.
pub fn weighted_fed_avg(sets: &[ParamSet], weights: &[f64]) -> Result<ParamSet, AggregateError> {
    if sets.is_empty() {
        return Err(AggregateError::Empty);
    }
    if weights.len() != sets.len() {
        return Err(AggregateError::WeightCountMismatch {
            sets: sets.len(),
            weights: weights.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return Err(AggregateError::ZeroWeightSum);
    }

    let reference = &sets[0];
    for set in &sets[1..] {
        validate_same_layout(reference, set)?;
    }

    let mut out = ParamSet::new();
    for (key, tensor) in reference.iter() {
        let mut acc = tensor.mapv(|v| v * weights[0]);
        for (set, w) in sets.iter().zip(weights.iter()).skip(1) {
            if let Some(t) = set.get(key) {
                acc.zip_mut_with(t, |a, b| *a += w * b);
            }
        }
        acc.mapv_inplace(|v| v / total);
        out.insert(key.clone(), acc);
    }
    Ok(out)
}

fn validate_same_layout(reference: &ParamSet, other: &ParamSet) -> Result<(), AggregateError> {
    for (key, tensor) in reference.iter() {
        match other.get(key) {
            None => {
                return Err(AggregateError::KeySetMismatch { key: key.clone() });
            }
            Some(t) if t.shape() != tensor.shape() => {
                return Err(AggregateError::ShapeMismatch {
                    key: key.clone(),
                    expected: tensor.shape().to_vec(),
                    got: t.shape().to_vec(),
                });
            }
            Some(_) => {}
        }
    }
    if other.len() != reference.len() {
        for key in other.keys() {
            if reference.get(key).is_none() {
                return Err(AggregateError::KeySetMismatch { key: key.clone() });
            }
        }
    }
    Ok(())
}

/// Cosine distance in [0, 2]: 0 for parallel vectors, 1 for orthogonal,
/// 2 for opposite. Zero-norm inputs report 0.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    1.0 - (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Divergence between two parameter sets with the same layout: cosine
/// distance of their flattened tensors.
pub fn divergence(global: &ParamSet, local: &ParamSet) -> f64 {
    cosine_distance(&global.flatten(), &local.flatten())
}
