// src/params.rs
//
// Named parameter tensors for policy models.
//
// A `ParamSet` is the unit the federated aggregator works on: an ordered
// mapping from tensor names (e.g. "fc1.weight") to numeric arrays. Key order
// is deterministic (BTreeMap), which fixes the flattening order used for
// divergence monitoring.

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Errors raised when loading a `ParamSet` into a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// A tensor the model expects is absent from the set.
    MissingKey { key: String },
    /// A tensor is present but its shape does not match the model's.
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamError::MissingKey { key } => write!(f, "missing parameter tensor {key:?}"),
            ParamError::ShapeMismatch { key, expected, got } => write!(
                f,
                "parameter tensor {key:?} has shape {got:?}, expected {expected:?}"
            ),
        }
    }
}

impl std::error::Error for ParamError {}

/// An ordered collection of named parameter tensors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamSet {
    tensors: BTreeMap<String, ArrayD<f64>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: ArrayD<f64>) {
        self.tensors.insert(key.into(), tensor);
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f64>> {
        self.tensors.get(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterate tensors in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f64>)> {
        self.tensors.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    /// Total number of scalar parameters across all tensors.
    pub fn num_params(&self) -> usize {
        self.tensors.values().map(|t| t.len()).sum()
    }

    /// True when `other` has exactly the same keys with the same shapes.
    pub fn same_layout(&self, other: &ParamSet) -> bool {
        if self.tensors.len() != other.tensors.len() {
            return false;
        }
        self.tensors.iter().all(|(k, t)| {
            other
                .tensors
                .get(k)
                .map(|o| o.shape() == t.shape())
                .unwrap_or(false)
        })
    }

    /// Flatten every tensor into one vector, tensors in key order, elements
    /// in row-major order. Used for the cosine-divergence monitor.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.num_params());
        for tensor in self.tensors.values() {
            out.extend(tensor.iter().copied());
        }
        out
    }

    /// Lossless serializable form: shapes plus raw f64 bit patterns.
    /// Checkpoints go through this so a save/load cycle is bit-exact.
    pub fn to_snapshot(&self) -> ParamSnapshot {
        let tensors = self
            .tensors
            .iter()
            .map(|(k, t)| {
                (
                    k.clone(),
                    TensorSnapshot {
                        shape: t.shape().to_vec(),
                        bits: t.iter().map(|v| v.to_bits()).collect(),
                    },
                )
            })
            .collect();
        ParamSnapshot { tensors }
    }

    pub fn from_snapshot(snap: &ParamSnapshot) -> Result<ParamSet, ParamError> {
        let mut out = ParamSet::new();
        for (key, tensor) in &snap.tensors {
            let values: Vec<f64> = tensor.bits.iter().map(|b| f64::from_bits(*b)).collect();
            let arr = ArrayD::from_shape_vec(tensor.shape.clone(), values).map_err(|_| {
                ParamError::ShapeMismatch {
                    key: key.clone(),
                    expected: tensor.shape.clone(),
                    got: vec![tensor.bits.len()],
                }
            })?;
            out.insert(key.clone(), arr);
        }
        Ok(out)
    }
}

/// Bit-exact serialized form of one tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorSnapshot {
    pub shape: Vec<usize>,
    pub bits: Vec<u64>,
}

/// Bit-exact serialized form of a whole `ParamSet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSnapshot {
    pub tensors: BTreeMap<String, TensorSnapshot>,
}
