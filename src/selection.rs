// src/selection.rs
//
// Per-round participant selection. Random selection draws k distinct
// clients uniformly; semantic selection scores each client by predicted
// link quality through its twin and keeps the top k. Both draw fresh
// randomness every round, so repeated rounds pick different cohorts.

use std::cmp::Ordering;
use std::fmt;

use rand::Rng;

use crate::dataset::ClientDataset;
use crate::twin::{DigitalTwinSurrogate, TwinError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Random,
    Semantic,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::Random => "random",
            SelectionStrategy::Semantic => "semantic",
        }
    }
}

#[derive(Debug)]
pub enum SelectionError {
    /// More participants requested than clients exist.
    Infeasible { requested: usize, available: usize },
    /// A twin could not score its client.
    Twin(TwinError),
    /// A client had no rows to draw a scoring sample from.
    EmptyDataset { client: usize },
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::Infeasible {
                requested,
                available,
            } => write!(
                f,
                "cannot select {requested} participants from {available} clients"
            ),
            SelectionError::Twin(e) => write!(f, "twin scoring failed: {e}"),
            SelectionError::EmptyDataset { client } => {
                write!(f, "client {client} has no rows to score")
            }
        }
    }
}

impl std::error::Error for SelectionError {}

impl From<TwinError> for SelectionError {
    fn from(e: TwinError) -> Self {
        SelectionError::Twin(e)
    }
}

/// Pick `k` participant indices out of the parallel `datasets`/`twins`
/// slices. Random order for the random strategy, descending score order
/// for the semantic one.
pub fn select_participants(
    datasets: &[ClientDataset],
    twins: &[DigitalTwinSurrogate],
    strategy: SelectionStrategy,
    k: usize,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, SelectionError> {
    debug_assert_eq!(datasets.len(), twins.len());
    if k > datasets.len() {
        return Err(SelectionError::Infeasible {
            requested: k,
            available: datasets.len(),
        });
    }

    match strategy {
        SelectionStrategy::Random => {
            Ok(rand::seq::index::sample(rng, datasets.len(), k).into_vec())
        }
        SelectionStrategy::Semantic => {
            let mut scored: Vec<(usize, f64)> = Vec::with_capacity(datasets.len());
            for (idx, (dataset, twin)) in datasets.iter().zip(twins.iter()).enumerate() {
                let row = dataset
                    .sample_row(rng)
                    .ok_or(SelectionError::EmptyDataset {
                        client: dataset.client_id(),
                    })?;
                let pred =
                    twin.predict(row.rssi, row.cpu_load, row.task_size, row.queue_length)?;
                // Cheap link -> high score.
                let score = 1.0 - (pred.delay + pred.energy) / 2.0;
                scored.push((idx, score));
            }
            // Stable sort keeps the lower index on ties.
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            scored.truncate(k);
            Ok(scored.into_iter().map(|(idx, _)| idx).collect())
        }
    }
}
