// src/twin.rs
//
// Per-client digital-twin surrogate.
//
// Three regressors over the feature columns (rssi, cpu_load, task_size,
// queue_length): least-squares models for delay and next-queue, and a seeded
// bagged least-squares ensemble for energy. The next-queue target is the
// queue_length column shifted one row forward, with the last target
// forward-filled from the previous value.
//
// The surrogate is trained exactly once at client setup and is read-only
// afterwards.

use rand::Rng;

use crate::dataset::{ClientDataset, ClientRow, MIN_USABLE_ROWS};

const FEATURES: usize = 4;

/// Errors from the surrogate lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwinError {
    /// `predict` was called before `train`.
    NotTrained,
    /// Too few usable rows to fit the regressors.
    InsufficientData { rows: usize },
}

impl std::fmt::Display for TwinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TwinError::NotTrained => write!(f, "digital twin queried before training"),
            TwinError::InsufficientData { rows } => write!(
                f,
                "digital twin needs at least {MIN_USABLE_ROWS} usable rows, got {rows}"
            ),
        }
    }
}

impl std::error::Error for TwinError {}

/// One prediction triple, rounded to the fixed precisions the round loop
/// consumes (delay/energy to 4 decimals, queue to 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwinPrediction {
    pub delay: f64,
    pub energy: f64,
    pub queue: f64,
}

/// Least-squares linear model with intercept.
#[derive(Debug, Clone)]
struct LinearModel {
    // [w_rssi, w_cpu_load, w_task_size, w_queue_length, intercept]
    weights: [f64; FEATURES + 1],
}

impl LinearModel {
    fn predict(&self, x: &[f64; FEATURES]) -> f64 {
        let mut y = self.weights[FEATURES];
        for (w, v) in self.weights[..FEATURES].iter().zip(x.iter()) {
            y += w * v;
        }
        y
    }
}

#[derive(Debug, Clone)]
struct TwinModel {
    delay: LinearModel,
    queue: LinearModel,
    energy: Vec<LinearModel>,
}

/// Digital-twin surrogate for one client.
#[derive(Debug, Clone)]
pub struct DigitalTwinSurrogate {
    energy_ensemble: usize,
    model: Option<TwinModel>,
}

impl DigitalTwinSurrogate {
    pub fn new(energy_ensemble: usize) -> Self {
        Self {
            energy_ensemble: energy_ensemble.max(1),
            model: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Fit the three regressors from the client's environment log.
    ///
    /// Rows with missing values are dropped first. The energy ensemble is
    /// fitted on bootstrap resamples drawn from `rng`, so a fixed seed gives
    /// a fixed surrogate.
    pub fn train(&mut self, dataset: &ClientDataset, rng: &mut impl Rng) -> Result<(), TwinError> {
        let rows = dataset.usable_rows();
        if rows.len() < MIN_USABLE_ROWS {
            return Err(TwinError::InsufficientData { rows: rows.len() });
        }

        let n = rows.len();
        let xs: Vec<[f64; FEATURES]> = rows.iter().map(feature_vector).collect();
        let y_delay: Vec<f64> = rows.iter().map(|r| r.delay).collect();
        let y_energy: Vec<f64> = rows.iter().map(|r| r.energy).collect();

        // Next-queue target: queue_length shifted one row forward, last
        // entry forward-filled (equals the final row's own queue_length).
        let mut y_queue: Vec<f64> = (0..n - 1).map(|i| rows[i + 1].queue_length).collect();
        y_queue.push(rows[n - 1].queue_length);

        let delay = fit_least_squares(&xs, &y_delay);
        let queue = fit_least_squares(&xs, &y_queue);

        let mut energy = Vec::with_capacity(self.energy_ensemble);
        for _ in 0..self.energy_ensemble {
            let mut bx = Vec::with_capacity(n);
            let mut by = Vec::with_capacity(n);
            for _ in 0..n {
                let i = rng.gen_range(0..n);
                bx.push(xs[i]);
                by.push(y_energy[i]);
            }
            energy.push(fit_least_squares(&bx, &by));
        }

        self.model = Some(TwinModel {
            delay,
            queue,
            energy,
        });
        Ok(())
    }

    /// Predict delay, energy and next queue for one feature tuple.
    pub fn predict(
        &self,
        rssi: f64,
        cpu_load: f64,
        task_size: f64,
        queue_length: f64,
    ) -> Result<TwinPrediction, TwinError> {
        let model = self.model.as_ref().ok_or(TwinError::NotTrained)?;

        let x = [rssi, cpu_load, task_size, queue_length];
        let delay = model.delay.predict(&x);
        let queue = model.queue.predict(&x);
        let energy =
            model.energy.iter().map(|m| m.predict(&x)).sum::<f64>() / model.energy.len() as f64;

        Ok(TwinPrediction {
            delay: round_to(delay, 4),
            energy: round_to(energy, 4),
            queue: round_to(queue, 2),
        })
    }
}

fn feature_vector(row: &ClientRow) -> [f64; FEATURES] {
    [row.rssi, row.cpu_load, row.task_size, row.queue_length]
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Ordinary least squares via the normal equations.
/// A small ridge term keeps the normal matrix invertible on degenerate
/// resamples.
fn fit_least_squares(xs: &[[f64; FEATURES]], ys: &[f64]) -> LinearModel {
    const DIM: usize = FEATURES + 1;
    const RIDGE: f64 = 1e-9;

    let mut a = [[0.0f64; DIM]; DIM];
    let mut b = [0.0f64; DIM];

    for (x, &y) in xs.iter().zip(ys.iter()) {
        let mut row = [0.0f64; DIM];
        row[..FEATURES].copy_from_slice(x);
        row[FEATURES] = 1.0;

        for i in 0..DIM {
            for j in 0..DIM {
                a[i][j] += row[i] * row[j];
            }
            b[i] += row[i] * y;
        }
    }

    for (i, row) in a.iter_mut().enumerate() {
        row[i] += RIDGE;
    }

    LinearModel {
        weights: solve_linear(a, b),
    }
}

/// Gaussian elimination with partial pivoting on a small dense system.
fn solve_linear<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> [f64; N] {
    for col in 0..N {
        let mut pivot = col;
        for row in col + 1..N {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        if diag.abs() < f64::MIN_POSITIVE {
            continue;
        }

        for row in col + 1..N {
            let factor = a[row][col] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; N];
    for col in (0..N).rev() {
        let mut acc = b[col];
        for k in col + 1..N {
            acc -= a[col][k] * x[k];
        }
        let diag = a[col][col];
        x[col] = if diag.abs() < f64::MIN_POSITIVE {
            0.0
        } else {
            acc / diag
        };
    }
    x
}
