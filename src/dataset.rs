// src/dataset.rs
//
// Per-client tabular datasets.
//
// The ingestion/ETL pipelines live outside this crate; what arrives here is
// the contract they produce: rows of {rssi, cpu_load, task_size,
// queue_length, delay, energy}, all numeric. The synthetic fleet generator
// reproduces the benchmark's normalized sensor distribution for harness and
// test runs.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Clients with fewer usable rows than this are excluded before training.
pub const MIN_USABLE_ROWS: usize = 3;

/// One observation row from a client's environment log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientRow {
    pub rssi: f64,
    pub cpu_load: f64,
    pub task_size: f64,
    pub queue_length: f64,
    pub delay: f64,
    pub energy: f64,
}

impl ClientRow {
    /// A row is usable when every column is finite.
    pub fn is_usable(&self) -> bool {
        self.rssi.is_finite()
            && self.cpu_load.is_finite()
            && self.task_size.is_finite()
            && self.queue_length.is_finite()
            && self.delay.is_finite()
            && self.energy.is_finite()
    }
}

/// An immutable per-client dataset.
#[derive(Debug, Clone)]
pub struct ClientDataset {
    client_id: usize,
    rows: Vec<ClientRow>,
}

impl ClientDataset {
    pub fn new(client_id: usize, rows: Vec<ClientRow>) -> Self {
        Self { client_id, rows }
    }

    pub fn client_id(&self) -> usize {
        self.client_id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ClientRow] {
        &self.rows
    }

    /// Rows with no missing values, in original order.
    pub fn usable_rows(&self) -> Vec<ClientRow> {
        self.rows.iter().copied().filter(ClientRow::is_usable).collect()
    }

    /// True when the client clears the minimum-rows gate.
    pub fn is_trainable(&self) -> bool {
        self.rows.iter().filter(|r| r.is_usable()).count() >= MIN_USABLE_ROWS
    }

    /// Draw one row uniformly at random. None only for an empty dataset.
    pub fn sample_row(&self, rng: &mut impl Rng) -> Option<&ClientRow> {
        if self.rows.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.rows.len());
        Some(&self.rows[idx])
    }
}

/// Generate a synthetic fleet of client datasets.
///
/// Features are uniform in [0, 1] (the benchmark's normalized sensor range);
/// delay and energy follow its linear cost model:
///
///   delay  = 0.05 + rssi * 0.1 + cpu_load * 0.1
///   energy = 0.02 + task_size * 0.2 + queue_length * 0.1
pub fn synthetic_fleet(clients: usize, rows_per_client: usize, seed: u64) -> Vec<ClientDataset> {
    let mut out = Vec::with_capacity(clients);
    for client_id in 0..clients {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(client_id as u64));
        let rows = (0..rows_per_client)
            .map(|_| synthetic_row(&mut rng))
            .collect();
        out.push(ClientDataset::new(client_id, rows));
    }
    out
}

fn synthetic_row(rng: &mut impl Rng) -> ClientRow {
    let rssi = rng.gen_range(0.0..1.0);
    let cpu_load = rng.gen_range(0.0..1.0);
    let task_size = rng.gen_range(0.0..1.0);
    let queue_length = rng.gen_range(0.0..1.0);
    ClientRow {
        rssi,
        cpu_load,
        task_size,
        queue_length,
        delay: 0.05 + rssi * 0.1 + cpu_load * 0.1,
        energy: 0.02 + task_size * 0.2 + queue_length * 0.1,
    }
}
