// src/replay.rs
//
// Fixed-capacity experience buffer with ring semantics.
//
// Each local training episode owns exactly one buffer; it is never shared
// across clients or rounds. `add` is O(1) and overwrites the oldest slot
// once the buffer is full. `sample` draws uniformly with replacement from
// the occupied slots and returns the batch grouped by field.

use ndarray::{Array1, Array2};
use rand::Rng;

/// Errors from buffer sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// `sample` was called while no slot is occupied.
    InsufficientData,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::InsufficientData => write!(f, "experience buffer is empty"),
        }
    }
}

impl std::error::Error for BufferError {}

/// One stored transition. Immutable once created; owned by its slot until
/// overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: Vec<f64>,
    pub next_state: Vec<f64>,
    pub reward: f64,
    pub done: bool,
}

/// A sampled minibatch, grouped by field. Rows align across arrays.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub states: Array2<f64>,
    pub actions: Array2<f64>,
    pub next_states: Array2<f64>,
    pub rewards: Array1<f64>,
    pub dones: Array1<f64>,
}

/// Fixed-capacity circular transition store.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    capacity: usize,
    state_dim: usize,
    action_dim: usize,
    slots: Vec<Transition>,
    // Oldest slot once the buffer is full; next overwrite target.
    head: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize, state_dim: usize, action_dim: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state_dim,
            action_dim,
            slots: Vec::new(),
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert a transition, overwriting the oldest slot when full.
    pub fn add(&mut self, transition: Transition) {
        debug_assert_eq!(transition.state.len(), self.state_dim);
        debug_assert_eq!(transition.next_state.len(), self.state_dim);
        debug_assert_eq!(transition.action.len(), self.action_dim);

        if self.slots.len() < self.capacity {
            self.slots.push(transition);
        } else {
            self.slots[self.head] = transition;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Iterate currently stored transitions (order is not insertion order
    /// once the ring has wrapped).
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.slots.iter()
    }

    /// Draw `k` transitions uniformly with replacement.
    pub fn sample(&self, k: usize, rng: &mut impl Rng) -> Result<TransitionBatch, BufferError> {
        if self.slots.is_empty() {
            return Err(BufferError::InsufficientData);
        }

        let mut states = Array2::zeros((k, self.state_dim));
        let mut actions = Array2::zeros((k, self.action_dim));
        let mut next_states = Array2::zeros((k, self.state_dim));
        let mut rewards = Array1::zeros(k);
        let mut dones = Array1::zeros(k);

        for row in 0..k {
            let idx = rng.gen_range(0..self.slots.len());
            let t = &self.slots[idx];
            for (j, v) in t.state.iter().enumerate() {
                states[[row, j]] = *v;
            }
            for (j, v) in t.action.iter().enumerate() {
                actions[[row, j]] = *v;
            }
            for (j, v) in t.next_state.iter().enumerate() {
                next_states[[row, j]] = *v;
            }
            rewards[row] = t.reward;
            dones[row] = if t.done { 1.0 } else { 0.0 };
        }

        Ok(TransitionBatch {
            states,
            actions,
            next_states,
            rewards,
            dones,
        })
    }
}
