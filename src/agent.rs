// src/agent.rs
//
// Deterministic actor-critic agent for the offload-fraction policy.
//
// The actor maps a 5-dim state to an offload fraction in [0, 1] (sigmoid
// head); the critic scores (state, action) pairs. Training follows the
// usual pattern: critic regression against a Bellman target computed from
// the target networks, then an actor update through the frozen critic,
// then Polyak averaging of both targets.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2};
use rand::Rng;

use crate::config::AgentConfig;
use crate::nn::{Activation, Adam, Mlp};
use crate::params::{ParamError, ParamSet, ParamSnapshot};
use crate::replay::{BufferError, ExperienceBuffer};
use crate::telemetry::atomic_write;

/// Outcome of one training step, surfaced for loss logging.
#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    pub critic_loss: f64,
}

/// Errors from checkpoint save/load.
#[derive(Debug)]
pub enum CheckpointError {
    Io(io::Error),
    Json(serde_json::Error),
    Param(ParamError),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "checkpoint io error: {e}"),
            CheckpointError::Json(e) => write!(f, "checkpoint encode/decode error: {e}"),
            CheckpointError::Param(e) => write!(f, "checkpoint parameter error: {e}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Json(e)
    }
}

impl From<ParamError> for CheckpointError {
    fn from(e: ParamError) -> Self {
        CheckpointError::Param(e)
    }
}

#[derive(Debug)]
pub struct ContinuousControlAgent {
    actor: Mlp,
    critic: Mlp,
    target_actor: Mlp,
    target_critic: Mlp,
    actor_opt: Adam,
    critic_opt: Adam,
    gamma: f64,
    tau: f64,
    state_dim: usize,
    action_dim: usize,
}

impl ContinuousControlAgent {
    /// Fresh agent with randomly initialized networks. Targets start as
    /// exact copies of the online networks.
    pub fn new(cfg: &AgentConfig, rng: &mut impl Rng) -> Self {
        let actor = Mlp::new(
            &[cfg.state_dim, cfg.hidden_dim, cfg.hidden_dim, cfg.action_dim],
            &[Activation::Relu, Activation::Relu, Activation::Sigmoid],
            rng,
        );
        let critic = Mlp::new(
            &[
                cfg.state_dim + cfg.action_dim,
                cfg.hidden_dim,
                cfg.hidden_dim,
                1,
            ],
            &[Activation::Relu, Activation::Relu, Activation::Identity],
            rng,
        );
        let target_actor = actor.clone();
        let target_critic = critic.clone();
        let actor_opt = Adam::new(cfg.actor_lr, &actor);
        let critic_opt = Adam::new(cfg.critic_lr, &critic);
        Self {
            actor,
            critic,
            target_actor,
            target_critic,
            actor_opt,
            critic_opt,
            gamma: cfg.gamma,
            tau: cfg.tau,
            state_dim: cfg.state_dim,
            action_dim: cfg.action_dim,
        }
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Deterministic policy output for one state. No exploration noise is
    /// added; stochasticity comes from the environment rollout itself.
    pub fn select_action(&self, state: &[f64]) -> Vec<f64> {
        debug_assert_eq!(state.len(), self.state_dim);
        let x = Array2::from_shape_fn((1, self.state_dim), |(_, j)| state[j]);
        self.actor.forward(&x).row(0).to_vec()
    }

    /// One gradient step on a sampled minibatch: critic first, then actor
    /// through the updated critic, then Polyak targets.
    pub fn train(
        &mut self,
        buffer: &ExperienceBuffer,
        batch_size: usize,
        rng: &mut impl Rng,
    ) -> Result<TrainReport, BufferError> {
        let batch = buffer.sample(batch_size, rng)?;
        let b = batch.states.nrows() as f64;

        // Bellman target y = r + (1 - done) * gamma * Q'(s', pi'(s')),
        // computed entirely from the target networks (no gradient).
        let next_actions = self.target_actor.forward(&batch.next_states);
        let next_q = self
            .target_critic
            .forward(&concat_columns(&batch.next_states, &next_actions));
        let target = Array2::from_shape_fn(next_q.raw_dim(), |(i, _)| {
            batch.rewards[i] + (1.0 - batch.dones[i]) * self.gamma * next_q[[i, 0]]
        });

        // Critic regression on the stored actions.
        let sa = concat_columns(&batch.states, &batch.actions);
        let (q, critic_caches) = self.critic.forward_cached(&sa);
        let residual = &q - &target;
        let critic_loss = residual.mapv(|d| d * d).sum() / b;
        let grad_q = residual.mapv(|d| 2.0 * d / b);
        let (critic_grads, _) = self.critic.backward(&critic_caches, &grad_q);
        self.critic_opt.step(&mut self.critic, &critic_grads);

        // Actor ascent on Q(s, pi(s)). The critic supplies dQ/da but its
        // own parameters are not stepped here.
        let (pred_actions, actor_caches) = self.actor.forward_cached(&batch.states);
        let sa_pred = concat_columns(&batch.states, &pred_actions);
        let (q_pred, critic_caches) = self.critic.forward_cached(&sa_pred);
        let grad_q_pred = Array2::from_elem(q_pred.raw_dim(), -1.0 / b);
        let (_, grad_sa) = self.critic.backward(&critic_caches, &grad_q_pred);
        let grad_actions = grad_sa.slice(s![.., self.state_dim..]).to_owned();
        let (actor_grads, _) = self.actor.backward(&actor_caches, &grad_actions);
        self.actor_opt.step(&mut self.actor, &actor_grads);

        self.target_critic.soft_update_from(&self.critic, self.tau);
        self.target_actor.soft_update_from(&self.actor, self.tau);

        Ok(TrainReport { critic_loss })
    }

    /// Current actor parameters (the unit shared with the aggregator).
    pub fn actor_params(&self) -> ParamSet {
        self.actor.param_set()
    }

    /// Install actor parameters, e.g. the latest global model. The target
    /// actor is deliberately left alone.
    pub fn load_actor_params(&mut self, params: &ParamSet) -> Result<(), ParamError> {
        self.actor.load_param_set(params)
    }

    pub fn critic_params(&self) -> ParamSet {
        self.critic.param_set()
    }

    /// Write actor and critic parameters to `<prefix>_actor.json` and
    /// `<prefix>_critic.json`, bit-exact.
    pub fn save(&self, prefix: &Path) -> Result<(), CheckpointError> {
        write_params(&checkpoint_path(prefix, "actor"), &self.actor.param_set())?;
        write_params(&checkpoint_path(prefix, "critic"), &self.critic.param_set())?;
        Ok(())
    }

    /// Restore actor and critic from a checkpoint pair. Target networks
    /// are not restored; they keep whatever they held before the load.
    pub fn load(&mut self, prefix: &Path) -> Result<(), CheckpointError> {
        let actor = read_params(&checkpoint_path(prefix, "actor"))?;
        let critic = read_params(&checkpoint_path(prefix, "critic"))?;
        self.actor.load_param_set(&actor)?;
        self.critic.load_param_set(&critic)?;
        Ok(())
    }
}

fn checkpoint_path(prefix: &Path, part: &str) -> PathBuf {
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    prefix.with_file_name(format!("{name}_{part}.json"))
}

fn write_params(path: &Path, params: &ParamSet) -> Result<(), CheckpointError> {
    let json = serde_json::to_string(&params.to_snapshot())?;
    atomic_write(path, &json)?;
    Ok(())
}

fn read_params(path: &Path) -> Result<ParamSet, CheckpointError> {
    let json = fs::read_to_string(path)?;
    let snap: ParamSnapshot = serde_json::from_str(&json)?;
    Ok(ParamSet::from_snapshot(&snap)?)
}

/// Stack two row-aligned matrices side by side.
fn concat_columns(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    debug_assert_eq!(a.nrows(), b.nrows());
    let (n, ca) = a.dim();
    let cb = b.ncols();
    Array2::from_shape_fn((n, ca + cb), |(i, j)| {
        if j < ca {
            a[[i, j]]
        } else {
            b[[i, j - ca]]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::replay::Transition;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_agent_cfg() -> AgentConfig {
        AgentConfig {
            hidden_dim: 16,
            ..Config::default().agent
        }
    }

    fn terminal_transition(rng: &mut ChaCha8Rng, reward: f64) -> Transition {
        Transition {
            state: (0..5).map(|_| rng.gen_range(0.0..1.0)).collect(),
            action: vec![rng.gen_range(0.0..1.0)],
            next_state: (0..5).map(|_| rng.gen_range(0.0..1.0)).collect(),
            reward,
            done: true,
        }
    }

    #[test]
    fn action_is_within_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let agent = ContinuousControlAgent::new(&small_agent_cfg(), &mut rng);
        for _ in 0..20 {
            let state: Vec<f64> = (0..5).map(|_| rng.gen_range(-2.0..2.0)).collect();
            let action = agent.select_action(&state);
            assert_eq!(action.len(), 1);
            assert!(action[0] > 0.0 && action[0] < 1.0);
        }
    }

    #[test]
    fn select_action_is_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let agent = ContinuousControlAgent::new(&small_agent_cfg(), &mut rng);
        let state = [0.1, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(agent.select_action(&state), agent.select_action(&state));
    }

    #[test]
    fn critic_loss_falls_on_fixed_terminal_batch() {
        // All transitions terminal, so the Bellman target is just the
        // reward and the critic problem is plain supervised regression.
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let cfg = small_agent_cfg();
        let mut agent = ContinuousControlAgent::new(&cfg, &mut rng);

        let mut buffer = ExperienceBuffer::new(256, cfg.state_dim, cfg.action_dim);
        for _ in 0..64 {
            buffer.add(terminal_transition(&mut rng, -0.5));
        }

        let first = agent.train(&buffer, 32, &mut rng).unwrap().critic_loss;
        let mut last = first;
        for _ in 0..150 {
            last = agent.train(&buffer, 32, &mut rng).unwrap().critic_loss;
        }
        assert!(
            last < first * 0.5,
            "critic loss did not fall: {first} -> {last}"
        );
    }

    #[test]
    fn train_on_empty_buffer_is_an_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(14);
        let cfg = small_agent_cfg();
        let mut agent = ContinuousControlAgent::new(&cfg, &mut rng);
        let buffer = ExperienceBuffer::new(16, cfg.state_dim, cfg.action_dim);
        assert!(matches!(
            agent.train(&buffer, 8, &mut rng),
            Err(BufferError::InsufficientData)
        ));
    }

    #[test]
    fn polyak_moves_targets_toward_online() {
        let mut rng = ChaCha8Rng::seed_from_u64(15);
        let cfg = small_agent_cfg();
        let mut agent = ContinuousControlAgent::new(&cfg, &mut rng);

        let target_before = agent.target_actor.param_set().flatten();
        let mut buffer = ExperienceBuffer::new(64, cfg.state_dim, cfg.action_dim);
        for _ in 0..32 {
            buffer.add(terminal_transition(&mut rng, 1.0));
        }
        agent.train(&buffer, 16, &mut rng).unwrap();

        let online_after = agent.actor.param_set().flatten();
        let target_after = agent.target_actor.param_set().flatten();
        for ((t1, o), t0) in target_after
            .iter()
            .zip(online_after.iter())
            .zip(target_before.iter())
        {
            let expected = cfg.tau * o + (1.0 - cfg.tau) * t0;
            assert!((t1 - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn loading_actor_params_leaves_target_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(16);
        let cfg = small_agent_cfg();
        let mut agent = ContinuousControlAgent::new(&cfg, &mut rng);
        let donor = ContinuousControlAgent::new(&cfg, &mut rng);

        let target_before = agent.target_actor.param_set().flatten();
        agent.load_actor_params(&donor.actor_params()).unwrap();

        assert_eq!(
            agent.actor_params().flatten(),
            donor.actor_params().flatten()
        );
        assert_eq!(agent.target_actor.param_set().flatten(), target_before);
    }

    #[test]
    fn checkpoint_round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("ckpt");

        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let cfg = small_agent_cfg();
        let agent = ContinuousControlAgent::new(&cfg, &mut rng);
        agent.save(&prefix).unwrap();

        let mut restored = ContinuousControlAgent::new(&cfg, &mut rng);
        restored.load(&prefix).unwrap();

        let a = agent.actor_params().flatten();
        let b = restored.actor_params().flatten();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
        let c = agent.critic_params().flatten();
        let d = restored.critic_params().flatten();
        for (x, y) in c.iter().zip(d.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }
}
