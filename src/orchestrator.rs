// src/orchestrator.rs
//
// The federated round loop: select participants, run local episodes
// against per-client twins, log telemetry, measure divergence, average
// the surviving actors back into the global model.
//
// Episodes are pure functions of (config, dataset, twin, global snapshot,
// seed), so the worker count never changes results. Seeds are drawn from
// the orchestrator RNG before any worker starts, in participant order.

use std::fmt;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::agent::ContinuousControlAgent;
use crate::aggregate::{self, AggregateError};
use crate::config::Config;
use crate::dataset::{ClientDataset, MIN_USABLE_ROWS};
use crate::metrics::OnlineStats;
use crate::migration::{should_migrate, MigrationThresholds};
use crate::params::{ParamError, ParamSet};
use crate::replay::{BufferError, ExperienceBuffer, Transition};
use crate::selection::{select_participants, SelectionError, SelectionStrategy};
use crate::semantic;
use crate::telemetry::{DivergenceRecord, LossRecord, RunTelemetry, SemanticRecord, StepRecord};
use crate::twin::{DigitalTwinSurrogate, TwinError};

/// Object class assumed for the synthetic perception probe.
const PROBE_OBJECT_TYPE: &str = "person";

/// Seed domain separator so twin bootstraps never reuse fleet seeds.
const TWIN_SEED_OFFSET: u64 = 0x1000;

pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Where the orchestrator currently is inside a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    SelectingParticipants,
    LocalTraining,
    Synchronizing,
    ComputingDivergence,
    Aggregating,
}

#[derive(Debug)]
pub enum RunError {
    /// Every supplied dataset failed the usable-rows gate.
    NoUsableClients,
    Selection(SelectionError),
    Aggregation(AggregateError),
    Param(ParamError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::NoUsableClients => {
                write!(f, "no client dataset has {MIN_USABLE_ROWS}+ usable rows")
            }
            RunError::Selection(e) => write!(f, "participant selection failed: {e}"),
            RunError::Aggregation(e) => write!(f, "aggregation failed: {e}"),
            RunError::Param(e) => write!(f, "global model update failed: {e}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<SelectionError> for RunError {
    fn from(e: SelectionError) -> Self {
        RunError::Selection(e)
    }
}

impl From<AggregateError> for RunError {
    fn from(e: AggregateError) -> Self {
        RunError::Aggregation(e)
    }
}

impl From<ParamError> for RunError {
    fn from(e: ParamError) -> Self {
        RunError::Param(e)
    }
}

/// Failure local to one client episode. Logged and skipped; the round
/// continues with the remaining participants.
#[derive(Debug)]
pub enum EpisodeError {
    Twin(TwinError),
    Buffer(BufferError),
    Param(ParamError),
    EmptyDataset,
}

impl fmt::Display for EpisodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeError::Twin(e) => write!(f, "twin prediction failed: {e}"),
            EpisodeError::Buffer(e) => write!(f, "replay sampling failed: {e}"),
            EpisodeError::Param(e) => write!(f, "global weights rejected: {e}"),
            EpisodeError::EmptyDataset => write!(f, "dataset has no rows to sample"),
        }
    }
}

impl std::error::Error for EpisodeError {}

impl From<TwinError> for EpisodeError {
    fn from(e: TwinError) -> Self {
        EpisodeError::Twin(e)
    }
}

impl From<BufferError> for EpisodeError {
    fn from(e: BufferError) -> Self {
        EpisodeError::Buffer(e)
    }
}

impl From<ParamError> for EpisodeError {
    fn from(e: ParamError) -> Self {
        EpisodeError::Param(e)
    }
}

/// Everything one local episode hands back to the orchestrator.
struct EpisodeOutcome {
    client: usize,
    actor: ParamSet,
    steps: Vec<StepRecord>,
    semantic: Vec<SemanticRecord>,
    losses: Vec<LossRecord>,
}

/// The usable clients, each with a twin fitted once at startup.
///
/// Twins are trained regardless of the digital-twin ablation flag:
/// semantic selection scores clients through them even when episodes run
/// on raw rows.
#[derive(Debug)]
pub struct ClientPool {
    datasets: Vec<ClientDataset>,
    twins: Vec<DigitalTwinSurrogate>,
}

impl ClientPool {
    pub fn build(datasets: Vec<ClientDataset>, cfg: &Config) -> Result<ClientPool, RunError> {
        let mut kept = Vec::with_capacity(datasets.len());
        let mut twins = Vec::with_capacity(datasets.len());

        for dataset in datasets {
            let client = dataset.client_id();
            if !dataset.is_trainable() {
                eprintln!(
                    "[pool] WARN: skipping client {client}: fewer than {MIN_USABLE_ROWS} usable rows"
                );
                continue;
            }
            let mut rng = ChaCha8Rng::seed_from_u64(
                cfg.seed.wrapping_add(TWIN_SEED_OFFSET).wrapping_add(client as u64),
            );
            let mut twin = DigitalTwinSurrogate::new(cfg.twin.energy_ensemble);
            match twin.train(&dataset, &mut rng) {
                Ok(()) => {
                    kept.push(dataset);
                    twins.push(twin);
                }
                Err(e) => {
                    eprintln!("[pool] WARN: skipping client {client}: twin training failed: {e}");
                }
            }
        }

        if kept.is_empty() {
            return Err(RunError::NoUsableClients);
        }
        Ok(ClientPool {
            datasets: kept,
            twins,
        })
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn datasets(&self) -> &[ClientDataset] {
        &self.datasets
    }

    pub fn twins(&self) -> &[DigitalTwinSurrogate] {
        &self.twins
    }

    pub fn client_id(&self, idx: usize) -> usize {
        self.datasets[idx].client_id()
    }
}

/// Per-round rollup for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round: usize,
    pub participants: Vec<usize>,
    pub episodes_failed: usize,
    pub aggregated: bool,
    pub mean_reward: f64,
    pub mean_divergence: f64,
}

/// Whole-run rollup, serialized to `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub config_version: String,
    pub seed: u64,
    pub ablation_id: String,
    pub rounds_completed: usize,
    pub aggregations: usize,
    pub episodes_run: usize,
    pub episodes_failed: usize,
    pub steps_total: u64,
    pub migration_rate: f64,
    pub mean_reward: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    pub mean_critic_loss: f64,
    pub mean_divergence: f64,
    pub rounds: Vec<RoundSummary>,
}

#[derive(Default)]
struct RunTotals {
    reward: OnlineStats,
    critic_loss: OnlineStats,
    divergence: OnlineStats,
    steps: u64,
    migrations: u64,
    episodes_run: usize,
    episodes_failed: usize,
    aggregations: usize,
}

#[derive(Debug)]
pub struct RoundOrchestrator {
    cfg: Config,
    pool: ClientPool,
    global: ContinuousControlAgent,
    telemetry: RunTelemetry,
    rng: ChaCha8Rng,
    phase: RoundPhase,
}

impl RoundOrchestrator {
    /// Wire up the loop. Fails fast when the configured participant count
    /// can never be satisfied by the pool.
    pub fn new(
        cfg: Config,
        pool: ClientPool,
        telemetry: RunTelemetry,
    ) -> Result<RoundOrchestrator, RunError> {
        if cfg.rounds.max_participants > pool.len() {
            return Err(RunError::Selection(SelectionError::Infeasible {
                requested: cfg.rounds.max_participants,
                available: pool.len(),
            }));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let global = ContinuousControlAgent::new(&cfg.agent, &mut rng);
        Ok(RoundOrchestrator {
            cfg,
            pool,
            global,
            telemetry,
            rng,
            phase: RoundPhase::Idle,
        })
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn global_agent(&self) -> &ContinuousControlAgent {
        &self.global
    }

    /// Run every configured round and roll the results up.
    pub fn run(&mut self) -> Result<RunSummary, RunError> {
        let mut totals = RunTotals::default();
        let mut rounds = Vec::with_capacity(self.cfg.rounds.rounds);

        for round in 1..=self.cfg.rounds.rounds {
            let summary = self.run_round(round, &mut totals)?;
            rounds.push(summary);
        }

        self.phase = RoundPhase::Idle;
        self.telemetry.flush();

        Ok(RunSummary {
            schema_version: SUMMARY_SCHEMA_VERSION,
            config_version: self.cfg.version.to_string(),
            seed: self.cfg.seed,
            ablation_id: self.cfg.ablation.id(),
            rounds_completed: rounds.len(),
            aggregations: totals.aggregations,
            episodes_run: totals.episodes_run,
            episodes_failed: totals.episodes_failed,
            steps_total: totals.steps,
            migration_rate: if totals.steps == 0 {
                0.0
            } else {
                totals.migrations as f64 / totals.steps as f64
            },
            mean_reward: totals.reward.mean(),
            min_reward: totals.reward.min(),
            max_reward: totals.reward.max(),
            mean_critic_loss: totals.critic_loss.mean(),
            mean_divergence: totals.divergence.mean(),
            rounds,
        })
    }

    fn run_round(
        &mut self,
        round: usize,
        totals: &mut RunTotals,
    ) -> Result<RoundSummary, RunError> {
        self.phase = RoundPhase::SelectingParticipants;
        let strategy = if self.cfg.ablation.use_semantic_selection {
            SelectionStrategy::Semantic
        } else {
            SelectionStrategy::Random
        };
        let picked = select_participants(
            self.pool.datasets(),
            self.pool.twins(),
            strategy,
            self.cfg.rounds.max_participants,
            &mut self.rng,
        )?;
        let participants: Vec<usize> = picked.iter().map(|&i| self.pool.client_id(i)).collect();

        // Seeds come off the orchestrator RNG before any episode starts,
        // so results are identical for any worker count.
        self.phase = RoundPhase::LocalTraining;
        let jobs: Vec<(usize, u64)> = picked.iter().map(|&idx| (idx, self.rng.gen())).collect();
        let snapshot = self.global.actor_params();
        let slots = self.run_episodes(round, &jobs, &snapshot);

        self.phase = RoundPhase::Synchronizing;
        totals.episodes_run += jobs.len();
        let mut round_reward = OnlineStats::new();
        let mut round_divergence = OnlineStats::new();
        let mut locals: Vec<ParamSet> = Vec::with_capacity(jobs.len());
        let mut failed = 0usize;

        for ((idx, _), slot) in jobs.iter().zip(slots) {
            let client = self.pool.client_id(*idx);
            match slot {
                Some(Ok(outcome)) => {
                    for r in &outcome.steps {
                        self.telemetry.log_step(r);
                        round_reward.add(r.reward);
                        totals.reward.add(r.reward);
                        totals.steps += 1;
                        if r.migration {
                            totals.migrations += 1;
                        }
                    }
                    for r in &outcome.semantic {
                        self.telemetry.log_semantic(r);
                    }
                    for r in &outcome.losses {
                        self.telemetry.log_loss(r);
                        totals.critic_loss.add(r.loss);
                    }

                    self.phase = RoundPhase::ComputingDivergence;
                    let div = aggregate::divergence(&snapshot, &outcome.actor);
                    self.telemetry.log_divergence(&DivergenceRecord {
                        round,
                        client,
                        divergence: div,
                    });
                    round_divergence.add(div);
                    totals.divergence.add(div);

                    locals.push(outcome.actor);
                }
                Some(Err(e)) => {
                    eprintln!("[round {round}] WARN: episode for client {client} failed: {e}");
                    failed += 1;
                }
                // A missing slot means the worker never reported back.
                None => {
                    eprintln!("[round {round}] WARN: episode for client {client} was lost");
                    failed += 1;
                }
            }
        }
        totals.episodes_failed += failed;

        self.phase = RoundPhase::Aggregating;
        let mut aggregated = false;
        if locals.is_empty() {
            eprintln!("[round {round}] no client weights returned; skipping aggregation");
        } else {
            let merged = aggregate::fed_avg(&locals)?;
            self.global.load_actor_params(&merged)?;
            aggregated = true;
            totals.aggregations += 1;
        }

        Ok(RoundSummary {
            round,
            participants,
            episodes_failed: failed,
            aggregated,
            mean_reward: round_reward.mean(),
            mean_divergence: round_divergence.mean(),
        })
    }

    /// Run the round's episodes, at most `workers` at a time. Results land
    /// in one slot per job; scope exit is the synchronization barrier.
    fn run_episodes(
        &self,
        round: usize,
        jobs: &[(usize, u64)],
        snapshot: &ParamSet,
    ) -> Vec<Option<Result<EpisodeOutcome, EpisodeError>>> {
        let workers = self.cfg.rounds.workers.max(1);
        let mut slots: Vec<Option<Result<EpisodeOutcome, EpisodeError>>> =
            (0..jobs.len()).map(|_| None).collect();

        if workers == 1 {
            for ((idx, seed), slot) in jobs.iter().zip(slots.iter_mut()) {
                *slot = Some(run_episode(
                    &self.cfg,
                    round,
                    &self.pool.datasets()[*idx],
                    &self.pool.twins()[*idx],
                    snapshot,
                    *seed,
                ));
            }
            return slots;
        }

        for (job_chunk, slot_chunk) in jobs.chunks(workers).zip(slots.chunks_mut(workers)) {
            thread::scope(|scope| {
                for ((idx, seed), slot) in job_chunk.iter().zip(slot_chunk.iter_mut()) {
                    let cfg = &self.cfg;
                    let dataset = &self.pool.datasets()[*idx];
                    let twin = &self.pool.twins()[*idx];
                    scope.spawn(move || {
                        *slot = Some(run_episode(cfg, round, dataset, twin, snapshot, *seed));
                    });
                }
            });
        }
        slots
    }
}

/// One client's local training episode.
///
/// Builds the 5-dim state per step (predicted delay, energy, queue,
/// semantic score, urgency), queries the deterministic policy, stores the
/// transition and trains once the buffer clears the batch size. Returns
/// the trained actor plus every record the orchestrator should log.
fn run_episode(
    cfg: &Config,
    round: usize,
    dataset: &ClientDataset,
    twin: &DigitalTwinSurrogate,
    snapshot: &ParamSet,
    seed: u64,
) -> Result<EpisodeOutcome, EpisodeError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut agent = ContinuousControlAgent::new(&cfg.agent, &mut rng);
    agent.load_actor_params(snapshot)?;

    let client = dataset.client_id();
    let thresholds = MigrationThresholds {
        queue: cfg.migration.queue_threshold,
        energy: cfg.migration.energy_threshold,
    };
    let mut buffer = ExperienceBuffer::new(
        cfg.buffer.capacity,
        cfg.agent.state_dim,
        cfg.agent.action_dim,
    );

    let mut steps = Vec::with_capacity(cfg.rounds.local_steps);
    let mut semantic_rows = Vec::with_capacity(cfg.rounds.local_steps);
    let mut losses = Vec::new();

    for step in 0..cfg.rounds.local_steps {
        let row = dataset
            .sample_row(&mut rng)
            .copied()
            .ok_or(EpisodeError::EmptyDataset)?;

        let (delay, energy, queue) = if cfg.ablation.use_digital_twin {
            let pred = twin.predict(row.rssi, row.cpu_load, row.task_size, row.queue_length)?;
            (pred.delay, pred.energy, pred.queue)
        } else {
            (row.delay, row.energy, row.queue_length)
        };

        let features = semantic::feature_probe(&mut rng);
        let score =
            semantic::compute_semantic_fidelity(&features, delay, energy, PROBE_OBJECT_TYPE);
        let urgency = rng.gen_range(0.2..1.0);

        let state = vec![delay, energy, queue, score, urgency];
        let action = agent.select_action(&state);
        // Offloading is costly in proportion to predicted delay and energy.
        let reward = -(delay * 2.0 + energy) * action[0];
        let done = should_migrate(queue, energy, &thresholds);

        buffer.add(Transition {
            state: state.clone(),
            action: action.clone(),
            next_state: state,
            reward,
            done,
        });

        if buffer.len() > cfg.rounds.batch_size {
            let report = agent.train(&buffer, cfg.rounds.batch_size, &mut rng)?;
            losses.push(LossRecord {
                round,
                client,
                step,
                loss: report.critic_loss,
            });
        }

        steps.push(StepRecord {
            round,
            client,
            step,
            reward,
            delay,
            energy,
            migration: done,
        });
        semantic_rows.push(SemanticRecord {
            round,
            client,
            step,
            semantic_score: score,
            energy,
        });
    }

    Ok(EpisodeOutcome {
        client,
        actor: agent.actor_params(),
        steps,
        semantic: semantic_rows,
        losses,
    })
}
