//! Fedtwin core library.
//!
//! A federated training engine for edge offload policies. Each client owns
//! a digital-twin surrogate fitted on its environment log; local episodes
//! roll a deterministic actor-critic policy against twin predictions, and
//! a round orchestrator averages the surviving actors into a global model.
//!
//! The main pieces:
//!
//! - **Twin** (`twin`): per-client least-squares surrogate predicting
//!   delay, energy and next-step queue from raw link features.
//!
//! - **Agent** (`agent` / `nn`): sigmoid-head actor and Q critic with
//!   manual backprop, Adam and Polyak target updates.
//!
//! - **Rounds** (`orchestrator`, `selection`, `aggregate`): participant
//!   selection (random or semantic), parallel local episodes, cosine
//!   divergence monitoring and FedAvg aggregation.
//!
//! - **Fleet tooling** (`deployment`, `migration`): UAV relay placement,
//!   priority-greedy scheduling, migration triggers and mobility
//!   extrapolation.
//!
//! The binaries (`src/main.rs`, `src/bin/fed_sweep.rs`) are thin research
//! harnesses around these components.

pub mod aggregate;
pub mod agent;
pub mod config;
pub mod dataset;
pub mod deployment;
pub mod metrics;
pub mod migration;
pub mod nn;
pub mod orchestrator;
pub mod params;
pub mod replay;
pub mod selection;
pub mod semantic;
pub mod telemetry;
pub mod twin;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{AblationFlags, AblationPreset, Config, EffectivePreset, PresetSource};

// Round loop.
pub use orchestrator::{
    ClientPool, RoundOrchestrator, RoundPhase, RoundSummary, RunError, RunSummary,
};

// Models and data.
pub use agent::{CheckpointError, ContinuousControlAgent, TrainReport};
pub use dataset::{synthetic_fleet, ClientDataset, ClientRow};
pub use params::{ParamSet, ParamSnapshot};
pub use replay::{ExperienceBuffer, Transition};
pub use twin::{DigitalTwinSurrogate, TwinError, TwinPrediction};

// Policies and scoring.
pub use aggregate::{cosine_distance, divergence, fed_avg, weighted_fed_avg};
pub use migration::{predict_next_position, should_migrate, MigrationThresholds};
pub use selection::{select_participants, SelectionError, SelectionStrategy};
pub use semantic::{compute_semantic_fidelity, priority_weight};

// Fleet tooling.
pub use deployment::{optimize_positions, priority_greedy_assign, DevicePoint, UavSite};

// Telemetry and metrics.
pub use metrics::OnlineStats;
pub use telemetry::{atomic_write, RunTelemetry};

// --- Cross-module behavior tests --------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cfg(preset: AblationPreset) -> Config {
        let mut cfg = Config::default()
            .with_seed(9)
            .with_rounds(2)
            .with_local_steps(6)
            .with_batch_size(4)
            .with_max_participants(2)
            .with_fleet(4, 40)
            .with_ablation(AblationFlags::for_preset(preset));
        cfg.agent.hidden_dim = 16;
        cfg.twin.energy_ensemble = 4;
        cfg
    }

    fn run_summary(cfg: &Config) -> RunSummary {
        let fleet = synthetic_fleet(cfg.fleet.clients, cfg.fleet.rows_per_client, cfg.seed);
        let pool = ClientPool::build(fleet, cfg).unwrap();
        let mut orchestrator =
            RoundOrchestrator::new(cfg.clone(), pool, RunTelemetry::disabled()).unwrap();
        orchestrator.run().unwrap()
    }

    /// Turning the twin off must change what the episodes see: raw rows
    /// instead of surrogate predictions, hence different rewards.
    #[test]
    fn digital_twin_flag_changes_episode_inputs() {
        let with_twin = run_summary(&small_cfg(AblationPreset::Default));
        let without_twin = run_summary(&small_cfg(AblationPreset::NoDt));
        assert_ne!(
            with_twin.mean_reward.to_bits(),
            without_twin.mean_reward.to_bits()
        );
    }

    /// With the reference deployment constants, local episodes are shorter
    /// than the batch size, so no training step ever fires.
    #[test]
    fn short_episodes_never_reach_the_training_gate() {
        let mut cfg = small_cfg(AblationPreset::Default);
        cfg.rounds.local_steps = 5;
        cfg.rounds.batch_size = 64;

        let summary = run_summary(&cfg);
        assert_eq!(summary.mean_critic_loss, 0.0);
        assert_eq!(summary.steps_total, 2 * 2 * 5);
    }

    /// Aggregation feeds the averaged actor back into the next round's
    /// broadcast, so divergence is measured against a moving global model.
    #[test]
    fn every_round_aggregates_on_the_happy_path() {
        let summary = run_summary(&small_cfg(AblationPreset::Baseline));
        assert_eq!(summary.rounds_completed, 2);
        assert_eq!(summary.aggregations, 2);
        assert!(summary.rounds.iter().all(|r| r.aggregated));
        assert!(summary.mean_divergence >= 0.0);
    }
}
