// src/config.rs
//
// Central configuration for the fedtwin training engine.
//
// This is the single source of truth for the round loop (rounds, local
// steps, batch size, participant cap), the agent hyperparameters, the
// replay buffer, the digital-twin ensemble, migration thresholds and the
// synthetic fleet used by the research harness.
//
// Ablation presets mirror the reference benchmark configs: `default`,
// `baseline`, `no_dt`, `no_semcom`.

use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable config / release version.
    pub version: &'static str,
    /// Base seed for every stochastic component (fleet generation, twin
    /// ensembles, selection, episode draws). Derived per-component seeds
    /// are offsets of this value.
    pub seed: u64,
    /// Feature flags controlling the ablation under study.
    pub ablation: AblationFlags,
    /// Round loop config (rounds, local steps, batch size, participants).
    pub rounds: RoundConfig,
    /// Actor-critic hyperparameters.
    pub agent: AgentConfig,
    /// Experience buffer config.
    pub buffer: BufferConfig,
    /// Digital-twin surrogate config.
    pub twin: TwinConfig,
    /// Migration-trigger thresholds.
    pub migration: MigrationConfig,
    /// Synthetic fleet config for the research harness.
    pub fleet: FleetConfig,
}

/// Boolean feature flags for the two ablation axes.
///
/// Passed into the orchestrator at construction; never consulted through
/// globals or dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AblationFlags {
    /// Query the per-client digital twin for step predictions. When false,
    /// episodes fall back to the raw dataset row's delay/energy/queue.
    pub use_digital_twin: bool,
    /// Select round participants by predicted semantic score. When false,
    /// participants are drawn uniformly at random.
    pub use_semantic_selection: bool,
}

impl AblationFlags {
    pub fn for_preset(preset: AblationPreset) -> Self {
        match preset {
            AblationPreset::Default => Self {
                use_digital_twin: true,
                use_semantic_selection: true,
            },
            AblationPreset::Baseline => Self {
                use_digital_twin: false,
                use_semantic_selection: false,
            },
            AblationPreset::NoDt => Self {
                use_digital_twin: false,
                use_semantic_selection: true,
            },
            AblationPreset::NoSemcom => Self {
                use_digital_twin: true,
                use_semantic_selection: false,
            },
        }
    }

    /// Stable id string for logs and output-directory naming.
    pub fn id(&self) -> String {
        format!(
            "dt={}|semcom={}",
            self.use_digital_twin as u8, self.use_semantic_selection as u8
        )
    }

    /// Short hex hash of the flag combination for directory suffixes.
    pub fn short_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id().as_bytes());
        let hash = hasher.finalize();
        format!("{:02x}{:02x}{:02x}", hash[0], hash[1], hash[2])
    }
}

/// Named ablation preset used by the CLI / research harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AblationPreset {
    /// Twin and semantic selection both enabled.
    Default,
    /// Both disabled.
    Baseline,
    /// Twin disabled, semantic selection kept.
    NoDt,
    /// Semantic selection disabled, twin kept.
    NoSemcom,
}

impl AblationPreset {
    /// Stable lowercase name for the preset (used in logs/telemetry).
    pub fn as_str(&self) -> &'static str {
        match self {
            AblationPreset::Default => "default",
            AblationPreset::Baseline => "baseline",
            AblationPreset::NoDt => "no_dt",
            AblationPreset::NoSemcom => "no_semcom",
        }
    }

    /// Parse a preset name (case-insensitive). Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<AblationPreset> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "d" | "" => Some(AblationPreset::Default),
            "baseline" | "base" | "b" => Some(AblationPreset::Baseline),
            "no_dt" | "no-dt" | "nodt" => Some(AblationPreset::NoDt),
            "no_semcom" | "no-semcom" | "nosemcom" => Some(AblationPreset::NoSemcom),
            _ => None,
        }
    }
}

/// Source of the effective ablation preset (for logging precedence).
///
/// Precedence order (highest to lowest):
/// 1. CLI argument (--preset)
/// 2. Environment variable (FEDTWIN_ABLATION)
/// 3. Default (`default`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetSource {
    Cli,
    Env,
    Default,
}

impl PresetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetSource::Cli => "cli",
            PresetSource::Env => "env",
            PresetSource::Default => "default",
        }
    }
}

/// Resolved preset with its source for logging.
#[derive(Debug, Clone, Copy)]
pub struct EffectivePreset {
    pub preset: AblationPreset,
    pub source: PresetSource,
}

impl EffectivePreset {
    /// Log the effective preset at startup.
    ///
    /// Format: `effective_ablation=<preset> source=<source>`
    pub fn log_startup(&self) {
        eprintln!(
            "effective_ablation={} source={}",
            self.preset.as_str(),
            self.source.as_str()
        );
    }
}

/// Resolve the effective ablation preset: CLI > FEDTWIN_ABLATION > default.
pub fn resolve_effective_preset(cli_preset: Option<AblationPreset>) -> EffectivePreset {
    if let Some(p) = cli_preset {
        return EffectivePreset {
            preset: p,
            source: PresetSource::Cli,
        };
    }

    if let Ok(env_val) = std::env::var("FEDTWIN_ABLATION") {
        if !env_val.is_empty() {
            if let Some(p) = AblationPreset::parse(&env_val) {
                return EffectivePreset {
                    preset: p,
                    source: PresetSource::Env,
                };
            }
            eprintln!(
                "[config] WARN: invalid FEDTWIN_ABLATION={:?}; ignoring",
                env_val
            );
        }
    }

    EffectivePreset {
        preset: AblationPreset::Default,
        source: PresetSource::Default,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundConfig {
    /// Number of federated rounds to run.
    pub rounds: usize,
    /// Local training steps each participant runs per round.
    pub local_steps: usize,
    /// Minibatch size for agent training. Training only fires once buffer
    /// occupancy exceeds this.
    pub batch_size: usize,
    /// Participants selected per round. Must not exceed the client count;
    /// checked before the first round starts.
    pub max_participants: usize,
    /// Worker threads for local episodes. 1 = serial. Episodes are
    /// independent, so thread count never changes results.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    /// State vector width (predicted delay, predicted energy, predicted
    /// queue, semantic score, urgency).
    pub state_dim: usize,
    /// Action vector width (offload fraction).
    pub action_dim: usize,
    /// Hidden layer width for both actor and critic.
    pub hidden_dim: usize,
    /// Discount factor γ for the bootstrapped critic target.
    pub gamma: f64,
    /// Polyak mixing rate τ for target-network soft updates.
    pub tau: f64,
    /// Adam learning rate for the actor.
    pub actor_lr: f64,
    /// Adam learning rate for the critic.
    pub critic_lr: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferConfig {
    /// Fixed slot count. Insertion overwrites the oldest slot once full.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwinConfig {
    /// Bagged ensemble members for the energy regressor.
    pub energy_ensemble: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationConfig {
    /// Predicted-queue level at or above which migration triggers.
    pub queue_threshold: f64,
    /// Predicted-energy level at or above which migration triggers.
    pub energy_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetConfig {
    /// Synthetic clients to generate.
    pub clients: usize,
    /// Rows in each synthetic client dataset.
    pub rows_per_client: usize,
}

impl Default for Config {
    fn default() -> Self {
        // Reference benchmark deployment constants.
        let rounds = RoundConfig {
            rounds: 5,
            local_steps: 50,
            batch_size: 64,
            max_participants: 3,
            workers: 1,
        };

        let agent = AgentConfig {
            state_dim: 5,
            action_dim: 1,
            hidden_dim: 128,
            gamma: 0.99,
            tau: 0.005,
            actor_lr: 1e-4,
            critic_lr: 1e-3,
        };

        let buffer = BufferConfig { capacity: 10_000 };

        let twin = TwinConfig {
            energy_ensemble: 50,
        };

        let migration = MigrationConfig {
            queue_threshold: 0.25,
            energy_threshold: 0.20,
        };

        let fleet = FleetConfig {
            clients: 5,
            rows_per_client: 200,
        };

        Config {
            version: "v0.1.0-twinbench",
            seed: 1,
            ablation: AblationFlags::for_preset(AblationPreset::Default),
            rounds,
            agent,
            buffer,
            twin,
            migration,
            fleet,
        }
    }
}

// --- Runtime config loader: presets + env overrides --------------------------

impl Config {
    /// Build a Config for a named ablation preset on top of the defaults.
    pub fn for_preset(preset: AblationPreset) -> Self {
        let mut cfg = Config::default();
        cfg.ablation = AblationFlags::for_preset(preset);
        cfg
    }

    /// Build a Config from a preset, then apply environment overrides.
    ///
    /// Supported variables:
    ///
    ///   - FEDTWIN_SEED               (u64)
    ///   - FEDTWIN_ROUNDS             (usize, >= 1)
    ///   - FEDTWIN_LOCAL_STEPS        (usize, >= 1)
    ///   - FEDTWIN_BATCH_SIZE         (usize, >= 1)
    ///   - FEDTWIN_MAX_PARTICIPANTS   (usize, >= 1)
    ///   - FEDTWIN_WORKERS            (usize, >= 1)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn from_env_or_preset(preset: AblationPreset) -> Self {
        use std::env;

        let mut cfg = Config::for_preset(preset);

        if let Ok(raw) = env::var("FEDTWIN_SEED") {
            match raw.parse::<u64>() {
                Ok(v) => {
                    cfg.seed = v;
                    eprintln!("[config] FEDTWIN_SEED = {v} (overrode default)");
                }
                Err(_) => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_SEED = {:?} as u64; using default {}",
                        raw, cfg.seed
                    );
                }
            }
        }

        if let Ok(raw) = env::var("FEDTWIN_ROUNDS") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 1 => {
                    cfg.rounds.rounds = v;
                    eprintln!("[config] FEDTWIN_ROUNDS = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_ROUNDS = {:?} as usize >= 1; using default {}",
                        raw, cfg.rounds.rounds
                    );
                }
            }
        }

        if let Ok(raw) = env::var("FEDTWIN_LOCAL_STEPS") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 1 => {
                    cfg.rounds.local_steps = v;
                    eprintln!("[config] FEDTWIN_LOCAL_STEPS = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_LOCAL_STEPS = {:?} as usize >= 1; using default {}",
                        raw, cfg.rounds.local_steps
                    );
                }
            }
        }

        if let Ok(raw) = env::var("FEDTWIN_BATCH_SIZE") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 1 => {
                    cfg.rounds.batch_size = v;
                    eprintln!("[config] FEDTWIN_BATCH_SIZE = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_BATCH_SIZE = {:?} as usize >= 1; using default {}",
                        raw, cfg.rounds.batch_size
                    );
                }
            }
        }

        if let Ok(raw) = env::var("FEDTWIN_MAX_PARTICIPANTS") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 1 => {
                    cfg.rounds.max_participants = v;
                    eprintln!("[config] FEDTWIN_MAX_PARTICIPANTS = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_MAX_PARTICIPANTS = {:?} as usize >= 1; using default {}",
                        raw, cfg.rounds.max_participants
                    );
                }
            }
        }

        if let Ok(raw) = env::var("FEDTWIN_WORKERS") {
            match raw.parse::<usize>() {
                Ok(v) if v >= 1 => {
                    cfg.rounds.workers = v;
                    eprintln!("[config] FEDTWIN_WORKERS = {v} (overrode default)");
                }
                _ => {
                    eprintln!(
                        "[config] WARN: could not parse FEDTWIN_WORKERS = {:?} as usize >= 1; using default {}",
                        raw, cfg.rounds.workers
                    );
                }
            }
        }

        cfg
    }

    /// Pick the preset from FEDTWIN_ABLATION (default `default`), then
    /// apply all other env overrides.
    pub fn from_env_or_default() -> Self {
        let effective = resolve_effective_preset(None);
        Self::from_env_or_preset(effective.preset)
    }

    // ----- Builder-style helpers for tests and harnesses -----

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds.rounds = rounds;
        self
    }

    pub fn with_local_steps(mut self, steps: usize) -> Self {
        self.rounds.local_steps = steps;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.rounds.batch_size = batch_size;
        self
    }

    pub fn with_max_participants(mut self, max_participants: usize) -> Self {
        self.rounds.max_participants = max_participants;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.rounds.workers = workers;
        self
    }

    pub fn with_fleet(mut self, clients: usize, rows_per_client: usize) -> Self {
        self.fleet.clients = clients;
        self.fleet.rows_per_client = rows_per_client;
        self
    }

    pub fn with_ablation(mut self, ablation: AblationFlags) -> Self {
        self.ablation = ablation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_parse_round_trips() {
        for preset in [
            AblationPreset::Default,
            AblationPreset::Baseline,
            AblationPreset::NoDt,
            AblationPreset::NoSemcom,
        ] {
            assert_eq!(AblationPreset::parse(preset.as_str()), Some(preset));
        }
        assert_eq!(AblationPreset::parse("NO_DT"), Some(AblationPreset::NoDt));
        assert_eq!(AblationPreset::parse("bogus"), None);
    }

    #[test]
    fn preset_flags_match_reference_configs() {
        let baseline = AblationFlags::for_preset(AblationPreset::Baseline);
        assert!(!baseline.use_digital_twin);
        assert!(!baseline.use_semantic_selection);

        let no_dt = AblationFlags::for_preset(AblationPreset::NoDt);
        assert!(!no_dt.use_digital_twin);
        assert!(no_dt.use_semantic_selection);

        let no_semcom = AblationFlags::for_preset(AblationPreset::NoSemcom);
        assert!(no_semcom.use_digital_twin);
        assert!(!no_semcom.use_semantic_selection);
    }

    #[test]
    fn flag_hash_is_stable_per_combination() {
        let a = AblationFlags::for_preset(AblationPreset::Default).short_hash();
        let b = AblationFlags::for_preset(AblationPreset::Default).short_hash();
        let c = AblationFlags::for_preset(AblationPreset::Baseline).short_hash();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn default_config_matches_deployment_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.state_dim, 5);
        assert_eq!(cfg.agent.action_dim, 1);
        assert_eq!(cfg.rounds.rounds, 5);
        assert_eq!(cfg.rounds.local_steps, 50);
        assert_eq!(cfg.rounds.batch_size, 64);
        assert_eq!(cfg.rounds.max_participants, 3);
        assert_eq!(cfg.buffer.capacity, 10_000);
        assert!((cfg.agent.gamma - 0.99).abs() < 1e-12);
        assert!((cfg.agent.tau - 0.005).abs() < 1e-12);
    }

    #[test]
    fn builders_compose() {
        let cfg = Config::default()
            .with_seed(7)
            .with_rounds(2)
            .with_local_steps(10)
            .with_max_participants(2)
            .with_workers(4);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.rounds.rounds, 2);
        assert_eq!(cfg.rounds.local_steps, 10);
        assert_eq!(cfg.rounds.max_participants, 2);
        assert_eq!(cfg.rounds.workers, 4);
    }
}
