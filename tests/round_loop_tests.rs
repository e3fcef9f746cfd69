// tests/round_loop_tests.rs
//
// End-to-end tests for the federated round loop and its CSV telemetry.
//
// These tests verify that:
// 1. A full run writes the four telemetry logs with the expected headers
//    and row counts.
// 2. Two runs with the same seed produce byte-identical logs.
// 3. The worker thread count does not change any logged value.
// 4. The run summary serializes with its versioned schema.

use std::fs;
use std::path::Path;

use tempfile::tempdir;

use fedtwin::config::{AblationFlags, Config};
use fedtwin::dataset::synthetic_fleet;
use fedtwin::orchestrator::{ClientPool, RoundOrchestrator, RunSummary};
use fedtwin::telemetry::RunTelemetry;

/// Small fleet configuration that finishes quickly: raw-row features
/// (twin disabled), one round, episodes shorter than the batch size so
/// the training gate stays closed.
fn small_cfg(seed: u64) -> Config {
    let mut cfg = Config::default()
        .with_seed(seed)
        .with_rounds(1)
        .with_local_steps(3)
        .with_max_participants(3)
        .with_fleet(4, 40)
        .with_ablation(AblationFlags {
            use_digital_twin: false,
            use_semantic_selection: true,
        });
    cfg.agent.hidden_dim = 16;
    cfg.twin.energy_ensemble = 4;
    cfg
}

/// Twin-informed fleet with a batch size the episodes can reach, so the
/// training gate opens and loss rows are logged.
fn training_cfg(seed: u64) -> Config {
    let mut cfg = small_cfg(seed)
        .with_rounds(2)
        .with_local_steps(4)
        .with_ablation(AblationFlags {
            use_digital_twin: true,
            use_semantic_selection: true,
        });
    cfg.rounds.batch_size = 2;
    cfg
}

fn run_with_telemetry(cfg: &Config, dir: &Path) -> RunSummary {
    let fleet = synthetic_fleet(cfg.fleet.clients, cfg.fleet.rows_per_client, cfg.seed);
    let pool = ClientPool::build(fleet, cfg).expect("pool should build");
    let telemetry = RunTelemetry::to_dir(dir);
    let mut orchestrator =
        RoundOrchestrator::new(cfg.clone(), pool, telemetry).expect("orchestrator should build");
    orchestrator.run().expect("run should succeed")
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {:?}: {}", path, e))
        .lines()
        .map(|s| s.to_string())
        .collect()
}

fn read_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| panic!("failed to read {:?}: {}", path, e))
}

// =============================================================================
// Telemetry contract
// =============================================================================

#[test]
fn run_writes_telemetry_logs_with_expected_shape() {
    let dir = tempdir().expect("tempdir");
    let cfg = small_cfg(11);

    let summary = run_with_telemetry(&cfg, dir.path());

    // 1 round x 3 participants x 3 steps
    assert_eq!(summary.rounds_completed, 1);
    assert_eq!(summary.episodes_run, 3);
    assert_eq!(summary.steps_total, 9);
    assert_eq!(summary.aggregations, 1);

    let training = read_lines(&dir.path().join("training_log.csv"));
    assert_eq!(
        training[0],
        "round,client,step,reward,delay,energy,migration"
    );
    assert_eq!(training.len(), 1 + 9, "one row per environment step");

    let semantic = read_lines(&dir.path().join("semantic_log.csv"));
    assert_eq!(semantic[0], "round,client,step,semantic_score,energy");
    assert_eq!(semantic.len(), 1 + 9);

    let divergence = read_lines(&dir.path().join("fl_divergence.csv"));
    assert_eq!(divergence[0], "round,client,divergence");
    assert_eq!(divergence.len(), 1 + 3, "one row per participant episode");

    // Episodes are shorter than the batch size, so no training happened
    // and the loss sink was never touched.
    assert!(
        !dir.path().join("loss_log.csv").exists(),
        "loss log not created while the gate stays closed"
    );
}

#[test]
fn loss_log_fills_once_training_gate_opens() {
    let dir = tempdir().expect("tempdir");
    let cfg = training_cfg(13);

    let summary = run_with_telemetry(&cfg, dir.path());

    // Buffer sizes per episode run 1..=4; steps 3 and 4 exceed batch_size=2.
    assert_eq!(summary.steps_total, 2 * 3 * 4);
    let loss = read_lines(&dir.path().join("loss_log.csv"));
    assert_eq!(loss.len(), 1 + 2 * 3 * 2, "two loss rows per episode");
    assert!(summary.mean_critic_loss > 0.0);
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn identical_seeds_produce_identical_logs() {
    let dir_a = tempdir().expect("tempdir");
    let dir_b = tempdir().expect("tempdir");
    let cfg = training_cfg(29);

    let summary_a = run_with_telemetry(&cfg, dir_a.path());
    let summary_b = run_with_telemetry(&cfg, dir_b.path());

    for name in [
        "training_log.csv",
        "semantic_log.csv",
        "fl_divergence.csv",
        "loss_log.csv",
    ] {
        assert_eq!(
            read_bytes(&dir_a.path().join(name)),
            read_bytes(&dir_b.path().join(name)),
            "{name} differs between identically seeded runs"
        );
    }

    let json_a = serde_json::to_value(&summary_a).expect("serialize");
    let json_b = serde_json::to_value(&summary_b).expect("serialize");
    assert_eq!(json_a, json_b, "run summaries differ");
}

#[test]
fn worker_count_does_not_change_logs() {
    let dir_serial = tempdir().expect("tempdir");
    let dir_threaded = tempdir().expect("tempdir");

    let cfg_serial = training_cfg(37).with_workers(1);
    let cfg_threaded = training_cfg(37).with_workers(3);

    run_with_telemetry(&cfg_serial, dir_serial.path());
    run_with_telemetry(&cfg_threaded, dir_threaded.path());

    for name in [
        "training_log.csv",
        "semantic_log.csv",
        "fl_divergence.csv",
        "loss_log.csv",
    ] {
        assert_eq!(
            read_bytes(&dir_serial.path().join(name)),
            read_bytes(&dir_threaded.path().join(name)),
            "{name} differs between workers=1 and workers=3"
        );
    }
}

// =============================================================================
// Summary schema
// =============================================================================

#[test]
fn run_summary_serializes_with_versioned_schema() {
    let dir = tempdir().expect("tempdir");
    let cfg = small_cfg(5);

    let summary = run_with_telemetry(&cfg, dir.path());
    let value = serde_json::to_value(&summary).expect("serialize");

    assert_eq!(value["schema_version"].as_u64(), Some(1));
    assert_eq!(value["seed"].as_u64(), Some(5));
    assert!(value.get("ablation_id").is_some(), "missing ablation_id");
    assert!(value.get("migration_rate").is_some(), "missing migration_rate");

    let rounds = value["rounds"].as_array().expect("rounds array");
    assert_eq!(rounds.len(), summary.rounds_completed);
    for round in rounds {
        assert!(round.get("participants").is_some(), "missing participants");
        assert!(round.get("aggregated").is_some(), "missing aggregated");
        assert!(
            round.get("mean_divergence").is_some(),
            "missing mean_divergence"
        );
    }
}
