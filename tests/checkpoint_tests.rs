// tests/checkpoint_tests.rs
//
// Checkpoint format tests for the actor/critic agent.
//
// These tests verify that:
// 1. A saved agent restores into a fresh agent with identical behavior.
// 2. The checkpoint files on disk are parseable parameter snapshots with
//    the expected tensor layout.
// 3. Loading from a missing path reports an error instead of panicking.

use std::fs;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use fedtwin::agent::ContinuousControlAgent;
use fedtwin::config::Config;
use fedtwin::params::{ParamSet, ParamSnapshot};

fn agent_with_seed(seed: u64) -> ContinuousControlAgent {
    let mut cfg = Config::default().agent;
    cfg.hidden_dim = 16;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ContinuousControlAgent::new(&cfg, &mut rng)
}

fn probe_states() -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0, 0.0, 0.0, 0.2],
        vec![0.5, 0.1, 0.3, 0.9, 0.7],
        vec![1.0, 1.0, 1.0, 1.0, 1.0],
    ]
}

#[test]
fn saved_agent_restores_identical_behavior() {
    let dir = tempdir().expect("tempdir");
    let prefix = dir.path().join("global");

    let saved = agent_with_seed(7);
    saved.save(&prefix).expect("save should succeed");

    // Different init seed, so the agents disagree before loading.
    let mut restored = agent_with_seed(8);
    let state = &probe_states()[1];
    assert_ne!(saved.select_action(state), restored.select_action(state));

    restored.load(&prefix).expect("load should succeed");
    for state in &probe_states() {
        assert_eq!(
            saved.select_action(state),
            restored.select_action(state),
            "restored agent diverges on {:?}",
            state
        );
    }
}

#[test]
fn checkpoint_files_are_parseable_snapshots() {
    let dir = tempdir().expect("tempdir");
    let prefix = dir.path().join("global");

    agent_with_seed(3).save(&prefix).expect("save should succeed");

    for part in ["actor", "critic"] {
        let path = dir.path().join(format!("global_{part}.json"));
        let raw = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read {:?}: {}", path, e));
        let snapshot: ParamSnapshot =
            serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{part} snapshot invalid: {e}"));
        let params = ParamSet::from_snapshot(&snapshot).expect("snapshot should decode");

        // Three linear layers, each with a weight and a bias.
        let keys: Vec<&str> = params.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "fc1.bias",
                "fc1.weight",
                "fc2.bias",
                "fc2.weight",
                "fc3.bias",
                "fc3.weight"
            ],
            "{part} tensor names"
        );
    }
}

#[test]
fn loading_from_missing_path_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let mut agent = agent_with_seed(1);

    let result = agent.load(&dir.path().join("nope"));
    assert!(result.is_err(), "expected an error for a missing checkpoint");
}
