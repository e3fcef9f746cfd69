// src/main.rs
//
// Research-harness friendly CLI entrypoint for Fedtwin.
//
// Constraints:
// - CLI preset precedence:
//     --preset overrides env;
//     if missing use FEDTWIN_ABLATION (default: everything enabled).
// - Deterministic runs via --seed (drives fleet synthesis, twin bootstrap
//   and the round loop).
// - Round/fleet sizing flags override env-resolved values.
// - Print concise run header (preset, rounds, cfg version/hash).
// - Telemetry CSVs, run_summary.json and the global actor checkpoint land
//   under --out-dir.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};

use fedtwin::config::{resolve_effective_preset, AblationPreset, Config};
use fedtwin::dataset::synthetic_fleet;
use fedtwin::orchestrator::{ClientPool, RoundOrchestrator};
use fedtwin::telemetry::{atomic_write, RunTelemetry};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PresetArg {
    Default,
    Baseline,
    NoDt,
    NoSemcom,
}

#[derive(Debug, Parser)]
#[command(
    name = "fedtwin",
    about = "Federated digital-twin offload trainer (research harness)",
    version
)]
struct Args {
    /// Ablation preset (optional).
    /// If omitted, uses FEDTWIN_ABLATION (default: everything enabled).
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    /// Deterministic seed (drives fleet synthesis and the round loop).
    #[arg(long)]
    seed: Option<u64>,

    /// Number of federated rounds.
    #[arg(long)]
    rounds: Option<usize>,

    /// Environment steps per client episode.
    #[arg(long)]
    local_steps: Option<usize>,

    /// Participants selected per round.
    #[arg(long)]
    max_participants: Option<usize>,

    /// Worker threads for client episodes (1 = serial).
    #[arg(long)]
    workers: Option<usize>,

    /// Number of clients in the synthetic fleet.
    #[arg(long)]
    clients: Option<usize>,

    /// Telemetry rows synthesized per client.
    #[arg(long)]
    rows: Option<usize>,

    /// Output directory for CSV logs, summary and checkpoints.
    #[arg(long, default_value = "runs/fedtwin")]
    out_dir: PathBuf,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn fnv1a64(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn main() {
    let args = Args::parse();

    // Convert CLI PresetArg to AblationPreset (if provided)
    let cli_preset = args.preset.map(|p| match p {
        PresetArg::Default => AblationPreset::Default,
        PresetArg::Baseline => AblationPreset::Baseline,
        PresetArg::NoDt => AblationPreset::NoDt,
        PresetArg::NoSemcom => AblationPreset::NoSemcom,
    });

    // Resolve preset with proper precedence: CLI > env > default
    let effective = resolve_effective_preset(cli_preset);

    // Explicit startup log line for ablation observability
    effective.log_startup();

    // Preset flags + env overrides already handled in Config.
    let mut cfg = Config::from_env_or_preset(effective.preset);
    if let Some(seed) = args.seed {
        cfg = cfg.with_seed(seed);
    }
    if let Some(rounds) = args.rounds {
        cfg = cfg.with_rounds(rounds);
    }
    if let Some(steps) = args.local_steps {
        cfg = cfg.with_local_steps(steps);
    }
    if let Some(cap) = args.max_participants {
        cfg = cfg.with_max_participants(cap);
    }
    if let Some(workers) = args.workers {
        cfg = cfg.with_workers(workers);
    }
    let clients = args.clients.unwrap_or(cfg.fleet.clients);
    let rows = args.rows.unwrap_or(cfg.fleet.rows_per_client);
    cfg = cfg.with_fleet(clients, rows);

    let cfg_hash = fnv1a64(&format!("{cfg:?}"));

    println!(
        "fedtwin | cfg={} | cfg_hash=0x{:016x} | preset={} | rounds={} | clients={} | seed={}",
        cfg.version,
        cfg_hash,
        effective.preset.as_str(),
        cfg.rounds.rounds,
        cfg.fleet.clients,
        cfg.seed
    );

    if let Err(e) = run(cfg, &args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cfg: Config, args: &Args) -> Result<()> {
    let fleet = synthetic_fleet(cfg.fleet.clients, cfg.fleet.rows_per_client, cfg.seed);
    let pool = ClientPool::build(fleet, &cfg).context("building client pool")?;
    let telemetry = RunTelemetry::to_dir(&args.out_dir);

    let mut orchestrator =
        RoundOrchestrator::new(cfg, pool, telemetry).context("initializing orchestrator")?;
    let summary = orchestrator.run().context("federated run failed")?;

    if args.verbose > 0 {
        for round in &summary.rounds {
            println!(
                "round={:<3} participants={:?} failed={} aggregated={} mean_reward={:>9.4} mean_div={:.6}",
                round.round,
                round.participants,
                round.episodes_failed,
                round.aggregated,
                round.mean_reward,
                round.mean_divergence
            );
        }
        println!();
    }

    println!(
        "SUMMARY | rounds={} aggregations={} episodes={} failed={} steps={}",
        summary.rounds_completed,
        summary.aggregations,
        summary.episodes_run,
        summary.episodes_failed,
        summary.steps_total
    );
    println!(
        "        | reward mean={:.4} min={:.4} max={:.4} | critic_loss={:.6} | divergence={:.6} | migration_rate={:.3}",
        summary.mean_reward,
        summary.min_reward,
        summary.max_reward,
        summary.mean_critic_loss,
        summary.mean_divergence,
        summary.migration_rate
    );

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let json = serde_json::to_string_pretty(&summary).context("serializing run summary")?;
    atomic_write(&args.out_dir.join("run_summary.json"), &json)
        .context("writing run_summary.json")?;

    orchestrator
        .global_agent()
        .save(&args.out_dir.join("global"))
        .context("writing global checkpoint")?;

    println!();
    println!("Output written to: {}/", args.out_dir.display());
    Ok(())
}
