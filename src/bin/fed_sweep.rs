// src/bin/fed_sweep.rs
//
// Multi-run sweep harness for the federated round loop.
//
// Goals:
// - Deterministic multi-run evaluation using seed offsets (run i uses seed + i).
// - Reuses the library orchestrator end to end; per-step telemetry is disabled
//   so runs can execute in parallel without contending on log files.
// - Aggregates per-run summaries into sweep_summary.json (versioned schema).
//
// Run examples:
//   cargo run --bin fed_sweep -- --runs 20 --rounds 5 --seed 1 --preset baseline
//   FEDTWIN_ABLATION=no_dt cargo run --bin fed_sweep -- --runs 50 --threads 4 --quiet
//
// Optional CSV export:
//   cargo run --bin fed_sweep -- --runs 100 --seed 7 --csv sweep_runs.csv

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::thread;

use fedtwin::config::{resolve_effective_preset, AblationPreset, Config};
use fedtwin::dataset::synthetic_fleet;
use fedtwin::metrics::OnlineStats;
use fedtwin::orchestrator::{ClientPool, RoundOrchestrator, RunError, RunSummary};
use fedtwin::telemetry::{atomic_write, RunTelemetry};
use serde::Serialize;

const DEFAULT_RUNS: usize = 10;
const DEFAULT_SEED: u64 = 1;
const DEFAULT_THREADS: usize = 1;
const DEFAULT_PRINT_EVERY: usize = 1;
const DEFAULT_OUTPUT_DIR: &str = "runs/fed_sweep";

#[derive(Debug, Clone)]
struct Args {
    runs: usize,
    seed: u64,
    rounds: Option<usize>,
    local_steps: Option<usize>,
    clients: Option<usize>,
    rows: Option<usize>,
    preset: Option<AblationPreset>,
    threads: usize,
    quiet: bool,
    print_every: usize,
    csv_out: Option<PathBuf>,
    output_dir: PathBuf,
}

impl Args {
    fn usage() -> &'static str {
        "\
fedtwin federated sweep harness

USAGE:
  cargo run --bin fed_sweep -- [FLAGS]

PRESET PRECEDENCE:
  1) --preset overrides environment
  2) else FEDTWIN_ABLATION
  3) else default (twin + semantic selection enabled)

FLAGS:
  --preset NAME        default | baseline | no_dt | no_semcom
  --runs N             Number of independent runs (default: 10)
  --seed U64           Base seed (default: 1). Run i uses seed + i.
  --rounds N           Federated rounds per run (default: config/env)
  --local-steps N      Environment steps per client episode (default: config/env)
  --clients N          Clients in the synthetic fleet (default: config/env)
  --rows N             Telemetry rows synthesized per client (default: config/env)
  --threads N          Runs executed concurrently (default: 1)
  --print-every N      Print every N runs (default: 1). Ignored with --quiet.
  --csv PATH           Write per-run CSV rows to PATH (relative to output-dir)
  --output-dir DIR     Output directory (default: runs/fed_sweep)
  --quiet              Suppress per-run lines; only print final summary
  --help               Show this help

OUTPUT:
  The harness writes to <output-dir>/:
    - sweep_summary.json  Per-run statistics and aggregate summary
    - sweep_runs.csv      CSV of per-run metrics (if --csv specified)

EXAMPLES:
  cargo run --bin fed_sweep -- --runs 20 --rounds 5 --seed 7 --preset baseline
  FEDTWIN_ABLATION=no_dt cargo run --bin fed_sweep -- --runs 50 --threads 4 --quiet
"
    }

    fn parse_or_exit() -> Self {
        match Self::parse() {
            Ok(a) => a,
            Err(e) => {
                eprintln!("{e}\n\n{}", Self::usage());
                std::process::exit(2);
            }
        }
    }

    fn parse() -> Result<Self, String> {
        let mut out = Args {
            runs: DEFAULT_RUNS,
            seed: DEFAULT_SEED,
            rounds: None,
            local_steps: None,
            clients: None,
            rows: None,
            preset: None,
            threads: DEFAULT_THREADS,
            quiet: false,
            print_every: DEFAULT_PRINT_EVERY,
            csv_out: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        };

        fn parse_preset(v: &str) -> Result<AblationPreset, String> {
            AblationPreset::parse(v).ok_or_else(|| {
                "Invalid --preset. Expected: default | baseline | no_dt | no_semcom".to_string()
            })
        }

        fn parse_count(flag: &str, v: &str) -> Result<usize, String> {
            let n = v
                .parse::<usize>()
                .map_err(|_| format!("Invalid {flag} (expected integer)"))?;
            if n == 0 {
                return Err(format!("{flag} must be >= 1"));
            }
            Ok(n)
        }

        let mut it = env::args().skip(1);

        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    println!("{}", Self::usage());
                    std::process::exit(0);
                }
                "--quiet" => out.quiet = true,

                "--preset" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --preset".to_string())?;
                    out.preset = Some(parse_preset(&v)?);
                }
                "--runs" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --runs".to_string())?;
                    out.runs = parse_count("--runs", &v)?;
                }
                "--seed" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --seed".to_string())?;
                    out.seed = v
                        .parse::<u64>()
                        .map_err(|_| "Invalid --seed (expected u64)".to_string())?;
                }
                "--rounds" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --rounds".to_string())?;
                    out.rounds = Some(parse_count("--rounds", &v)?);
                }
                "--local-steps" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --local-steps".to_string())?;
                    out.local_steps = Some(parse_count("--local-steps", &v)?);
                }
                "--clients" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --clients".to_string())?;
                    out.clients = Some(parse_count("--clients", &v)?);
                }
                "--rows" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --rows".to_string())?;
                    out.rows = Some(parse_count("--rows", &v)?);
                }
                "--threads" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --threads".to_string())?;
                    out.threads = parse_count("--threads", &v)?;
                }
                "--print-every" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --print-every".to_string())?;
                    out.print_every = parse_count("--print-every", &v)?;
                }
                "--csv" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --csv".to_string())?;
                    out.csv_out = Some(PathBuf::from(v));
                }
                "--output-dir" => {
                    let v = it
                        .next()
                        .ok_or_else(|| "Missing value for --output-dir".to_string())?;
                    out.output_dir = PathBuf::from(v);
                }

                // Support --flag=value style for convenience.
                _ if arg.starts_with("--preset=") => {
                    out.preset = Some(parse_preset(&arg["--preset=".len()..])?);
                }
                _ if arg.starts_with("--runs=") => {
                    out.runs = parse_count("--runs", &arg["--runs=".len()..])?;
                }
                _ if arg.starts_with("--seed=") => {
                    out.seed = arg["--seed=".len()..]
                        .parse::<u64>()
                        .map_err(|_| "Invalid --seed (expected u64)".to_string())?;
                }
                _ if arg.starts_with("--rounds=") => {
                    out.rounds = Some(parse_count("--rounds", &arg["--rounds=".len()..])?);
                }
                _ if arg.starts_with("--local-steps=") => {
                    out.local_steps =
                        Some(parse_count("--local-steps", &arg["--local-steps=".len()..])?);
                }
                _ if arg.starts_with("--clients=") => {
                    out.clients = Some(parse_count("--clients", &arg["--clients=".len()..])?);
                }
                _ if arg.starts_with("--rows=") => {
                    out.rows = Some(parse_count("--rows", &arg["--rows=".len()..])?);
                }
                _ if arg.starts_with("--threads=") => {
                    out.threads = parse_count("--threads", &arg["--threads=".len()..])?;
                }
                _ if arg.starts_with("--print-every=") => {
                    out.print_every =
                        parse_count("--print-every", &arg["--print-every=".len()..])?;
                }
                _ if arg.starts_with("--csv=") => {
                    out.csv_out = Some(PathBuf::from(&arg["--csv=".len()..]));
                }
                _ if arg.starts_with("--output-dir=") => {
                    out.output_dir = PathBuf::from(&arg["--output-dir=".len()..]);
                }

                other => return Err(format!("Unknown argument: {other}")),
            }
        }

        Ok(out)
    }
}

// ============================================================================
// JSON output structures for the sweep summary
// ============================================================================

/// Sweep configuration parameters.
#[derive(Debug, Clone, Serialize)]
struct SweepConfig {
    runs: usize,
    seed: u64,
    rounds: usize,
    local_steps: usize,
    max_participants: usize,
    clients: usize,
    rows_per_client: usize,
    threads: usize,
    preset: String,
    ablation_id: String,
}

/// Single run record for JSON output.
#[derive(Debug, Clone, Serialize)]
struct SweepRunRecord {
    run: usize,
    seed: u64,
    rounds_completed: usize,
    aggregations: usize,
    episodes_run: usize,
    episodes_failed: usize,
    steps_total: u64,
    migration_rate: f64,
    mean_reward: f64,
    min_reward: f64,
    max_reward: f64,
    mean_critic_loss: f64,
    mean_divergence: f64,
}

/// Aggregate statistics for a metric.
#[derive(Debug, Clone, Serialize)]
struct AggregateStats {
    mean: f64,
    std_pop: f64,
    min: f64,
    max: f64,
    p05: f64,
    p50: f64,
    p95: f64,
}

/// Simple statistics without percentiles.
#[derive(Debug, Clone, Serialize)]
struct SimpleStats {
    mean: f64,
    std_pop: f64,
    min: f64,
    max: f64,
}

/// Aggregate statistics across all runs.
#[derive(Debug, Clone, Serialize)]
struct SweepAggregateStats {
    rounds_total: usize,
    aggregation_count: usize,
    aggregation_rate: f64,
    episodes_failed: usize,
    reward: AggregateStats,
    divergence: SimpleStats,
    migration_rate: SimpleStats,
    critic_loss: SimpleStats,
}

/// Sweep summary output (versioned schema).
#[derive(Debug, Clone, Serialize)]
struct SweepSummary {
    /// Schema version for sweep_summary.json. Increment on breaking changes.
    schema_version: u32,
    fedtwin_version: String,
    config: SweepConfig,
    runs: Vec<SweepRunRecord>,
    aggregate: SweepAggregateStats,
}

fn simple_stats(stats: &OnlineStats) -> SimpleStats {
    SimpleStats {
        mean: stats.mean(),
        std_pop: stats.stddev_population(),
        min: stats.min(),
        max: stats.max(),
    }
}

fn percentile(sorted: &[f64], p01: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let p = p01.clamp(0.0, 1.0);
    let n = sorted.len();
    let idx = p * (n.saturating_sub(1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - (lo as f64);
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

fn p05_p50_p95(mut xs: Vec<f64>) -> (f64, f64, f64) {
    xs.retain(|x| x.is_finite());
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    (
        percentile(&xs, 0.05),
        percentile(&xs, 0.50),
        percentile(&xs, 0.95),
    )
}

/// One full federated run with per-step telemetry disabled.
fn run_once(base: &Config, seed: u64) -> Result<RunSummary, RunError> {
    let cfg = base.clone().with_seed(seed);
    let fleet = synthetic_fleet(cfg.fleet.clients, cfg.fleet.rows_per_client, cfg.seed);
    let pool = ClientPool::build(fleet, &cfg)?;
    let mut orchestrator = RoundOrchestrator::new(cfg, pool, RunTelemetry::disabled())?;
    orchestrator.run()
}

fn main() {
    let args = Args::parse_or_exit();

    // Resolve preset with proper precedence: CLI > env > default
    let effective = resolve_effective_preset(args.preset);
    effective.log_startup();

    let mut cfg = Config::from_env_or_preset(effective.preset);
    if let Some(rounds) = args.rounds {
        cfg = cfg.with_rounds(rounds);
    }
    if let Some(steps) = args.local_steps {
        cfg = cfg.with_local_steps(steps);
    }
    let clients = args.clients.unwrap_or(cfg.fleet.clients);
    let rows = args.rows.unwrap_or(cfg.fleet.rows_per_client);
    cfg = cfg.with_fleet(clients, rows);

    // Create output directory
    if let Err(e) = fs::create_dir_all(&args.output_dir) {
        eprintln!(
            "Failed to create output directory {:?}: {e}",
            args.output_dir
        );
        std::process::exit(2);
    }

    // Determine CSV path (in output directory)
    let csv_path = args.csv_out.as_ref().map(|p| {
        if p.is_absolute() {
            p.clone()
        } else {
            args.output_dir.join(p)
        }
    });

    let mut csv: Option<File> = match csv_path.as_ref() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let mut f = File::create(path).unwrap_or_else(|e| {
                eprintln!("Failed to create CSV file {:?}: {e}", path);
                std::process::exit(2);
            });
            writeln!(
                f,
                "run,seed,rounds_completed,aggregations,episodes_run,episodes_failed,steps_total,migration_rate,mean_reward,min_reward,max_reward,mean_critic_loss,mean_divergence"
            )
            .unwrap();
            Some(f)
        }
        None => None,
    };

    println!(
        "fedtwin-sweep v{} | preset={} ({}) ablation_hash={} runs={} rounds={} local_steps={} clients={} seed={} threads={} output_dir={} csv={}",
        env!("CARGO_PKG_VERSION"),
        effective.preset.as_str(),
        effective.source.as_str(),
        cfg.ablation.short_hash(),
        args.runs,
        cfg.rounds.rounds,
        cfg.rounds.local_steps,
        cfg.fleet.clients,
        args.seed,
        args.threads,
        args.output_dir.display(),
        csv_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    let mut reward_stats = OnlineStats::default();
    let mut divergence_stats = OnlineStats::default();
    let mut migration_stats = OnlineStats::default();
    let mut loss_stats = OnlineStats::default();

    let mut reward_samples: Vec<f64> = Vec::with_capacity(args.runs);

    let mut rounds_total: usize = 0;
    let mut aggregation_count: usize = 0;
    let mut episodes_failed_total: usize = 0;

    let mut run_records: Vec<SweepRunRecord> = Vec::with_capacity(args.runs);

    let seeds: Vec<u64> = (0..args.runs)
        .map(|i| args.seed.wrapping_add(i as u64))
        .collect();

    let mut run_index: usize = 0;

    // Runs execute chunk by chunk so per-run lines stay ordered. Threads
    // borrow the base config; each writes a distinct slot.
    for seed_chunk in seeds.chunks(args.threads) {
        let mut slots: Vec<Option<Result<RunSummary, RunError>>> =
            seed_chunk.iter().map(|_| None).collect();

        if args.threads <= 1 {
            for (slot, &seed) in slots.iter_mut().zip(seed_chunk) {
                *slot = Some(run_once(&cfg, seed));
            }
        } else {
            let base = &cfg;
            thread::scope(|s| {
                for (slot, &seed) in slots.iter_mut().zip(seed_chunk) {
                    s.spawn(move || {
                        *slot = Some(run_once(base, seed));
                    });
                }
            });
        }

        for (slot, &run_seed) in slots.into_iter().zip(seed_chunk) {
            run_index += 1;
            let summary = match slot {
                Some(Ok(s)) => s,
                Some(Err(e)) => {
                    eprintln!("run {run_index} (seed={run_seed}) failed: {e}");
                    std::process::exit(1);
                }
                None => {
                    eprintln!("run {run_index} (seed={run_seed}) produced no result");
                    std::process::exit(1);
                }
            };

            reward_stats.add(summary.mean_reward);
            divergence_stats.add(summary.mean_divergence);
            migration_stats.add(summary.migration_rate);
            loss_stats.add(summary.mean_critic_loss);
            reward_samples.push(summary.mean_reward);

            rounds_total += summary.rounds_completed;
            aggregation_count += summary.aggregations;
            episodes_failed_total += summary.episodes_failed;

            run_records.push(SweepRunRecord {
                run: run_index,
                seed: run_seed,
                rounds_completed: summary.rounds_completed,
                aggregations: summary.aggregations,
                episodes_run: summary.episodes_run,
                episodes_failed: summary.episodes_failed,
                steps_total: summary.steps_total,
                migration_rate: summary.migration_rate,
                mean_reward: summary.mean_reward,
                min_reward: summary.min_reward,
                max_reward: summary.max_reward,
                mean_critic_loss: summary.mean_critic_loss,
                mean_divergence: summary.mean_divergence,
            });

            if let Some(f) = csv.as_mut() {
                writeln!(
                    f,
                    "{},{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
                    run_index,
                    run_seed,
                    summary.rounds_completed,
                    summary.aggregations,
                    summary.episodes_run,
                    summary.episodes_failed,
                    summary.steps_total,
                    summary.migration_rate,
                    summary.mean_reward,
                    summary.min_reward,
                    summary.max_reward,
                    summary.mean_critic_loss,
                    summary.mean_divergence
                )
                .unwrap();
            }

            let should_print = !args.quiet
                && (args.print_every == 1
                    || (run_index % args.print_every == 0)
                    || (run_index == args.runs));

            if should_print {
                println!(
                    "run {:>4}/{:<4} seed={:<10} reward={:>9.4} div={:>9.6} loss={:>10.6} mig={:>5.3} agg={}/{} failed={}",
                    run_index,
                    args.runs,
                    run_seed,
                    summary.mean_reward,
                    summary.mean_divergence,
                    summary.mean_critic_loss,
                    summary.migration_rate,
                    summary.aggregations,
                    summary.rounds_completed,
                    summary.episodes_failed
                );
            }
        }
    }

    let aggregation_rate = if rounds_total > 0 {
        aggregation_count as f64 / rounds_total as f64
    } else {
        0.0
    };
    let (reward_p05, reward_p50, reward_p95) = p05_p50_p95(reward_samples);

    println!();
    println!("SUMMARY");
    println!("  runs:              {}", args.runs);
    println!(
        "  aggregation_rate:  {:.2}% ({} / {})",
        100.0 * aggregation_rate,
        aggregation_count,
        rounds_total
    );
    println!("  episodes_failed:   {}", episodes_failed_total);
    println!(
        "  reward:            mean={:.4}  std(pop)={:.4}  min={:.4}  max={:.4}  p05={:.4}  p50={:.4}  p95={:.4}",
        reward_stats.mean(),
        reward_stats.stddev_population(),
        reward_stats.min(),
        reward_stats.max(),
        reward_p05,
        reward_p50,
        reward_p95
    );
    println!(
        "  divergence:        mean={:.6}  std(pop)={:.6}  min={:.6}  max={:.6}",
        divergence_stats.mean(),
        divergence_stats.stddev_population(),
        divergence_stats.min(),
        divergence_stats.max()
    );
    println!(
        "  migration_rate:    mean={:.4}  std(pop)={:.4}  min={:.4}  max={:.4}",
        migration_stats.mean(),
        migration_stats.stddev_population(),
        migration_stats.min(),
        migration_stats.max()
    );
    println!(
        "  critic_loss:       mean={:.6}  std(pop)={:.6}  min={:.6}  max={:.6}",
        loss_stats.mean(),
        loss_stats.stddev_population(),
        loss_stats.min(),
        loss_stats.max()
    );

    // Build summary structure
    let summary = SweepSummary {
        schema_version: 1,
        fedtwin_version: env!("CARGO_PKG_VERSION").to_string(),
        config: SweepConfig {
            runs: args.runs,
            seed: args.seed,
            rounds: cfg.rounds.rounds,
            local_steps: cfg.rounds.local_steps,
            max_participants: cfg.rounds.max_participants,
            clients: cfg.fleet.clients,
            rows_per_client: cfg.fleet.rows_per_client,
            threads: args.threads,
            preset: effective.preset.as_str().to_string(),
            ablation_id: cfg.ablation.id(),
        },
        runs: run_records,
        aggregate: SweepAggregateStats {
            rounds_total,
            aggregation_count,
            aggregation_rate,
            episodes_failed: episodes_failed_total,
            reward: AggregateStats {
                mean: reward_stats.mean(),
                std_pop: reward_stats.stddev_population(),
                min: reward_stats.min(),
                max: reward_stats.max(),
                p05: reward_p05,
                p50: reward_p50,
                p95: reward_p95,
            },
            divergence: simple_stats(&divergence_stats),
            migration_rate: simple_stats(&migration_stats),
            critic_loss: simple_stats(&loss_stats),
        },
    };

    // Write sweep_summary.json
    let summary_path = args.output_dir.join("sweep_summary.json");
    let summary_json =
        serde_json::to_string_pretty(&summary).expect("Failed to serialize sweep_summary.json");
    if let Err(e) = atomic_write(&summary_path, &summary_json) {
        eprintln!("Failed to write sweep_summary.json: {e}");
        std::process::exit(1);
    }
    println!();
    println!("Wrote: {}", summary_path.display());

    println!();
    println!("Output written to: {}/", args.output_dir.display());
}
