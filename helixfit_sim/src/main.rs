//! HelixFit Simulation CLI
//!
//! Generate tracks in the synthetic detector, refit them and check the fit
//! quality scenario by scenario.

use clap::Parser;
use helixfit_core::EstimatorKind;
use helixfit_sim::scenarios::ScenarioId;
use helixfit_sim::{ScenarioResult, ScenarioRunner, SimConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// HelixFit track refit simulation
#[derive(Parser, Debug)]
#[command(name = "helixfit-sim")]
#[command(about = "Run seeded track refit scenarios for HelixFit", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Tracks generated per scenario
    #[arg(short = 'n', long, default_value = "100")]
    tracks: usize,

    /// Scenario to run (barrel, low_momentum, outliers, backward, seeded, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Track estimator (kalman, global_chi2)
    #[arg(short, long)]
    estimator: Option<String>,

    /// Disable multiple scattering in the fit
    #[arg(long)]
    no_ms: bool,

    /// Disable energy loss in the fit
    #[arg(long)]
    no_eloss: bool,

    /// JSON file overriding fitter, detector and acceptance settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export every track of the run to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; per-track fit logs only with --verbose
    let directives = if args.verbose { "debug" } else { "info,helixfit_core=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("HelixFit Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Build the run configuration: file first, flags on top
    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: cannot load {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };
    if let Some(name) = &args.estimator {
        config.fitter.estimator = name.parse::<EstimatorKind>().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available estimators: kalman, global_chi2");
            std::process::exit(1);
        });
    }
    if args.no_ms {
        config.fitter.multiple_scattering = false;
    }
    if args.no_eloss {
        config.fitter.energy_loss = false;
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: barrel, low_momentum, outliers, backward, seeded, all");
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 || args.seeds > 1 {
            eprintln!("Error: --export only supports a single scenario and seed, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let runner = ScenarioRunner::new(base_seed, args.tracks).with_config(config);
        let (result, export) = match runner.run_with_export(scenarios[0]) {
            Ok(run) => run,
            Err(e) => {
                error!("✗ {} FAILED: {}", scenarios[0].name(), e);
                std::process::exit(1);
            }
        };

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
        } else {
            info!("Exported {} tracks to {}", export.tracks.len(), export_path);
        }

        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}",
                scenarios[0].name(), base_seed, export_path);
        } else {
            error!("✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.tracks).with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!("✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "tracks": r.tracks_generated,
                    "fitted": r.tracks_fitted,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!("  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
