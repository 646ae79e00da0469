//! gwpop command line

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use gwpop::{run, RunConfig};

#[derive(Parser)]
#[command(name = "gwpop")]
#[command(about = "Hierarchical inference of compact-binary populations and cosmology")]
#[command(version)]
struct Cli {
    /// Run configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Continue the chain stored in the output directory
    #[arg(long)]
    resume: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    let config = RunConfig::read(&cli.config)?;
    let resume = cli.resume || config.resume;
    let outcome = run(&config, resume)?;

    let summary = &outcome.summary;
    println!(
        "{:?} after {} steps, mean acceptance {:.3}",
        summary.state, summary.iterations, summary.mean_acceptance
    );
    for ((name, label), tau) in outcome
        .params_inference
        .iter()
        .zip(outcome.labels.iter())
        .zip(summary.taus.iter())
    {
        println!("  {name:<16} {label:<28} tau = {tau:.1}");
    }
    match (summary.burn_in_thin, outcome.n_flat_samples) {
        (Some((discard, thin)), Some(n)) => {
            println!("burn-in {discard}, thin {thin}: {n} posterior samples")
        }
        _ => println!("autocorrelation time not available, no burn-in suggestion"),
    }
    if outcome.flagged_selection > 0 {
        println!(
            "{} evaluations had an unreliable selection estimate",
            outcome.flagged_selection
        );
    }
    Ok(())
}
