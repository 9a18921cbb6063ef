#![deny(warnings)]

//! Headless CLI: run the full simulation pipeline from a YAML configuration
//! and print a KPI summary.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sim_runtime::{run, RunConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    seed: Option<u64>,
    years: Option<u32>,
    goal: Option<Decimal>,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        output: None,
        seed: None,
        years: None,
        goal: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--output" => args.output = it.next().map(PathBuf::from),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--years" => args.years = it.next().and_then(|s| s.parse().ok()),
            "--goal" => args.goal = it.next().and_then(|s| s.parse().ok()),
            _ => {}
        }
    }
    args
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => RunConfig::default(),
    };
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(seed) = args.seed {
        config.global_seed = seed;
    }
    if let Some(years) = args.years {
        config.simulation.years = years;
    }
    if let Some(goal) = args.goal {
        config.projection.goal_target = goal;
    }
    Ok(config)
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    let config = load_config(&args)?;
    info!(
        seed = config.global_seed,
        years = config.simulation.years,
        version = env!("GIT_SHA"),
        "starting distsim run"
    );

    let summary = run(&config)?;

    println!(
        "Run OK | periods: {} | facts: {} | revenue: DOP {} | net margin: DOP {}",
        summary.periods, summary.facts, summary.gross_revenue, summary.net_margin
    );
    match summary.goal_probability {
        Some((optimistic, pessimistic)) => println!(
            "2026 goal | optimistic: {:.1}% | pessimistic: {:.1}%",
            optimistic * 100.0,
            pessimistic * 100.0
        ),
        None => println!("2026 goal | projection skipped (no historical data)"),
    }
    println!(
        "Signals | churn-ranked customers: {} | OOS-flagged routes: {} | tables at {}",
        summary.churn_signals,
        summary.oos_flagged,
        summary.output_dir.display()
    );

    Ok(())
}
