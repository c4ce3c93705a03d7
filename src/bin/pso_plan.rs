//! Compute the PSO pulse schedule for a fly scan and print it.
//!
//! ```bash
//! pso_plan --config config/tomo_pso.toml
//! RUST_LOG=tomo_pso=debug pso_plan --method golden-angle --loops 8 --json
//! ```
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tomo_pso::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use tomo_pso::sequence::{AcquisitionOrder, InterlaceMethod};
use tomo_pso::ScanPlanner;
use tracing_subscriber::EnvFilter;

/// Command line arguments for the schedule planner
#[derive(Parser, Debug)]
#[command(author, version, about = "Interlaced fly-scan PSO pulse schedule planner")]
struct Args {
    /// Scan configuration file (TOML); TOMOPSO_* environment variables override it
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Interlacing method (Timbir, GoldenAngle, FibonacciOffset, RoundRobin)
    #[arg(short, long)]
    method: Option<InterlaceMethod>,

    /// Number of projections
    #[arg(short = 'n', long)]
    num_angles: Option<usize>,

    /// Number of interlace loops
    #[arg(short = 'k', long)]
    loops: Option<usize>,

    /// Convert time-ordered angles instead of sorted ones
    #[arg(long)]
    time_order: bool,

    /// Print the full plan as JSON
    #[arg(long)]
    json: bool,

    /// Write the delays as little-endian u32 words to this file
    #[arg(long)]
    delays_out: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with RUST_LOG env var
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let mut config = ScanConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(method) = args.method {
        config.interlace.method = method;
    }
    if let Some(n) = args.num_angles {
        config.scan.num_angles = n;
    }
    if let Some(k) = args.loops {
        config.interlace.loops = k;
    }
    if args.time_order {
        config.interlace.order = AcquisitionOrder::TimeOrder;
    }

    let plan = ScanPlanner::new(config).plan().context("planning scan")?;

    if let Some(path) = &args.delays_out {
        std::fs::write(path, plan.real.to_le_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.json {
        writeln!(out, "{}", plan.to_json()?)?;
        return Ok(());
    }

    writeln!(
        out,
        "{} projections, {} loops, method {}",
        plan.sequence.len(),
        plan.sequence.loops(),
        plan.sequence.method()
    )?;
    writeln!(
        out,
        "step {:.6} deg ({} counts), taxi {:.4} deg, travel {:.4} deg in {:.4} s",
        plan.taxi.step,
        plan.taxi.encoder_counts_per_step,
        plan.taxi.taxi_dist,
        plan.profile.span(),
        plan.profile.total_time()
    )?;
    for warning in &plan.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    writeln!(out, "{:>6} {:>12} {:>12} {:>12} {:>10}", "index", "angle", "real", "pulse", "delay")?;
    for (i, angle) in plan.ideal_angles.iter().enumerate() {
        let delay = if plan.real.has_leading_offset() {
            plan.real.delays().get(i)
        } else {
            i.checked_sub(1).and_then(|j| plan.real.delays().get(j))
        };
        writeln!(
            out,
            "{:>6} {:>12.5} {:>12.5} {:>12} {:>10}",
            i,
            angle,
            plan.real_motion.angles[i] - plan.taxi.lead(),
            plan.real.pulses()[i],
            delay.map_or_else(|| "-".to_string(), u32::to_string)
        )?;
    }
    writeln!(out, "max pulse error: {} counts", plan.max_pulse_error)?;

    Ok(())
}
