use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ndrsim::config::SimConfig;
use ndrsim::device::{Device, RunOutcome};
use ndrsim::ndrange::NDRange;
use ndrsim::scheduler::PlacementPolicy;
use ndrsim::trace::{JsonLinesSink, NullSink, TraceSink};

/// Simulate an NDRange on a device of cycle-stepped compute units
#[derive(Parser, Debug)]
#[command(name = "ndrsim", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    compute_units: Option<usize>,

    /// Stream cores per compute unit
    #[arg(long)]
    stream_cores: Option<usize>,

    #[arg(long)]
    wavefront_size: Option<u32>,

    #[arg(long, value_enum)]
    placement: Option<PlacementPolicy>,

    /// Global size, "x" or "x,y,z"
    #[arg(long, value_parser = parse_dim3)]
    global_size: Option<[u32; 3]>,

    /// Work-group size, "x" or "x,y,z"
    #[arg(long, value_parser = parse_dim3)]
    local_size: Option<[u32; 3]>,

    /// Suspend the run after this many cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Write pipeline events as JSON lines to this file
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Publish live metrics for the viz binary
    #[arg(long)]
    live: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_dim3(s: &str) -> Result<[u32; 3], String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x] => Ok([*x, 1, 1]),
        [x, y] => Ok([*x, *y, 1]),
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("expected 1 to 3 comma-separated sizes, got {}", parts.len())),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(n) = args.compute_units {
        config.device.num_compute_units = n;
    }
    if let Some(n) = args.stream_cores {
        config.device.num_stream_cores = n;
    }
    if let Some(n) = args.wavefront_size {
        config.device.wavefront_size = n;
    }
    if let Some(p) = args.placement {
        config.device.placement = p;
    }
    if let Some(g) = args.global_size {
        config.kernel.global_size = g;
    }
    if let Some(l) = args.local_size {
        config.kernel.local_size = l;
    }
    if args.max_cycles.is_some() {
        config.run.max_cycles = args.max_cycles;
    }
    if args.live && config.run.metrics_interval == 0 {
        config.run.metrics_interval = 100;
    }
    config.device.validate()?;

    let mut ndrange = NDRange::new(
        0,
        &config.kernel.name,
        config.kernel.global(),
        config.kernel.local(),
        config.device.wavefront_size,
    )?;

    let sink: Box<dyn TraceSink> = match &args.trace {
        Some(path) => Box::new(
            JsonLinesSink::create(path)
                .with_context(|| format!("creating trace file {}", path.display()))?,
        ),
        None => Box::new(NullSink),
    };
    let mut device = Device::from_config(&config)?.with_trace(sink);

    info!(
        "Simulating '{}' on {} compute units x {} stream cores ({} placement)",
        config.kernel.name,
        config.device.num_compute_units,
        config.device.num_stream_cores,
        device.placement_name(),
    );

    let outcome = match config.run.max_cycles {
        Some(budget) => device.run_for(&mut ndrange, budget)?,
        None => RunOutcome::Completed(device.run(&mut ndrange)?),
    };

    let stats = outcome.stats();
    let state = if outcome.is_completed() { "completed" } else { "suspended" };
    println!(
        "Run {}: {} cycles | {}/{} work-groups done | {} running | {} pending | {} instructions | {} memory requests",
        state,
        stats.cycles,
        ndrange.done_count(),
        ndrange.num_work_groups(),
        device.busy_count(),
        ndrange.pending_len(),
        stats.instructions_retired,
        stats.memory_requests,
    );
    for (cu, busy) in stats.busy_cycles.iter().enumerate() {
        println!("  cu {:3}: {} busy cycles", cu, busy);
    }

    Ok(())
}
