use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{info, warn};

use parstat_backend::{HostBackend, WgpuBackend, WgpuBackendOptions};
use parstat_backend_api::ComputeBackend;
use parstat_engine::{bitonic_sort, compare, SortPlan};

mod dataset;
mod report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Run kernels on a GPU adapter through wgpu (falls back to host when
    /// no adapter is available).
    Wgpu,
    /// Execute kernel semantics on the CPU.
    Host,
}

/// Parallel statistics over an f32 dataset: minimum, maximum, mean and
/// standard deviation, computed by an optimized plan and a baseline plan
/// with per-dispatch timing.
#[derive(Debug, Parser)]
#[command(name = "parstat", version, about)]
struct Cli {
    /// Dataset file, one sample per line (last column when several).
    dataset: PathBuf,

    /// Compute backend to run on.
    #[arg(long, value_enum, default_value_t = BackendChoice::Wgpu)]
    backend: BackendChoice,

    /// Emit the comparison report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Also sort the dataset on the device and print the extremes
    /// (experimental; capped at the sort capacity).
    #[arg(long)]
    sort: bool,
}

fn select_backend(choice: BackendChoice) -> Box<dyn ComputeBackend> {
    match choice {
        BackendChoice::Host => Box::new(HostBackend::new()),
        BackendChoice::Wgpu => match WgpuBackend::new(WgpuBackendOptions::default()) {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                warn!("wgpu backend unavailable ({e}); falling back to the host backend");
                Box::new(HostBackend::new())
            }
        },
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let data = dataset::load(&cli.dataset)?;
    info!("loaded {} samples from {}", data.len(), cli.dataset.display());

    let backend = select_backend(cli.backend);
    let device = backend.device_info();
    info!("backend: {} ({})", device.name, device.backend);

    if cli.sort {
        let sorted = bitonic_sort(backend.as_ref(), &data, &SortPlan::default())
            .context("device sort failed")?;
        let lo = &sorted.values[..sorted.values.len().min(5)];
        let hi = &sorted.values[sorted.values.len().saturating_sub(5)..];
        println!("sorted: lowest {lo:?}, highest {hi:?}");
    }

    let report = compare(backend.as_ref(), &data).context("statistics comparison failed")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report::render(&mut io::stdout().lock(), &report)?;
    }
    Ok(())
}
