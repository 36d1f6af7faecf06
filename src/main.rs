// src/main.rs
//
// Command line driver.
//
//   polar-slice process --config batch.toml [--workers 8]
//       -> renders XY/XZ/YZ quiver plots for every task under `base_dir`
//          and appends them to the per-plane summary indexes.
//
//   polar-slice sweep --spec sweep.toml
//       -> creates task directories and the metadata index from a template run.
//
// Outputs of `process`:
//   <task>/{XY,XZ,YZ}_quiver.<ext>
//   <summary_dir>/
//     ├── config.json                 (effective configuration)
//     └── {XY,XZ,YZ}/
//           ├── {PLANE}_summary.csv   (task_id,parameters,filename)
//           └── <task>_{PLANE}.<ext>
//
// Log verbosity follows RUST_LOG (default `info`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polar_slice::config::BatchConfig;
use polar_slice::pipeline::run_batch;
use polar_slice::sweep::{SweepSpec, generate};

#[derive(Parser)]
#[command(name = "polar-slice")]
#[command(about = "Quiver-plot slices of chunked 3D polarisation fields", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render slices for every task and update the summary indexes.
    Process {
        #[arg(long)]
        config: PathBuf,

        /// Overrides `workers` from the config file.
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        workers: Option<u16>,
    },
    /// Create task directories from a template run.
    Sweep {
        #[arg(long)]
        spec: PathBuf,
    },
}

fn process(config_path: &Path, workers: Option<u16>) -> anyhow::Result<bool> {
    let mut config = BatchConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(w) = workers {
        config.workers = usize::from(w);
    }
    config
        .write_to_dir(&config.summary_dir)
        .with_context(|| format!("writing config.json to {}", config.summary_dir.display()))?;

    let report = run_batch(&config).context("batch aborted")?;
    print!("{report}");
    if !report.exit_ok() {
        warn!("no task completed");
    }
    Ok(report.exit_ok())
}

fn sweep(spec_path: &Path) -> anyhow::Result<()> {
    let root = spec_path.parent().unwrap_or(Path::new("."));
    let spec = SweepSpec::load(spec_path)?.rooted_at(root);
    let folders = generate(&spec).context("sweep generation failed")?;
    info!(
        tasks = folders.len(),
        index = %spec.metadata_index.display(),
        "sweep prepared"
    );
    println!(
        "Prepared {} tasks under {}. Metadata in {}.",
        folders.len(),
        spec.tasks_dir.display(),
        spec.metadata_index.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Process { config, workers } => {
            let ok = process(&config, workers)?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Sweep { spec } => {
            sweep(&spec)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
