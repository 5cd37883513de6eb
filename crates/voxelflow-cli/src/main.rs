//! VoxelFlow CLI - Schedule inspection, domain decomposition and synthetic runs.
//!
//! # Commands
//!
//! - `voxelflow schedule <units.toml>` - Print or export the unit execution order
//! - `voxelflow decompose` - Split a voxel set across devices and report balance
//! - `voxelflow simulate` - Run a synthetic multi-device simulation
//! - `voxelflow completions <shell>` - Generate shell completions
//!
//! # Examples
//!
//! ```bash
//! # Execution order of a unit set, as Graphviz
//! voxelflow schedule units.toml --format dot | dot -Tsvg > units.svg
//!
//! # Split a 64³ cube over 8 devices
//! voxelflow decompose --size 64 --devices 8
//!
//! # Ten steps of the synthetic pipeline on 4 devices
//! voxelflow simulate --size 32 --devices 4 --steps 10
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use voxelflow::VoxelFlowConfig;

mod commands;
mod error;

use commands::decompose::VoxelSource;
use commands::simulate::SimulateArgs;
use commands::{decompose, schedule, simulate, OutputFormat};
use error::CliResult;

/// VoxelFlow CLI - multi-device voxel simulation diagnostics
#[derive(Parser)]
#[command(name = "voxelflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Engine settings shared by `decompose` and `simulate`.
#[derive(Args)]
struct EngineArgs {
    /// Configuration file (TOML); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of devices
    #[arg(short, long)]
    devices: Option<usize>,

    /// Ghost layers per face
    #[arg(long)]
    thickness: Option<u32>,

    /// Allowed load imbalance as a fraction of the mean
    #[arg(long)]
    tolerance: Option<f64>,

    /// Split at exact quantiles instead of Morton-aligned boundaries
    #[arg(long)]
    no_locality: bool,

    /// Halo transfer timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl EngineArgs {
    fn resolve(&self) -> CliResult<VoxelFlowConfig> {
        let base = match &self.config {
            Some(path) => VoxelFlowConfig::from_file(path)?,
            None => VoxelFlowConfig::default(),
        };

        let mut builder = VoxelFlowConfig::builder()
            .device_count(self.devices.unwrap_or(base.device_count))
            .halo_thickness(self.thickness.unwrap_or(base.decomposition.halo_thickness))
            .load_balance_tolerance(
                self.tolerance
                    .unwrap_or(base.decomposition.load_balance_tolerance),
            )
            .prefer_spatial_locality(
                base.decomposition.prefer_spatial_locality && !self.no_locality,
            )
            .transfer_timeout(base.halo.transfer_timeout());
        if let Some(ms) = self.timeout_ms {
            builder = builder.transfer_timeout(Duration::from_millis(ms));
        }
        Ok(builder.build()?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution order of the units in a TOML file
    Schedule {
        /// Units file with one [[unit]] table per unit
        file: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Split a voxel set across devices and report load balance
    Decompose {
        /// Edge length of a dense cube of voxels
        #[arg(short, long, conflicts_with = "coords", default_value = "32")]
        size: i32,

        /// File with one `x y z` coordinate per line
        #[arg(long)]
        coords: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a synthetic multi-device simulation on a dense cube
    Simulate {
        /// Edge length of the cube
        #[arg(short, long, default_value = "16")]
        size: i32,

        /// Timesteps to run
        #[arg(long, default_value = "10")]
        steps: u64,

        #[command(flatten)]
        engine: EngineArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Schedule { file, format } => schedule::execute(&file, format).await,

        Commands::Decompose {
            size,
            coords,
            engine,
            format,
        } => {
            let config = engine.resolve()?;
            let source = match coords {
                Some(path) => VoxelSource::File(path),
                None => VoxelSource::Cube(size),
            };
            decompose::execute(source, config.device_count, config.decomposition, format).await
        }

        Commands::Simulate {
            size,
            steps,
            engine,
            format,
        } => {
            let args = SimulateArgs {
                size,
                steps,
                config: engine.resolve()?,
                format,
            };
            simulate::execute(args).await
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voxelflow",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_engine_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "voxelflow",
            "simulate",
            "--devices",
            "4",
            "--thickness",
            "2",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        let Commands::Simulate { engine, steps, .. } = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(steps, 10);
        let config = engine.resolve().unwrap();
        assert_eq!(config.device_count, 4);
        assert_eq!(config.decomposition.halo_thickness, 2);
        assert_eq!(config.halo.transfer_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_engine_flags_are_rejected() {
        let cli = Cli::try_parse_from(["voxelflow", "decompose", "--devices", "0"]).unwrap();
        let Commands::Decompose { engine, .. } = cli.command else {
            panic!("expected decompose");
        };
        assert!(engine.resolve().is_err());
    }

    #[test]
    fn test_format_values() {
        let cli =
            Cli::try_parse_from(["voxelflow", "schedule", "units.toml", "--format", "dot"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Schedule {
                format: OutputFormat::Dot,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["voxelflow", "schedule", "u.toml", "-f", "yaml"]).is_err());
    }
}
