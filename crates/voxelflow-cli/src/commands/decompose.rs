//! `voxelflow decompose` command - Split a voxel set across devices.

use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use voxelflow::domain::{analyze_balance, BalanceReport, SubDomain};
use voxelflow::{decompose_domain, DecompositionConfig, GridProvider, StaticGrid, VoxelCoord};

use crate::error::{CliError, CliResult};

use super::{load_coords, OutputFormat};

/// Where the voxels come from.
#[derive(Debug, Clone)]
pub enum VoxelSource {
    /// Dense cube of the given edge length.
    Cube(i32),
    /// Coordinates file.
    File(String),
}

impl VoxelSource {
    fn load(&self) -> CliResult<Vec<VoxelCoord>> {
        match self {
            VoxelSource::Cube(size) if *size <= 0 => Err(CliError::InvalidArgument(format!(
                "cube size must be positive, got {}",
                size
            ))),
            VoxelSource::Cube(size) => Ok(StaticGrid::cube(*size).active_voxels()),
            VoxelSource::File(path) => load_coords(Path::new(path)),
        }
    }
}

#[derive(Serialize)]
struct DecompositionReport<'a> {
    voxels: usize,
    subdomains: &'a [SubDomain],
    balance: &'a BalanceReport,
}

/// Execute the `decompose` command.
pub async fn execute(
    source: VoxelSource,
    devices: usize,
    config: DecompositionConfig,
    format: OutputFormat,
) -> CliResult<()> {
    let coords = source.load()?;
    let subdomains = decompose_domain(&coords, devices, &config)?;
    let balance = analyze_balance(&subdomains);

    match format {
        OutputFormat::Json => {
            let report = DecompositionReport {
                voxels: coords.len(),
                subdomains: &subdomains,
                balance: &balance,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        OutputFormat::Dot => {
            return Err(CliError::InvalidArgument(
                "dot output is only available for schedules".to_string(),
            ))
        }
        OutputFormat::Text => {}
    }

    println!(
        "{} Decomposing {} voxel(s) over {} device(s)",
        "→".bright_cyan(),
        coords.len().to_string().bright_white(),
        devices.to_string().bright_white()
    );
    println!();

    println!("{}:", "Sub-domains".bright_white().underline());
    for sd in &subdomains {
        let neighbors: Vec<String> = sd
            .neighbors
            .iter()
            .map(|n| format!("{} {}", n.face, n.device.0))
            .collect();
        println!(
            "  {} {:>8} voxels  {}",
            format!("{}:", sd.device).bright_white(),
            sd.voxel_count,
            sd.bounds.to_string().dimmed()
        );
        if !neighbors.is_empty() {
            println!("      {} {}", "neighbors".dimmed(), neighbors.join(", "));
        }
    }
    println!();

    println!("{}:", "Load Balance".bright_white().underline());
    println!(
        "  min {}  max {}  mean {:.1}  std-dev {:.2}",
        balance.min, balance.max, balance.average, balance.std_dev
    );
    let status = match balance.check(config.load_balance_tolerance) {
        Some(warning) => format!("⚠ {}", warning).yellow(),
        None => format!("✓ imbalance factor {:.3}", balance.imbalance_factor).bright_green(),
    };
    println!("  {}", status);

    Ok(())
}
