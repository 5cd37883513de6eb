//! `voxelflow schedule` command - Print the execution order of a unit set.

use std::path::Path;

use colored::Colorize;
use voxelflow::graph::DependencyGraph;

use crate::error::{CliError, CliResult};

use super::{load_units, OutputFormat};

/// Execute the `schedule` command.
pub async fn execute(file: &str, format: OutputFormat) -> CliResult<()> {
    let units = load_units(Path::new(file))?;
    let graph = DependencyGraph::from_units(units);
    tracing::debug!("Loaded {} units from {}", graph.len(), file);

    match format {
        OutputFormat::Json => {
            println!("{}", graph.to_visualizable().to_json()?);
            return Ok(());
        }
        OutputFormat::Dot => {
            println!("{}", graph.to_visualizable().to_dot());
            return Ok(());
        }
        OutputFormat::Text => {}
    }

    println!("{} Scheduling {} unit(s)", "→".bright_cyan(), graph.len());
    println!("  {} File: {}", "•".dimmed(), file.bright_yellow());
    println!();

    let schedule = graph.schedule().map_err(CliError::from)?;

    println!("{}:", "Execution Order".bright_white().underline());
    for (position, (index, unit)) in schedule.iter().enumerate() {
        let halo = schedule.halo_fields(index);
        let marker = if halo.is_empty() {
            String::new()
        } else {
            format!(" [halo: {}]", halo.join(", ")).bright_magenta().to_string()
        };
        let preds: Vec<&str> = schedule
            .predecessors(index)
            .iter()
            .filter_map(|&p| schedule.unit(p).map(|u| u.id.as_str()))
            .collect();
        let after = if preds.is_empty() {
            String::new()
        } else {
            format!(" after {}", preds.join(", ")).dimmed().to_string()
        };
        println!(
            "  {:>3}. {}{}{}",
            position + 1,
            unit.id.bright_white(),
            marker,
            after
        );
    }

    let conflicts = graph.conflicting_writers();
    if !conflicts.is_empty() {
        println!();
        for conflict in conflicts {
            println!(
                "{} field '{}' has several writers ({}); they run in registration order",
                "Warning:".yellow(),
                conflict.field,
                conflict.writers.join(", ")
            );
        }
    }

    Ok(())
}
