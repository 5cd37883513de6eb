//! CLI command implementations.

pub mod decompose;
pub mod schedule;
pub mod simulate;

use std::fs;
use std::path::Path;

use serde::Deserialize;
use voxelflow::graph::UnitSpec;
use voxelflow::VoxelCoord;

use crate::error::{CliError, CliResult};

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Colored human-readable report.
    Text,
    /// Pretty-printed JSON.
    Json,
    /// Graphviz DOT (graphs only).
    Dot,
}

/// Units file: a list of `[[unit]]` tables.
#[derive(Debug, Deserialize)]
struct UnitsFile {
    #[serde(default)]
    unit: Vec<UnitSpec>,
}

/// Parse unit declarations from TOML text.
pub fn parse_units(text: &str) -> CliResult<Vec<UnitSpec>> {
    let file: UnitsFile = toml::from_str(text)?;
    if file.unit.is_empty() {
        return Err(CliError::Parse("no [[unit]] tables found".to_string()));
    }
    Ok(file.unit)
}

/// Load unit declarations from a TOML file.
pub fn load_units(path: &Path) -> CliResult<Vec<UnitSpec>> {
    parse_units(&fs::read_to_string(path)?)
}

/// Parse voxel coordinates, one `x y z` triple per line.
///
/// Commas are accepted as separators; blank lines and `#` comments are
/// skipped.
pub fn parse_coords(text: &str) -> CliResult<Vec<VoxelCoord>> {
    let mut coords = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let values: Vec<i32> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|e| CliError::Parse(format!("line {}: {}", line_no + 1, e)))?;
        match values.as_slice() {
            [x, y, z] => coords.push(VoxelCoord::new(*x, *y, *z)),
            _ => {
                return Err(CliError::Parse(format!(
                    "line {}: expected 3 coordinates, found {}",
                    line_no + 1,
                    values.len()
                )))
            }
        }
    }
    Ok(coords)
}

/// Load voxel coordinates from a file.
pub fn load_coords(path: &Path) -> CliResult<Vec<VoxelCoord>> {
    parse_coords(&fs::read_to_string(path)?)
}
