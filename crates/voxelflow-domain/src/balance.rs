//! Load-balance analysis.

use std::fmt;

use serde::{Deserialize, Serialize};

use voxelflow_core::types::DeviceId;

use crate::subdomain::SubDomain;

/// Voxel count statistics across sub-domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// Number of sub-domains.
    pub subdomains: usize,
    /// Smallest voxel count.
    pub min: usize,
    /// Largest voxel count.
    pub max: usize,
    /// Mean voxel count.
    pub average: f64,
    /// Population standard deviation of voxel counts.
    pub std_dev: f64,
    /// `max / average`; 1.0 is perfect balance.
    pub imbalance_factor: f64,
    /// Device holding the most voxels.
    pub heaviest: Option<DeviceId>,
}

/// Imbalance beyond the configured tolerance.
///
/// Reported, never raised as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceWarning {
    /// Measured `max / average`.
    pub imbalance_factor: f64,
    /// Tolerance it was checked against.
    pub tolerance: f64,
    /// Device holding the most voxels.
    pub heaviest: Option<DeviceId>,
}

impl fmt::Display for ImbalanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "load imbalance {:.3} exceeds tolerance {:.3}",
            self.imbalance_factor,
            1.0 + self.tolerance
        )?;
        if let Some(device) = self.heaviest {
            write!(f, " (heaviest: {})", device)?;
        }
        Ok(())
    }
}

impl BalanceReport {
    /// Compare against `1 + tolerance`.
    pub fn check(&self, tolerance: f64) -> Option<ImbalanceWarning> {
        (self.imbalance_factor > 1.0 + tolerance).then(|| ImbalanceWarning {
            imbalance_factor: self.imbalance_factor,
            tolerance,
            heaviest: self.heaviest,
        })
    }
}

/// Compute balance statistics. An empty slice reports perfect balance.
pub fn analyze_balance(subdomains: &[SubDomain]) -> BalanceReport {
    if subdomains.is_empty() {
        return BalanceReport {
            subdomains: 0,
            min: 0,
            max: 0,
            average: 0.0,
            std_dev: 0.0,
            imbalance_factor: 1.0,
            heaviest: None,
        };
    }

    let counts: Vec<usize> = subdomains.iter().map(|s| s.voxel_count).collect();
    let n = counts.len() as f64;
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    let average = counts.iter().sum::<usize>() as f64 / n;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - average;
            d * d
        })
        .sum::<f64>()
        / n;
    let imbalance_factor = if average > 0.0 {
        max as f64 / average
    } else {
        1.0
    };
    let heaviest = subdomains
        .iter()
        .find(|s| s.voxel_count == max)
        .map(|s| s.device);

    BalanceReport {
        subdomains: subdomains.len(),
        min,
        max,
        average,
        std_dev: variance.sqrt(),
        imbalance_factor,
        heaviest,
    }
}
