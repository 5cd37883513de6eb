//! Domain decomposition.
//!
//! The active voxel set is sorted along a Morton curve and cut into
//! contiguous runs of near-equal size, one per device. With spatial locality
//! enabled each cut may move a little inside a window around its ideal
//! position, to the spot where consecutive Morton keys differ in the highest
//! bit. Such cuts fall on octree cell boundaries, which keeps sub-domains
//! compact and their shared faces small.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use voxelflow_core::config::DecompositionConfig;
use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::types::{Aabb, DeviceId, VoxelCoord};

use crate::balance::analyze_balance;
use crate::morton::{highest_differing_bit, morton_keys};
use crate::neighbors::compute_neighbors;
use crate::subdomain::SubDomain;

/// Partitions active voxels across devices.
#[derive(Debug, Clone, Default)]
pub struct DomainSplitter {
    config: DecompositionConfig,
}

impl DomainSplitter {
    /// Create a splitter.
    pub fn new(config: DecompositionConfig) -> Self {
        Self { config }
    }

    /// Splitter configuration.
    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Split `coords` into at most `device_count` sub-domains.
    ///
    /// Every distinct coordinate ends up in exactly one sub-domain. An empty
    /// input yields no sub-domains; fewer distinct coordinates than devices
    /// yields one sub-domain per coordinate.
    pub fn decompose(&self, coords: &[VoxelCoord], device_count: usize) -> Result<Vec<SubDomain>> {
        if device_count == 0 {
            return Err(VoxelError::InvalidConfig(
                "device_count must be at least 1".to_string(),
            ));
        }
        self.config.validate()?;

        let ordered = if self.config.prefer_spatial_locality {
            morton_order(coords)
        } else {
            input_order(coords)
        };
        let voxels: Vec<VoxelCoord> = ordered.iter().map(|&(_, c)| c).collect();
        if voxels.is_empty() {
            debug!("Empty voxel set, no sub-domains");
            return Ok(Vec::new());
        }

        let parts = device_count.min(voxels.len());
        let mut cuts = ideal_cuts(voxels.len(), parts);
        if self.config.prefer_spatial_locality {
            let keys: Vec<u64> = ordered.iter().map(|&(k, _)| k).collect();
            align_cuts(&mut cuts, &keys, self.config.load_balance_tolerance);
        }

        let mut subdomains = Vec::with_capacity(parts);
        let mut start = 0;
        for (device, end) in cuts
            .iter()
            .copied()
            .chain(std::iter::once(voxels.len()))
            .enumerate()
        {
            if let Some(sd) =
                SubDomain::from_voxels(DeviceId::from(device), voxels[start..end].to_vec())
            {
                subdomains.push(sd);
            }
            start = end;
        }

        compute_neighbors(&mut subdomains)?;

        let report = analyze_balance(&subdomains);
        if let Some(warning) = report.check(self.config.load_balance_tolerance) {
            warn!("{}", warning);
        }
        info!(
            "Decomposed {} voxels into {} sub-domains (imbalance {:.3})",
            voxels.len(),
            subdomains.len(),
            report.imbalance_factor
        );

        Ok(subdomains)
    }
}

/// Decompose with a one-off splitter.
pub fn decompose(
    coords: &[VoxelCoord],
    device_count: usize,
    config: &DecompositionConfig,
) -> Result<Vec<SubDomain>> {
    DomainSplitter::new(config.clone()).decompose(coords, device_count)
}

/// Distinct coordinates sorted by `(morton key, coordinate)`.
fn morton_order(coords: &[VoxelCoord]) -> Vec<(u64, VoxelCoord)> {
    let Some(bounds) = Aabb::from_coords(coords) else {
        return Vec::new();
    };
    let keys = morton_keys(coords, bounds.min);
    let mut ordered: Vec<(u64, VoxelCoord)> =
        keys.into_iter().zip(coords.iter().copied()).collect();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

/// Distinct coordinates in first-occurrence order. Keys are unused.
fn input_order(coords: &[VoxelCoord]) -> Vec<(u64, VoxelCoord)> {
    let mut seen = HashSet::with_capacity(coords.len());
    coords
        .iter()
        .filter(|c| seen.insert(**c))
        .map(|&c| (0, c))
        .collect()
}

/// Cut positions splitting `n` items into `parts` near-equal runs.
///
/// The first `n % parts` runs get one extra item.
fn ideal_cuts(n: usize, parts: usize) -> Vec<usize> {
    let base = n / parts;
    let rem = n % parts;
    let mut cuts = Vec::with_capacity(parts.saturating_sub(1));
    let mut cursor = 0;
    for part in 0..parts.saturating_sub(1) {
        cursor += base + usize::from(part < rem);
        cuts.push(cursor);
    }
    cuts
}

/// Move each cut inside its window to the highest-order Morton boundary.
///
/// A cut at position `p` separates `keys[p - 1]` from `keys[p]`. The window
/// is `floor(tolerance * mean / 2)` positions either side, narrowed so that
/// every run keeps at least one item. Ties go to the position nearest the
/// ideal cut, then the lower one.
fn align_cuts(cuts: &mut [usize], keys: &[u64], tolerance: f64) {
    let n = keys.len();
    let parts = cuts.len() + 1;
    let mean = n as f64 / parts as f64;
    let window = (tolerance * mean / 2.0).floor() as usize;
    if window == 0 {
        return;
    }

    let mut prev = 0;
    for k in 0..cuts.len() {
        let ideal = cuts[k];
        let runs_after = parts - (k + 1);
        let lo = ideal.saturating_sub(window).max(prev + 1);
        let hi = (ideal + window).min(n - runs_after);

        let mut best = ideal;
        let mut best_score = (score(keys, ideal), 0usize);
        for p in lo..=hi {
            let candidate = (score(keys, p), ideal.abs_diff(p));
            let better = candidate.0 > best_score.0
                || (candidate.0 == best_score.0 && candidate.1 < best_score.1);
            if better {
                best = p;
                best_score = candidate;
            }
        }
        cuts[k] = best;
        prev = best;
    }
}

/// Highest differing bit across a cut, or -1 for identical keys.
fn score(keys: &[u64], cut: usize) -> i32 {
    highest_differing_bit(keys[cut - 1], keys[cut])
        .map(|b| b as i32)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxelflow_core::types::Face;

    fn cube(n: i32) -> Vec<VoxelCoord> {
        let mut v = Vec::new();
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    v.push(VoxelCoord::new(x, y, z));
                }
            }
        }
        v
    }

    fn splitter() -> DomainSplitter {
        DomainSplitter::new(DecompositionConfig::default())
    }

    #[test]
    fn test_ideal_cuts() {
        assert_eq!(ideal_cuts(10, 3), vec![4, 7]);
        assert_eq!(ideal_cuts(9, 3), vec![3, 6]);
        assert!(ideal_cuts(5, 1).is_empty());
    }

    #[test]
    fn test_cube_two_devices_splits_on_z() {
        let subs = splitter().decompose(&cube(8), 2).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].voxel_count, 256);
        assert_eq!(subs[1].voxel_count, 256);
        assert_eq!(subs[0].bounds.max, VoxelCoord::new(7, 7, 3));
        assert_eq!(subs[1].bounds.min, VoxelCoord::new(0, 0, 4));
        assert_eq!(subs[0].neighbors_on(Face::PosZ).collect::<Vec<_>>(), vec![DeviceId(1)]);
        assert_eq!(subs[1].neighbors_on(Face::NegZ).collect::<Vec<_>>(), vec![DeviceId(0)]);
    }

    #[test]
    fn test_cube_eight_devices_are_octants() {
        let subs = splitter().decompose(&cube(8), 8).unwrap();
        assert_eq!(subs.len(), 8);
        for sd in &subs {
            assert_eq!(sd.voxel_count, 64);
            assert_eq!(sd.bounds.dims(), [4, 4, 4]);
            assert_eq!(sd.neighbors.len(), 3);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(splitter().decompose(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn test_fewer_voxels_than_devices() {
        let coords = [
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(1, 0, 0),
            VoxelCoord::new(1, 0, 0),
        ];
        let subs = splitter().decompose(&coords, 4).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.voxel_count == 1));
        assert_eq!(subs[0].neighbors_on(Face::PosX).count(), 1);
    }

    #[test]
    fn test_zero_devices_rejected() {
        assert!(matches!(
            splitter().decompose(&cube(2), 0),
            Err(VoxelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_input_order_without_locality() {
        let config = DecompositionConfig::default().with_spatial_locality(false);
        let coords = vec![
            VoxelCoord::new(9, 0, 0),
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(9, 0, 0),
            VoxelCoord::new(5, 0, 0),
        ];
        let subs = decompose(&coords, 2, &config).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].voxel_count, 2);
        assert!(subs[0].owns(VoxelCoord::new(9, 0, 0)));
        assert!(subs[0].owns(VoxelCoord::new(0, 0, 0)));
        assert!(subs[1].owns(VoxelCoord::new(5, 0, 0)));
    }

    #[test]
    fn test_cut_moves_to_octree_boundary() {
        // A 2^3 block plus one voxel. The ideal 2-way cut at 5 sits inside
        // the z = 1 layer; the window lets it move back to the layer
        // boundary at 4, the highest-order Morton boundary in reach.
        let mut coords = cube(2);
        coords.push(VoxelCoord::new(2, 0, 0));
        let config = DecompositionConfig::default().with_load_balance_tolerance(1.0);
        let subs = decompose(&coords, 2, &config).unwrap();
        assert_eq!(subs[0].voxel_count, 4);
        assert_eq!(subs[0].bounds.max.z, 0);
        assert_eq!(subs[1].voxel_count, 5);

        // Zero tolerance keeps the ideal cut.
        let strict = DecompositionConfig::default().with_load_balance_tolerance(0.0);
        let subs = decompose(&coords, 2, &strict).unwrap();
        assert_eq!(subs[0].voxel_count, 5);
    }
}
