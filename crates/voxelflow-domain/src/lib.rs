//! Spatial domain decomposition for VoxelFlow.
//!
//! This crate partitions a sparse set of active voxels across devices:
//!
//! - **Morton order**: 21-bit-per-axis Z-order keys, computed in parallel
//! - **Splitter**: contiguous Morton runs with octree-aligned cut points
//! - **Neighbors**: per-face adjacency from voxel contact
//! - **Balance**: voxel count statistics and imbalance warnings
//!
//! # Example
//!
//! ```
//! use voxelflow_core::{DecompositionConfig, Face, VoxelCoord};
//! use voxelflow_domain::decompose;
//!
//! let coords: Vec<VoxelCoord> = (0..4)
//!     .flat_map(|z| (0..4).flat_map(move |y| (0..4).map(move |x| VoxelCoord::new(x, y, z))))
//!     .collect();
//!
//! let subs = decompose(&coords, 2, &DecompositionConfig::default()).unwrap();
//! assert_eq!(subs.len(), 2);
//! assert!(subs[0].has_neighbor_on(Face::PosZ));
//! ```

#![warn(missing_docs)]

pub mod balance;
pub mod morton;
pub mod neighbors;
pub mod splitter;
pub mod subdomain;

pub use balance::{analyze_balance, BalanceReport, ImbalanceWarning};
pub use morton::{morton_decode, morton_encode, morton_keys};
pub use neighbors::{compute_neighbors, owner_map, validate_adjacency};
pub use splitter::{decompose, DomainSplitter};
pub use subdomain::{Neighbor, SubDomain, VoxelRun};
