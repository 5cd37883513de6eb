//! Configuration for decomposition, halo exchange and device count.
//!
//! Configuration can be built programmatically with [`ConfigBuilder`] or
//! loaded from TOML:
//!
//! ```
//! use voxelflow_core::config::VoxelFlowConfig;
//!
//! let config = VoxelFlowConfig::from_toml_str(
//!     r#"
//!     device_count = 4
//!
//!     [decomposition]
//!     halo_thickness = 1
//!
//!     [halo]
//!     transfer_timeout_ms = 250
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.device_count, 4);
//! assert_eq!(config.decomposition.halo_thickness, 1);
//! assert!(config.decomposition.prefer_spatial_locality);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxelError};

/// Default halo thickness in voxel layers.
pub const DEFAULT_HALO_THICKNESS: u32 = 2;

/// Default allowed deviation from the mean voxel count per sub-domain.
pub const DEFAULT_LOAD_BALANCE_TOLERANCE: f64 = 0.1;

/// Default timeout for halo transfers and step synchronisation.
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 5000;

/// Domain decomposition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Ghost layers exchanged per face (≥ 1).
    pub halo_thickness: u32,
    /// Allowed fraction of the mean count by which sub-domains may differ.
    pub load_balance_tolerance: f64,
    /// Shift split points towards octree-aligned Morton boundaries.
    pub prefer_spatial_locality: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            halo_thickness: DEFAULT_HALO_THICKNESS,
            load_balance_tolerance: DEFAULT_LOAD_BALANCE_TOLERANCE,
            prefer_spatial_locality: true,
        }
    }
}

impl DecompositionConfig {
    /// Set halo thickness.
    pub fn with_halo_thickness(mut self, thickness: u32) -> Self {
        self.halo_thickness = thickness;
        self
    }

    /// Set load balance tolerance.
    pub fn with_load_balance_tolerance(mut self, tolerance: f64) -> Self {
        self.load_balance_tolerance = tolerance;
        self
    }

    /// Enable or disable Morton-aligned split points.
    pub fn with_spatial_locality(mut self, enable: bool) -> Self {
        self.prefer_spatial_locality = enable;
        self
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.halo_thickness < 1 {
            return Err(VoxelError::InvalidConfig(
                "halo_thickness must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.load_balance_tolerance) {
            return Err(VoxelError::InvalidConfig(format!(
                "load_balance_tolerance must be within [0, 1], got {}",
                self.load_balance_tolerance
            )));
        }
        Ok(())
    }
}

/// Halo exchange settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    /// Timeout for each transfer / counter wait in milliseconds.
    pub transfer_timeout_ms: u64,
}

impl Default for HaloConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
        }
    }
}

impl HaloConfig {
    /// Transfer timeout as a duration.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.transfer_timeout_ms == 0 {
            return Err(VoxelError::InvalidConfig(
                "transfer_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelFlowConfig {
    /// Number of compute devices (≥ 1).
    pub device_count: usize,
    /// Decomposition settings.
    pub decomposition: DecompositionConfig,
    /// Halo exchange settings.
    pub halo: HaloConfig,
}

impl Default for VoxelFlowConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            decomposition: DecompositionConfig::default(),
            halo: HaloConfig::default(),
        }
    }
}

impl VoxelFlowConfig {
    /// Create a builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        if self.device_count < 1 {
            return Err(VoxelError::InvalidConfig(
                "device_count must be at least 1".to_string(),
            ));
        }
        self.decomposition.validate()?;
        self.halo.validate()?;
        Ok(())
    }
}

/// Builder for [`VoxelFlowConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: VoxelFlowConfig,
}

impl ConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set device count.
    pub fn device_count(mut self, count: usize) -> Self {
        self.config.device_count = count;
        self
    }

    /// Set halo thickness.
    pub fn halo_thickness(mut self, thickness: u32) -> Self {
        self.config.decomposition.halo_thickness = thickness;
        self
    }

    /// Set load balance tolerance.
    pub fn load_balance_tolerance(mut self, tolerance: f64) -> Self {
        self.config.decomposition.load_balance_tolerance = tolerance;
        self
    }

    /// Enable or disable Morton-aligned split points.
    pub fn prefer_spatial_locality(mut self, enable: bool) -> Self {
        self.config.decomposition.prefer_spatial_locality = enable;
        self
    }

    /// Set transfer timeout.
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.halo.transfer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<VoxelFlowConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
