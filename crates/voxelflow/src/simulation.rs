//! Execution orchestrator.
//!
//! A [`Simulation`] binds the dependency graph, the domain splitter and the
//! halo protocol to a set of device streams. Each timestep walks the
//! schedule; before a unit that reads neighbor data it runs a halo exchange
//! of every field the unit reads, then dispatches the unit on every device.
//!
//! The control thread blocks in two places only: waiting for halo read
//! counters before issuing a dependent dispatch, and waiting for every
//! stream to finish the step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use voxelflow_core::config::VoxelFlowConfig;
use voxelflow_core::device::{Command, CpuDevice, DeviceStream};
use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::field::{FieldHandle, FieldLayout, FieldRegistry, HostFieldRegistry};
use voxelflow_core::grid::GridProvider;
use voxelflow_core::timeline::TimelineCounter;
use voxelflow_core::types::{Aabb, DeviceId};
use voxelflow_domain::{analyze_balance, BalanceReport, DomainSplitter, SubDomain};
use voxelflow_graph::{DependencyGraph, GraphDescription, Schedule, UnitIndex, UnitSpec};
use voxelflow_halo::{HaloManager, HaloSynchronizer, StreamBarrier};

use crate::kernel::{DispatchContext, UnitKernel};

/// Outcome of one timestep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// Timestep number.
    pub step: u64,
    /// Unit dispatches across all devices.
    pub dispatches: usize,
    /// Halo exchanges performed.
    pub halo_exchanges: usize,
    /// Whether the decomposition was rebuilt before the step.
    pub rebuilt: bool,
    /// Wall time of the step.
    pub elapsed: Duration,
}

/// Builder for [`Simulation`].
#[derive(Default)]
pub struct SimulationBuilder {
    config: Option<VoxelFlowConfig>,
    devices: Option<Vec<Arc<dyn DeviceStream>>>,
    registry: Option<Arc<dyn FieldRegistry>>,
    grid: Option<Arc<dyn GridProvider>>,
    units: Vec<(UnitSpec, Option<Arc<dyn UnitKernel>>)>,
}

impl SimulationBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: VoxelFlowConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use existing device streams instead of CPU devices.
    ///
    /// Stream `i` must report `DeviceId(i)`.
    pub fn devices(mut self, devices: Vec<Arc<dyn DeviceStream>>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Set the field registry. Defaults to a host registry with one scalar
    /// field per referenced field name.
    pub fn registry(mut self, registry: Arc<dyn FieldRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the active voxel provider.
    pub fn grid(mut self, grid: Arc<dyn GridProvider>) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Register a unit with its kernel.
    pub fn unit(mut self, spec: UnitSpec, kernel: impl UnitKernel + 'static) -> Self {
        self.units.push((spec, Some(Arc::new(kernel))));
        self
    }

    /// Register a unit without computation. It still takes part in
    /// scheduling and halo exchange.
    pub fn declare(mut self, spec: UnitSpec) -> Self {
        self.units.push((spec, None));
        self
    }

    /// Validate the plan, decompose the grid and allocate halo buffers.
    ///
    /// Cycles, unknown fields and adjacency mismatches fail here, before
    /// anything runs.
    pub fn build(self) -> Result<Simulation> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let grid = self
            .grid
            .ok_or_else(|| VoxelError::InvalidConfig("a grid provider is required".to_string()))?;

        let mut graph = DependencyGraph::new();
        let mut kernels = HashMap::new();
        for (spec, kernel) in self.units {
            if let Some(kernel) = kernel {
                kernels.insert(spec.id.clone(), kernel);
            } else {
                kernels.remove(&spec.id);
            }
            graph.add_unit(spec);
        }
        graph.schedule()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let registry = HostFieldRegistry::new();
                for unit in graph.units() {
                    for field in unit.reads.iter().chain(&unit.writes) {
                        registry.register(field.clone(), FieldLayout::scalar())?;
                    }
                }
                Arc::new(registry) as Arc<dyn FieldRegistry>
            }
        };
        graph.validate_fields(registry.as_ref())?;

        let devices = match self.devices {
            Some(devices) => devices,
            None => CpuDevice::pool(config.device_count)?,
        };
        if devices.is_empty() {
            return Err(VoxelError::InvalidConfig("no devices".to_string()));
        }
        for (i, device) in devices.iter().enumerate() {
            if device.id() != DeviceId::from(i) {
                return Err(VoxelError::InvalidConfig(format!(
                    "stream {} reports {}",
                    i,
                    device.id()
                )));
            }
        }

        let thickness = config.decomposition.halo_thickness;
        for unit in graph.units() {
            if unit.neighbor_radius > thickness {
                warn!(
                    "Unit '{}' has radius {} but halos are {} layers thick",
                    unit.id, unit.neighbor_radius, thickness
                );
            }
        }

        let splitter = DomainSplitter::new(config.decomposition.clone());
        let generation = grid.generation();
        let subdomains = splitter.decompose(&grid.active_voxels(), devices.len())?;
        registry.allocate(&regions(&subdomains), thickness)?;

        let manager = Arc::new(HaloManager::with_subdomains(thickness, subdomains)?);
        let halo = HaloSynchronizer::new(
            manager,
            Arc::clone(&registry),
            devices.clone(),
            &config.halo,
        );

        let mut sim = Simulation {
            dispatch: dispatch_counters(devices.len()),
            config,
            devices,
            registry,
            grid,
            graph,
            kernels,
            splitter,
            halo,
            generation,
            step: 0,
            failure: None,
        };
        sim.register_halo_fields()?;

        info!(
            "Simulation ready: {} units, {} devices, {} sub-domains",
            sim.graph.len(),
            sim.devices.len(),
            sim.halo.manager().subdomains().len()
        );
        Ok(sim)
    }
}

/// A multi-device voxel simulation.
pub struct Simulation {
    config: VoxelFlowConfig,
    devices: Vec<Arc<dyn DeviceStream>>,
    registry: Arc<dyn FieldRegistry>,
    grid: Arc<dyn GridProvider>,
    graph: DependencyGraph,
    kernels: HashMap<String, Arc<dyn UnitKernel>>,
    splitter: DomainSplitter,
    halo: HaloSynchronizer,
    /// Per-device counter signalled by every dispatch, in stream order.
    dispatch: Vec<Arc<TimelineCounter>>,
    generation: u64,
    step: u64,
    failure: Option<String>,
}

/// Per-device bookkeeping while a step is being recorded.
#[derive(Default)]
struct StreamCursor {
    issued: u64,
    unit_values: HashMap<UnitIndex, u64>,
    field_writers: HashMap<String, u64>,
}

impl Simulation {
    /// Create a builder.
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Configuration in use.
    pub fn config(&self) -> &VoxelFlowConfig {
        &self.config
    }

    /// Device streams.
    pub fn devices(&self) -> &[Arc<dyn DeviceStream>] {
        &self.devices
    }

    /// Field registry.
    pub fn registry(&self) -> &Arc<dyn FieldRegistry> {
        &self.registry
    }

    /// Halo synchronizer.
    pub fn halo(&self) -> &HaloSynchronizer {
        &self.halo
    }

    /// Dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of steps started so far.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Current decomposition.
    pub fn decomposition(&self) -> Arc<Vec<SubDomain>> {
        self.halo.manager().subdomains()
    }

    /// Load statistics of the current decomposition.
    pub fn balance(&self) -> BalanceReport {
        analyze_balance(&self.decomposition())
    }

    /// Unit identifiers in execution order.
    pub fn execution_schedule(&self) -> Result<Vec<String>> {
        Ok(self.graph.execution_order()?)
    }

    /// Graph description for diagnostics.
    pub fn export_graph(&self) -> GraphDescription {
        self.graph.to_visualizable()
    }

    /// Check if a failed step is waiting for [`Simulation::recover`].
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Register or replace a unit.
    ///
    /// The fields must exist in the registry; the schedule is rebuilt on
    /// the next step.
    pub fn add_unit(&mut self, spec: UnitSpec, kernel: impl UnitKernel + 'static) -> Result<()> {
        for field in spec.reads.iter().chain(&spec.writes) {
            if !self.registry.contains(field) {
                return Err(VoxelError::UnknownField {
                    unit: spec.id.clone(),
                    field: field.clone(),
                });
            }
        }
        self.kernels.insert(spec.id.clone(), Arc::new(kernel));
        self.graph.add_unit(spec);
        self.register_halo_fields()
    }

    /// Exchange halos of one field outside the step loop. Returns the epoch.
    pub fn step_halo_exchange(&self, field: &str) -> Result<u64> {
        self.halo.step_halo_exchange(field)
    }

    fn register_halo_fields(&self) -> Result<()> {
        let manager = self.halo.manager();
        for unit in self.graph.units().iter().filter(|u| u.requires_halo()) {
            for field in &unit.reads {
                manager.register_field(field, self.registry.as_ref())?;
            }
        }
        Ok(())
    }

    /// Re-decompose when the grid's active set changed. Returns whether it did.
    fn refresh_topology(&mut self) -> Result<bool> {
        let generation = self.grid.generation();
        if generation == self.generation {
            return Ok(false);
        }

        let subdomains = self
            .splitter
            .decompose(&self.grid.active_voxels(), self.devices.len())?;
        self.registry
            .allocate(&regions(&subdomains), self.config.decomposition.halo_thickness)?;
        self.halo.manager().rebuild(subdomains)?;
        self.generation = generation;
        info!("Topology changed (generation {}), domain rebuilt", generation);
        Ok(true)
    }

    /// Run one timestep.
    ///
    /// On failure the step is abandoned and the simulation refuses further
    /// steps until [`Simulation::recover`] is called.
    pub fn step(&mut self) -> Result<StepReport> {
        if let Some(reason) = &self.failure {
            return Err(VoxelError::InvalidConfig(format!(
                "simulation failed earlier and needs recovery: {}",
                reason
            )));
        }

        let started_at = self.step;
        let result = self.run_step();
        if let Err(e) = &result {
            // Errors raised before the first submit leave the streams clean.
            if self.step != started_at || e.is_step_fatal() {
                warn!("Step {} abandoned: {}", self.step, e);
                self.failure = Some(e.to_string());
            }
        }
        result
    }

    /// Run `steps` timesteps, stopping at the first failure.
    pub fn run(&mut self, steps: u64) -> Result<Vec<StepReport>> {
        (0..steps).map(|_| self.step()).collect()
    }

    fn run_step(&mut self) -> Result<StepReport> {
        let started = Instant::now();
        let rebuilt = self.refresh_topology()?;
        let schedule = self.graph.schedule()?;
        self.step += 1;
        let step = self.step;

        let subdomains = self.decomposition();
        let mut cursors: Vec<StreamCursor> =
            (0..self.devices.len()).map(|_| StreamCursor::default()).collect();
        for (p, cursor) in cursors.iter_mut().enumerate() {
            cursor.issued = self.dispatch[p].value();
        }

        let mut dispatches = 0;
        let mut halo_exchanges = 0;
        for (idx, unit) in schedule.iter() {
            for field in schedule.halo_fields(idx) {
                self.exchange(field, &subdomains, &cursors)?;
                halo_exchanges += 1;
            }

            let kernel = self.kernels.get(&unit.id).cloned();
            for (pos, sd) in subdomains.iter().enumerate() {
                let p = sd.device.index();
                let stream = self
                    .devices
                    .get(p)
                    .ok_or(VoxelError::UnknownDevice(sd.device))?;
                let cursor = &mut cursors[p];

                // Predecessors signalled lower values on the same counter.
                let wait_for = schedule
                    .predecessors(idx)
                    .iter()
                    .filter_map(|pred| cursor.unit_values.get(pred).copied())
                    .max()
                    .unwrap_or(0);
                cursor.issued += 1;
                let value = cursor.issued;

                stream.submit(self.dispatch_command(
                    &schedule,
                    idx,
                    &subdomains,
                    pos,
                    kernel.clone(),
                    wait_for,
                    value,
                    step,
                ))?;

                cursor.unit_values.insert(idx, value);
                for field in &unit.writes {
                    cursor.field_writers.insert(field.clone(), value);
                }
                dispatches += 1;
            }
        }

        self.synchronize_all()?;
        self.registry.swap_buffers();

        let report = StepReport {
            step,
            dispatches,
            halo_exchanges,
            rebuilt,
            elapsed: started.elapsed(),
        };
        debug!(
            "Step {}: {} dispatches, {} halo exchanges in {:?}",
            step, report.dispatches, report.halo_exchanges, report.elapsed
        );
        Ok(report)
    }

    /// Exchange `field` after its last writers on every device, then gate
    /// each stream on the exchange.
    fn exchange(&self, field: &str, subdomains: &[SubDomain], cursors: &[StreamCursor]) -> Result<()> {
        let barriers: HashMap<DeviceId, StreamBarrier> = subdomains
            .iter()
            .filter_map(|sd| {
                let p = sd.device.index();
                let value = *cursors.get(p)?.field_writers.get(field)?;
                Some((
                    sd.device,
                    StreamBarrier {
                        counter: Arc::clone(&self.dispatch[p]),
                        value,
                    },
                ))
            })
            .collect();

        let ticket = self.halo.submit_exchange_after(field, &barriers)?;
        self.halo.wait(&ticket)?;
        for sd in subdomains {
            self.halo.submit_gate(&ticket, sd.device)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_command(
        &self,
        schedule: &Arc<Schedule>,
        idx: UnitIndex,
        subdomains: &Arc<Vec<SubDomain>>,
        pos: usize,
        kernel: Option<Arc<dyn UnitKernel>>,
        wait_for: u64,
        value: u64,
        step: u64,
    ) -> Command {
        let device = subdomains[pos].device;
        let counter = Arc::clone(&self.dispatch[device.index()]);
        let abort_counter = Arc::clone(&counter);
        let schedule = Arc::clone(schedule);
        let subdomains = Arc::clone(subdomains);
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.halo.transfer_timeout();
        let label = schedule
            .unit(idx)
            .map(|u| format!("dispatch {} {} step {}", u.id, device, step))
            .unwrap_or_default();

        Command::new(label, move || {
            counter.wait(wait_for, timeout)?;
            if let Some(kernel) = kernel {
                let unit = schedule
                    .unit(idx)
                    .ok_or_else(|| VoxelError::UnknownUnit(format!("#{}", idx.get())))?;
                // In-place fields read the values from before this unit.
                let pinned: Vec<FieldHandle> = unit
                    .in_place_fields()
                    .filter_map(|field| registry.block(field, device))
                    .collect();
                for block in &pinned {
                    block.write().pin_reads();
                }
                let ctx = DispatchContext::new(unit, &subdomains[pos], registry.as_ref(), step);
                let result = kernel.dispatch(&ctx);
                for block in &pinned {
                    block.write().unpin_reads();
                }
                result?;
            }
            counter.signal(value)
        })
        .on_abort(move |err| {
            abort_counter.poison(err.to_string());
            err
        })
    }

    /// Wait for every stream. A halo transfer error wins over the errors it
    /// caused downstream.
    fn synchronize_all(&self) -> Result<()> {
        let timeout = self.config.halo.transfer_timeout();
        let mut errors: Vec<VoxelError> = self
            .devices
            .iter()
            .filter_map(|d| d.synchronize(timeout).err())
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        let pos = errors
            .iter()
            .position(|e| matches!(e, VoxelError::HaloTransfer { .. }))
            .unwrap_or(0);
        Err(errors.swap_remove(pos))
    }

    /// Clear a failed step: drain and reset the streams, and restart every
    /// counter. Field contents of the abandoned step are not rolled back.
    pub fn recover(&mut self) -> Result<()> {
        let timeout = self.config.halo.transfer_timeout();
        for device in &self.devices {
            if let Err(e) = device.synchronize(timeout) {
                debug!("Draining {}: {}", device.id(), e);
            }
            device.clear_fault();
        }
        self.dispatch = dispatch_counters(self.devices.len());
        let manager = self.halo.manager();
        manager.rebuild(manager.subdomains().as_ref().clone())?;
        if let Some(reason) = self.failure.take() {
            info!("Recovered from failed step: {}", reason);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("units", &self.graph.len())
            .field("devices", &self.devices.len())
            .field("step", &self.step)
            .field("failure", &self.failure)
            .finish()
    }
}

fn regions(subdomains: &[SubDomain]) -> Vec<(DeviceId, Aabb)> {
    subdomains.iter().map(|s| (s.device, s.bounds)).collect()
}

fn dispatch_counters(count: usize) -> Vec<Arc<TimelineCounter>> {
    (0..count)
        .map(|i| Arc::new(TimelineCounter::new(format!("{} dispatch", DeviceId::from(i)))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voxelflow_core::grid::StaticGrid;

    fn config(devices: usize) -> VoxelFlowConfig {
        VoxelFlowConfig::builder()
            .device_count(devices)
            .halo_thickness(1)
            .transfer_timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_grid() {
        assert!(matches!(
            Simulation::builder().build(),
            Err(VoxelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cycle_fails_before_running() {
        let result = Simulation::builder()
            .config(config(2))
            .grid(Arc::new(StaticGrid::cube(4)))
            .declare(UnitSpec::new("a").reads(["y"]).writes(["x"]))
            .declare(UnitSpec::new("b").reads(["x"]).writes(["y"]))
            .build();
        assert!(matches!(result, Err(VoxelError::Cycle(_))));
    }

    #[test]
    fn test_unknown_field_with_explicit_registry() {
        let registry = Arc::new(HostFieldRegistry::with_scalar_fields(["phi"]));
        let result = Simulation::builder()
            .config(config(1))
            .grid(Arc::new(StaticGrid::cube(4)))
            .registry(registry)
            .declare(UnitSpec::new("a").reads(["phi", "rho"]))
            .build();
        assert!(matches!(result, Err(VoxelError::UnknownField { .. })));
    }

    #[test]
    fn test_dispatch_order_and_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut sim = Simulation::builder()
            .config(config(2))
            .grid(Arc::new(StaticGrid::cube(4)))
            .declare(UnitSpec::new("init").writes(["phi"]))
            .unit(
                UnitSpec::new("smooth").reads(["phi"]).writes(["psi"]).with_neighbor_radius(1),
                move |_: &DispatchContext<'_>| -> Result<()> {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .build()
            .unwrap();

        assert_eq!(sim.execution_schedule().unwrap(), vec!["init", "smooth"]);
        let report = sim.step().unwrap();
        assert_eq!(report.step, 1);
        assert_eq!(report.dispatches, 4);
        assert_eq!(report.halo_exchanges, 1);
        assert!(!report.rebuilt);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_add_unit_checks_fields() {
        let mut sim = Simulation::builder()
            .config(config(1))
            .grid(Arc::new(StaticGrid::cube(2)))
            .declare(UnitSpec::new("a").writes(["phi"]))
            .build()
            .unwrap();
        let noop = |_: &DispatchContext<'_>| -> Result<()> { Ok(()) };
        assert!(sim
            .add_unit(UnitSpec::new("b").reads(["rho"]), noop)
            .is_err());
        sim.add_unit(UnitSpec::new("b").reads(["phi"]).with_neighbor_radius(1), noop)
            .unwrap();
        assert_eq!(sim.execution_schedule().unwrap(), vec!["a", "b"]);
        assert!(sim.halo().manager().is_registered("phi"));
    }
}
