//! End-to-end tests for the orchestrator.
//!
//! A writer unit stores the step number into `phi` on every owned voxel. A
//! reader with neighbor radius 1 checks that every face neighbor owned by
//! another device holds the same step number, so any stale halo fails the
//! step.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use voxelflow::prelude::*;

fn config(devices: usize, thickness: u32) -> VoxelFlowConfig {
    VoxelFlowConfig::builder()
        .device_count(devices)
        .halo_thickness(thickness)
        .transfer_timeout(Duration::from_secs(5))
        .build()
        .expect("valid config")
}

fn writer(ctx: &DispatchContext<'_>) -> Result<()> {
    // Jitter so streams drift apart.
    let pause = rand::thread_rng().gen_range(0..300);
    std::thread::sleep(Duration::from_micros(pause));

    let phi = ctx.field("phi")?;
    let mut phi = phi.write();
    for c in ctx.subdomain().voxels() {
        phi.set(c, 0, ctx.step() as f32);
    }
    Ok(())
}

/// Reader that fails on any ghost value older than the current step.
fn reader(grid: Arc<StaticGrid>, checked: Arc<AtomicUsize>) -> impl UnitKernel {
    move |ctx: &DispatchContext<'_>| -> Result<()> {
        let active: HashSet<VoxelCoord> = grid.active_voxels().into_iter().collect();
        let sd = ctx.subdomain();
        let phi = ctx.field("phi")?;
        let phi = phi.read();
        let expected = ctx.step() as f32;

        for c in sd.voxels() {
            for face in Face::ALL {
                let across = c.step(face, 1);
                if !active.contains(&across) || sd.owns(across) {
                    continue;
                }
                let value = phi.get(across, 0);
                if value != Some(expected) {
                    return Err(VoxelError::DeviceFault {
                        device: ctx.device(),
                        reason: format!(
                            "stale ghost at {} across {}: {:?}, expected {}",
                            across, face, value, expected
                        ),
                    });
                }
                checked.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

/// Number of face contacts between voxels of different devices.
fn cross_device_contacts(subs: &[SubDomain]) -> usize {
    let owners = voxelflow::domain::owner_map(subs);
    subs.iter()
        .flat_map(|sd| sd.voxels().map(move |c| (sd.device, c)))
        .map(|(device, c)| {
            Face::ALL
                .into_iter()
                .filter(|&f| matches!(owners.get(&c.step(f, 1)), Some(&d) if d != device))
                .count()
        })
        .sum()
}

fn simulation(
    grid: Arc<StaticGrid>,
    config: VoxelFlowConfig,
    devices: Option<Vec<Arc<dyn DeviceStream>>>,
) -> (Simulation, Arc<AtomicUsize>) {
    let checked = Arc::new(AtomicUsize::new(0));
    let mut builder = Simulation::builder()
        .config(config)
        .grid(grid.clone())
        .unit(UnitSpec::new("write").writes(["phi"]), writer)
        .unit(
            UnitSpec::new("read")
                .reads(["phi"])
                .writes(["obs"])
                .with_neighbor_radius(1),
            reader(grid, Arc::clone(&checked)),
        );
    if let Some(devices) = devices {
        builder = builder.devices(devices);
    }
    (builder.build().expect("simulation builds"), checked)
}

fn assert_counters_at_epoch(sim: &Simulation, field: &str) {
    let halos = sim.halo().manager().field(field).expect("halo field");
    let epoch = halos.epoch();
    for set in halos.sets() {
        for face in set.faces() {
            assert_eq!(face.read_counter.value(), epoch, "{} {}", set.device(), face.face());
            assert_eq!(face.write_counter.value(), epoch);
            for link in face.links() {
                assert_eq!(link.counter.value(), epoch);
            }
        }
    }
}

fn stress(devices: usize, thickness: u32, steps: u64) {
    stress_on(Arc::new(StaticGrid::cube(8)), devices, thickness, steps);
}

fn stress_on(grid: Arc<StaticGrid>, devices: usize, thickness: u32, steps: u64) {
    let (mut sim, checked) = simulation(grid, config(devices, thickness), None);
    let contacts = cross_device_contacts(&sim.decomposition());
    assert!(contacts > 0);

    for step in 1..=steps {
        let report = sim.step().expect("step succeeds");
        assert_eq!(report.step, step);
        assert_eq!(report.halo_exchanges, 1);
        assert_counters_at_epoch(&sim, "phi");
        assert_eq!(sim.halo().manager().field("phi").unwrap().epoch(), step);
    }
    // Every contact was read fresh on every step.
    assert_eq!(checked.load(Ordering::Relaxed), contacts * steps as usize);
}

#[test]
fn test_halo_stress_two_devices() {
    stress(2, 1, 20);
    stress(2, 2, 10);
}

#[test]
fn test_halo_stress_four_devices() {
    stress(4, 1, 20);
}

#[test]
fn test_halo_stress_eight_devices() {
    stress(8, 2, 20);
}

#[test]
fn test_halo_stress_uneven_device_counts() {
    for devices in [3, 5, 6] {
        stress(devices, 1, 8);
        stress(devices, 2, 4);
    }
}

#[test]
fn test_halo_stress_random_sparse_grid() {
    let mut rng = StdRng::seed_from_u64(8);
    for _ in 0..4 {
        let voxels: Vec<VoxelCoord> = (0..600)
            .map(|_| {
                VoxelCoord::new(
                    rng.gen_range(0..10),
                    rng.gen_range(0..10),
                    rng.gen_range(0..10),
                )
            })
            .collect();
        let devices = rng.gen_range(2..7);
        let grid = Arc::new(StaticGrid::new(voxels));
        stress_on(grid, devices, 1, 4);
    }
}

/// `phi(c) = phi(c - x) + 1`, updated in place with radius 1.
fn shift(ctx: &DispatchContext<'_>) -> Result<()> {
    let phi = ctx.field("phi")?;
    let mut phi = phi.write();
    for c in ctx.subdomain().voxels() {
        let left = phi.get(c.offset(-1, 0, 0), 0).unwrap_or(0.0);
        phi.set(c, 0, left + 1.0);
    }
    Ok(())
}

fn run_shift(devices: usize, steps: u64) -> BTreeMap<VoxelCoord, f32> {
    let mut sim = Simulation::builder()
        .config(config(devices, 1))
        .grid(Arc::new(StaticGrid::cube(4)))
        .unit(
            UnitSpec::new("shift")
                .reads(["phi"])
                .writes(["phi"])
                .with_neighbor_radius(1),
            shift,
        )
        .build()
        .expect("simulation builds");
    sim.run(steps).expect("steps succeed");

    let mut values = BTreeMap::new();
    for sd in sim.decomposition().iter() {
        let block = sim.registry().block("phi", sd.device).expect("phi block");
        let block = block.read();
        for c in sd.voxels() {
            values.insert(c, block.get(c, 0).expect("owned voxel is stored"));
        }
    }
    values
}

#[test]
fn test_in_place_unit_reads_values_from_before_the_unit() {
    let steps = 3;
    let single = run_shift(1, steps);
    assert_eq!(single.len(), 64);
    for (c, value) in &single {
        // Each step moves values one voxel along +x; x = 0 reads nothing.
        let expected = (steps as i32).min(c.x + 1) as f32;
        assert_eq!(*value, expected, "at {}", c);
    }
    for devices in [2, 3, 5, 8] {
        assert_eq!(run_shift(devices, steps), single, "{} devices", devices);
    }
}

#[test]
fn test_single_device_needs_no_exchange() {
    let grid = Arc::new(StaticGrid::cube(4));
    let (mut sim, checked) = simulation(grid, config(1, 1), None);
    let report = sim.step().unwrap();
    assert_eq!(report.halo_exchanges, 1);
    assert_eq!(report.dispatches, 2);
    assert_eq!(checked.load(Ordering::Relaxed), 0);
}

#[test]
fn test_transfer_failure_aborts_step_and_recovers() {
    let grid = Arc::new(StaticGrid::cube(8));
    let cpu: Vec<Arc<CpuDevice>> = (0..2)
        .map(|i| Arc::new(CpuDevice::new(DeviceId(i)).unwrap()))
        .collect();
    let streams: Vec<Arc<dyn DeviceStream>> = cpu
        .iter()
        .map(|d| Arc::clone(d) as Arc<dyn DeviceStream>)
        .collect();
    let (mut sim, _) = simulation(grid, config(2, 1), Some(streams));

    sim.step().unwrap();

    cpu[0].inject_fault("halo transfer phi device 0 -> device 1", "link lost");
    match sim.step() {
        Err(VoxelError::HaloTransfer {
            sender,
            receiver,
            face,
            reason,
        }) => {
            assert_eq!(sender, DeviceId(0));
            assert_eq!(receiver, DeviceId(1));
            assert_eq!(face, Face::PosZ);
            assert!(reason.contains("link lost"));
        }
        other => panic!("expected a halo transfer error, got {:?}", other),
    }
    assert!(sim.is_failed());
    assert!(sim.step().is_err());

    sim.recover().unwrap();
    assert!(!sim.is_failed());
    for _ in 0..3 {
        sim.step().unwrap();
    }
    assert_counters_at_epoch(&sim, "phi");
}

#[test]
fn test_topology_change_rebuilds_domain() {
    let grid = Arc::new(StaticGrid::cube(8));
    let (mut sim, checked) = simulation(Arc::clone(&grid), config(2, 1), None);

    sim.run(2).unwrap();
    assert_eq!(sim.decomposition()[0].bounds.max.z, 3);

    grid.set_voxels(StaticGrid::dense_box(8, 8, 16).active_voxels());
    let report = sim.step().unwrap();
    assert!(report.rebuilt);

    let subs = sim.decomposition();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].bounds.max.z, 7);
    assert_eq!(subs[1].bounds.min.z, 8);
    assert_eq!(sim.halo().manager().field("phi").unwrap().epoch(), 1);
    assert_counters_at_epoch(&sim, "phi");

    let report = sim.step().unwrap();
    assert!(!report.rebuilt);
    assert!(checked.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_free_functions() {
    let schedule = build_graph([
        UnitSpec::new("b").reads(["x"]).writes(["y"]),
        UnitSpec::new("a").writes(["x"]),
    ])
    .unwrap();
    assert_eq!(schedule.ids(), vec!["a", "b"]);

    let grid = StaticGrid::cube(4);
    let subs = decompose_domain(&grid.active_voxels(), 2, &DecompositionConfig::default()).unwrap();
    assert_eq!(subs.len(), 2);
    assert!(subs[0].has_neighbor_on(Face::PosZ));
}

#[test]
fn test_export_graph() {
    let grid = Arc::new(StaticGrid::cube(4));
    let (sim, _) = simulation(grid, config(2, 1), None);
    let description = sim.export_graph();
    assert_eq!(description.nodes.len(), 2);
    assert_eq!(description.edges.len(), 1);
    assert!(description.to_dot().contains("digraph"));
}
