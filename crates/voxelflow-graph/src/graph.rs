//! Dependency graph and scheduler.
//!
//! Units are registered with their declared input and output fields. An edge
//! U → V exists when V reads a field that U writes (read-after-write) and
//! U ≠ V; a unit that reads and writes the same field updates it in place and
//! gets no self-edge. Writers of the same field are not ordered against each
//! other beyond registration order; see [`DependencyGraph::conflicting_writers`].
//!
//! Names are interned to [`UnitIndex`] / [`FieldId`] when the graph is first
//! queried after a change, and edges are stored in CSR form. Schedules are
//! cached until the next [`DependencyGraph::add_unit`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use voxelflow_core::error::{CycleError, Result, VoxelError};
use voxelflow_core::field::FieldRegistry;

use crate::algorithms::{cyclic_components, topological_order};
use crate::models::{CsrGraph, CsrGraphBuilder, FieldId, UnitIndex};
use crate::unit::UnitSpec;

/// Interned view of the registered units.
#[derive(Debug)]
pub(crate) struct GraphIndex {
    /// Field names by [`FieldId`].
    pub fields: Vec<String>,
    /// RAW adjacency.
    pub adjacency: CsrGraph,
    /// Fields carried by each edge.
    pub edge_fields: BTreeMap<(UnitIndex, UnitIndex), Vec<FieldId>>,
    /// Writers of each field, in registration order.
    pub writers: Vec<Vec<UnitIndex>>,
}

impl GraphIndex {
    fn build(units: &[UnitSpec]) -> Self {
        let mut field_lookup: HashMap<String, FieldId> = HashMap::new();
        let mut fields: Vec<String> = Vec::new();
        let mut intern = |name: &str| -> FieldId {
            if let Some(&id) = field_lookup.get(name) {
                return id;
            }
            let id = FieldId::new(fields.len() as u32);
            fields.push(name.to_string());
            field_lookup.insert(name.to_string(), id);
            id
        };

        let mut reads: Vec<Vec<FieldId>> = Vec::with_capacity(units.len());
        let mut writes: Vec<Vec<FieldId>> = Vec::with_capacity(units.len());
        for unit in units {
            reads.push(unit.reads.iter().map(|f| intern(f)).collect());
            writes.push(unit.writes.iter().map(|f| intern(f)).collect());
        }

        let mut writers: Vec<Vec<UnitIndex>> = vec![Vec::new(); fields.len()];
        for (u, outputs) in writes.iter().enumerate() {
            for field in outputs {
                writers[field.get() as usize].push(UnitIndex::from(u));
            }
        }

        let mut builder = CsrGraphBuilder::new(units.len());
        let mut edge_fields: BTreeMap<(UnitIndex, UnitIndex), Vec<FieldId>> = BTreeMap::new();
        for (v, inputs) in reads.iter().enumerate() {
            let reader = UnitIndex::from(v);
            for &field in inputs {
                for &writer in &writers[field.get() as usize] {
                    if writer == reader {
                        continue;
                    }
                    builder.add_edge(writer.get(), reader.get());
                    edge_fields.entry((writer, reader)).or_default().push(field);
                }
            }
        }

        Self {
            fields,
            adjacency: builder.build(),
            edge_fields,
            writers,
        }
    }
}

/// A RAW dependency between two units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Producing unit.
    pub from: String,
    /// Consuming unit.
    pub to: String,
    /// Fields written by `from` and read by `to`.
    pub fields: Vec<String>,
}

/// A field written by more than one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConflict {
    /// Field name.
    pub field: String,
    /// Writers in registration order.
    pub writers: Vec<String>,
}

/// A validated execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    units: Vec<UnitSpec>,
    order: Vec<UnitIndex>,
    predecessors: Vec<Vec<UnitIndex>>,
}

impl Schedule {
    /// Number of scheduled units.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the schedule is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Unit indices in execution order.
    pub fn order(&self) -> &[UnitIndex] {
        &self.order
    }

    /// Unit identifiers in execution order.
    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|(_, unit)| unit.id.clone()).collect()
    }

    /// Unit declaration by index.
    pub fn unit(&self, index: UnitIndex) -> Option<&UnitSpec> {
        self.units.get(index.as_usize())
    }

    /// Iterate over units in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (UnitIndex, &UnitSpec)> + '_ {
        self.order
            .iter()
            .map(move |&idx| (idx, &self.units[idx.as_usize()]))
    }

    /// Units whose outputs `index` reads, ascending.
    pub fn predecessors(&self, index: UnitIndex) -> &[UnitIndex] {
        self.predecessors
            .get(index.as_usize())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fields that need a halo exchange before `index` runs.
    pub fn halo_fields(&self, index: UnitIndex) -> &[String] {
        match self.unit(index) {
            Some(unit) if unit.requires_halo() => &unit.reads,
            _ => &[],
        }
    }
}

#[derive(Debug, Default)]
struct GraphCache {
    index: Option<Arc<GraphIndex>>,
    schedule: Option<Arc<Schedule>>,
}

/// Directed dependency graph over registered units.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    units: Vec<UnitSpec>,
    lookup: HashMap<String, UnitIndex>,
    cache: RwLock<GraphCache>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph from units in registration order.
    pub fn from_units<I>(units: I) -> Self
    where
        I: IntoIterator<Item = UnitSpec>,
    {
        let mut graph = Self::new();
        for unit in units {
            graph.add_unit(unit);
        }
        graph
    }

    /// Register a unit, or replace the unit with the same id.
    ///
    /// A replaced unit keeps its registration index. Any cached schedule is
    /// discarded.
    pub fn add_unit(&mut self, spec: UnitSpec) -> UnitIndex {
        let spec = spec.normalized();
        let index = match self.lookup.get(&spec.id) {
            Some(&index) => {
                debug!("Replacing unit '{}' at index {}", spec.id, index.get());
                self.units[index.as_usize()] = spec;
                index
            }
            None => {
                let index = UnitIndex::from(self.units.len());
                self.lookup.insert(spec.id.clone(), index);
                self.units.push(spec);
                index
            }
        };
        *self.cache.get_mut() = GraphCache::default();
        index
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if no units are registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in registration order.
    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    /// Look up a unit by id.
    pub fn unit(&self, id: &str) -> Option<&UnitSpec> {
        self.lookup.get(id).map(|idx| &self.units[idx.as_usize()])
    }

    /// Registration index of a unit.
    pub fn index_of(&self, id: &str) -> Result<UnitIndex> {
        self.lookup
            .get(id)
            .copied()
            .ok_or_else(|| VoxelError::UnknownUnit(id.to_string()))
    }

    pub(crate) fn index(&self) -> Arc<GraphIndex> {
        if let Some(index) = &self.cache.read().index {
            return Arc::clone(index);
        }
        let mut cache = self.cache.write();
        let index = cache
            .index
            .get_or_insert_with(|| Arc::new(GraphIndex::build(&self.units)));
        Arc::clone(index)
    }

    /// Check whether the RAW graph contains a directed cycle.
    ///
    /// Computed from strongly connected components, independently of
    /// schedule generation.
    pub fn has_cycle(&self) -> bool {
        !cyclic_components(&self.index().adjacency).is_empty()
    }

    /// All RAW edges, ordered by producer then consumer index.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let index = self.index();
        index
            .edge_fields
            .iter()
            .map(|(&(from, to), fields)| DependencyEdge {
                from: self.units[from.as_usize()].id.clone(),
                to: self.units[to.as_usize()].id.clone(),
                fields: fields
                    .iter()
                    .map(|f| index.fields[f.get() as usize].clone())
                    .collect(),
            })
            .collect()
    }

    /// Unit ids in a valid execution order.
    ///
    /// Ties are broken by registration index, so repeated calls return the
    /// same order. Fails without a partial result if the graph is cyclic.
    pub fn execution_order(&self) -> std::result::Result<Vec<String>, CycleError> {
        Ok(self.schedule()?.ids())
    }

    /// Cached index-based schedule.
    pub fn schedule(&self) -> std::result::Result<Arc<Schedule>, CycleError> {
        if let Some(schedule) = &self.cache.read().schedule {
            return Ok(Arc::clone(schedule));
        }

        let index = self.index();
        let order = match topological_order(&index.adjacency) {
            Some(order) => order,
            None => return Err(self.cycle_error(&index)),
        };

        for conflict in self.conflicts(&index) {
            warn!(
                "Field '{}' is written by several units ({}); they run in registration order",
                conflict.field,
                conflict.writers.join(", ")
            );
        }

        let reverse = index.adjacency.transpose();
        let predecessors = (0..self.units.len())
            .map(|u| {
                reverse
                    .successors(UnitIndex::from(u))
                    .iter()
                    .map(|&p| UnitIndex(p))
                    .collect()
            })
            .collect();

        let schedule = Arc::new(Schedule {
            units: self.units.clone(),
            order,
            predecessors,
        });
        debug!(
            "Computed schedule for {} units ({} dependencies)",
            schedule.len(),
            index.adjacency.num_edges()
        );

        self.cache.write().schedule = Some(Arc::clone(&schedule));
        Ok(schedule)
    }

    fn cycle_error(&self, index: &GraphIndex) -> CycleError {
        let names = |members: &Vec<UnitIndex>| -> Vec<String> {
            members
                .iter()
                .map(|u| self.units[u.as_usize()].id.clone())
                .collect()
        };
        let components: Vec<Vec<String>> = cyclic_components(&index.adjacency)
            .iter()
            .map(names)
            .collect();
        let units = components.first().cloned().unwrap_or_default();
        warn!("Dependency cycle detected: {}", units.join(" -> "));
        CycleError { units, components }
    }

    fn conflicts(&self, index: &GraphIndex) -> Vec<WriterConflict> {
        index
            .writers
            .iter()
            .enumerate()
            .filter(|(_, writers)| writers.len() > 1)
            .map(|(field, writers)| WriterConflict {
                field: index.fields[field].clone(),
                writers: writers
                    .iter()
                    .map(|u| self.units[u.as_usize()].id.clone())
                    .collect(),
            })
            .collect()
    }

    /// Fields written by more than one unit.
    pub fn conflicting_writers(&self) -> Vec<WriterConflict> {
        self.conflicts(&self.index())
    }

    /// Check that every referenced field exists in the registry.
    pub fn validate_fields(&self, registry: &dyn FieldRegistry) -> Result<()> {
        for unit in &self.units {
            if let Some(field) = unit
                .reads
                .iter()
                .chain(unit.writes.iter())
                .find(|f| !registry.contains(f))
            {
                return Err(VoxelError::UnknownField {
                    unit: unit.id.clone(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxelflow_core::field::HostFieldRegistry;

    fn unit(id: &str, reads: &[&str], writes: &[&str]) -> UnitSpec {
        UnitSpec::new(id)
            .reads(reads.iter().copied())
            .writes(writes.iter().copied())
    }

    #[test]
    fn test_chain_order() {
        // Registered in reverse to make sure the order comes from edges.
        let graph = DependencyGraph::from_units([
            unit("c", &["y"], &["z"]),
            unit("b", &["x"], &["y"]),
            unit("a", &[], &["x"]),
        ]);
        assert!(!graph.has_cycle());
        assert_eq!(graph.execution_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        let graph = DependencyGraph::from_units([
            unit("d", &["l", "r"], &["out"]),
            unit("left", &["src"], &["l"]),
            unit("right", &["src"], &["r"]),
            unit("source", &[], &["src"]),
        ]);
        let order = graph.execution_order().unwrap();
        let pos = |id: &str| order.iter().position(|u| u == id).unwrap();
        assert!(pos("source") < pos("left"));
        assert!(pos("source") < pos("right"));
        assert!(pos("left") < pos("d"));
        assert!(pos("right") < pos("d"));
        // Independent branches keep registration order.
        assert!(pos("left") < pos("right"));
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = DependencyGraph::from_units([
            unit("a", &["y"], &["x"]),
            unit("b", &["x"], &["y"]),
            unit("free", &[], &["z"]),
        ]);
        assert!(graph.has_cycle());
        let err = graph.execution_order().unwrap_err();
        assert_eq!(err.units, vec!["a", "b"]);
        assert_eq!(err.components.len(), 1);
        assert!(graph.schedule().is_err());
    }

    #[test]
    fn test_in_place_update_is_not_a_cycle() {
        let graph = DependencyGraph::from_units([unit("smooth", &["phi"], &["phi"])]);
        assert!(!graph.has_cycle());
        assert_eq!(graph.execution_order().unwrap(), vec!["smooth"]);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_replacement_keeps_index_and_invalidates_schedule() {
        let mut graph = DependencyGraph::from_units([
            unit("a", &[], &["x"]),
            unit("b", &["x"], &[]),
        ]);
        let first = graph.schedule().unwrap();
        assert!(Arc::ptr_eq(&first, &graph.schedule().unwrap()));

        // b now feeds a instead.
        let idx = graph.add_unit(unit("b", &[], &["y"]));
        assert_eq!(idx, UnitIndex(1));
        graph.add_unit(unit("a", &["y"], &["x"]));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.execution_order().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_edges_carry_fields() {
        let graph = DependencyGraph::from_units([
            unit("w", &[], &["p", "q"]),
            unit("r", &["q", "p"], &[]),
        ]);
        let edges = graph.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "w");
        assert_eq!(edges[0].to, "r");
        assert_eq!(edges[0].fields, vec!["q", "p"]);
    }

    #[test]
    fn test_conflicting_writers() {
        let graph = DependencyGraph::from_units([
            unit("first", &[], &["phi"]),
            unit("second", &[], &["phi"]),
            unit("reader", &["phi"], &[]),
        ]);
        let conflicts = graph.conflicting_writers();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].writers, vec!["first", "second"]);
        assert_eq!(
            graph.execution_order().unwrap(),
            vec!["first", "second", "reader"]
        );
    }

    #[test]
    fn test_schedule_predecessors_and_halo_fields() {
        let graph = DependencyGraph::from_units([
            unit("w", &[], &["phi"]),
            unit("r", &["phi"], &["out"]).with_neighbor_radius(1),
        ]);
        let schedule = graph.schedule().unwrap();
        assert_eq!(schedule.predecessors(UnitIndex(1)), &[UnitIndex(0)]);
        assert!(schedule.predecessors(UnitIndex(0)).is_empty());
        assert_eq!(schedule.halo_fields(UnitIndex(1)), &["phi".to_string()]);
        assert!(schedule.halo_fields(UnitIndex(0)).is_empty());
    }

    #[test]
    fn test_validate_fields() {
        let registry = HostFieldRegistry::with_scalar_fields(["phi"]);
        let graph = DependencyGraph::from_units([unit("a", &["phi"], &["psi"])]);
        match graph.validate_fields(&registry).unwrap_err() {
            VoxelError::UnknownField { unit, field } => {
                assert_eq!(unit, "a");
                assert_eq!(field, "psi");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            graph.index_of("missing"),
            Err(VoxelError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(!graph.has_cycle());
        assert!(graph.execution_order().unwrap().is_empty());
    }
}
