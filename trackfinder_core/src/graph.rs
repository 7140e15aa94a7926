//! Candidate graph: nodes are space points, edges are accepted relations.
//!
//! Points are pre-bucketed by layer and azimuthal sector so that only pairs
//! within the jump window and a few neighbouring sectors are ever tested.
//! Relation evaluation runs in parallel over source nodes; each task only
//! reads the store and returns its own edge list, and the lists are joined
//! in source order so the graph is identical on every run.

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;
use trackfinder_env::{LayerId, SpacePoint, SpacePointId};

use crate::config::PipelineConfig;
use crate::error::EventError;
use crate::interrupt::{checkpoint, Interrupt};
use crate::relation::{RelationContext, RelationFilter};
use crate::store::SpacePointStore;

/// Index of a node inside one [`CandidateGraph`].
pub type NodeIndex = usize;

/// Public view of an edge in space-point terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelationEdge {
    /// Inner point
    pub source: SpacePointId,
    /// Outer point
    pub target: SpacePointId,
    pub weight: f64,
    pub direction_consistent: bool,
}

/// Edge in node-index terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub weight: f64,
    pub direction_consistent: bool,
}

/// Directed graph over the participating space points of one event.
#[derive(Debug, Clone, Default)]
pub struct CandidateGraph {
    points: Vec<SpacePointId>,
    layers: Vec<LayerId>,
    node_of: HashMap<SpacePointId, NodeIndex>,
    edges: Vec<GraphEdge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl CandidateGraph {
    /// Assemble a graph from explicit nodes and edges.
    ///
    /// No relation filter is involved, so nothing stops `edges` from pointing
    /// inward; the cellular automaton reports such edges.
    pub fn from_parts(nodes: Vec<(SpacePointId, LayerId)>, edges: Vec<GraphEdge>) -> Self {
        let node_of: HashMap<SpacePointId, NodeIndex> =
            nodes.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
        let (points, layers): (Vec<_>, Vec<_>) = nodes.into_iter().unzip();
        let mut graph = Self {
            points,
            layers,
            node_of,
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        };
        graph.set_edges(edges);
        graph
    }

    /// Build the graph of one event.
    pub fn build<F: RelationFilter + ?Sized>(
        store: &SpacePointStore,
        filter: &F,
        config: &PipelineConfig,
        interrupt: &dyn Interrupt,
    ) -> Result<Self, EventError> {
        let relation = &config.relation;
        let ctx = RelationContext::new(relation.jump_size);

        let mut participants: Vec<&SpacePoint> = store.points_of(&config.subsystems).collect();
        participants.sort_by_key(|p| (p.layer, p.id));

        let sectors = SectorIndex::new(&participants, relation.sector_count, relation.effective_sector_window());

        checkpoint(interrupt, "graph build")?;

        let per_source: Vec<Vec<GraphEdge>> = (0..participants.len())
            .into_par_iter()
            .map(|u| {
                let inner = participants[u];
                let mut found: Vec<GraphEdge> = sectors
                    .candidates(inner, relation.jump_size)
                    .filter_map(|v| {
                        let rel = filter.compatible(inner, participants[v], &ctx);
                        (rel.accepted && rel.weight > 0.0).then_some(GraphEdge {
                            source: u,
                            target: v,
                            weight: rel.weight,
                            direction_consistent: rel.direction_consistent,
                        })
                    })
                    .collect();
                found.sort_by_key(|e| e.target);
                found
            })
            .collect();

        checkpoint(interrupt, "graph build")?;

        let nodes = participants.iter().map(|p| (p.id, p.layer)).collect();
        let mut graph = Self::from_parts(nodes, per_source.into_iter().flatten().collect());

        if relation.use_triplets {
            let before = graph.edge_count();
            graph.prune_by_triplets(&participants, filter, &ctx);
            debug!("Triplet pruning removed {} of {} edges", before - graph.edge_count(), before);
        }

        debug!(
            "Candidate graph: {} nodes, {} edges (filter {})",
            graph.node_count(),
            graph.edge_count(),
            filter.name()
        );
        Ok(graph)
    }

    fn set_edges(&mut self, edges: Vec<GraphEdge>) {
        let n = self.points.len();
        self.outgoing = vec![Vec::new(); n];
        self.incoming = vec![Vec::new(); n];
        for (i, e) in edges.iter().enumerate() {
            self.outgoing[e.source].push(i);
            self.incoming[e.target].push(i);
        }
        self.edges = edges;
    }

    /// Keep an edge only if it sits in at least one accepted triplet, or if
    /// it has no neighbouring edge to form a triplet with.
    fn prune_by_triplets<F: RelationFilter + ?Sized>(
        &mut self,
        participants: &[&SpacePoint],
        filter: &F,
        ctx: &RelationContext,
    ) {
        let keep: Vec<bool> = self
            .edges
            .par_iter()
            .map(|e| {
                let (u, v) = (e.source, e.target);
                let before = &self.incoming[u];
                let after = &self.outgoing[v];
                if before.is_empty() && after.is_empty() {
                    return true;
                }
                let inner_ok = before.iter().any(|&i| {
                    let w = self.edges[i].source;
                    filter
                        .compatible_triplet(participants[w], participants[u], participants[v], ctx)
                        .accepted
                });
                inner_ok
                    || after.iter().any(|&i| {
                        let x = self.edges[i].target;
                        filter
                            .compatible_triplet(participants[u], participants[v], participants[x], ctx)
                            .accepted
                    })
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .zip(keep)
            .filter_map(|(e, k)| k.then_some(*e))
            .collect();
        self.set_edges(edges);
    }

    pub fn node_count(&self) -> usize {
        self.points.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn point(&self, node: NodeIndex) -> SpacePointId {
        self.points[node]
    }

    pub fn layer(&self, node: NodeIndex) -> LayerId {
        self.layers[node]
    }

    pub fn node_of(&self, id: SpacePointId) -> Option<NodeIndex> {
        self.node_of.get(&id).copied()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.outgoing[node].iter().map(move |&i| &self.edges[i])
    }

    pub fn incoming(&self, node: NodeIndex) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.incoming[node].iter().map(move |&i| &self.edges[i])
    }

    /// Number of distinct layers among the nodes.
    pub fn layer_count(&self) -> usize {
        self.layers.iter().collect::<BTreeSet<_>>().len()
    }

    /// All edges in space-point terms, in storage order.
    pub fn relation_edges(&self) -> Vec<RelationEdge> {
        self.edges
            .iter()
            .map(|e| RelationEdge {
                source: self.points[e.source],
                target: self.points[e.target],
                weight: e.weight,
                direction_consistent: e.direction_consistent,
            })
            .collect()
    }

    /// Iterative three-colour DFS.
    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut mark = vec![Mark::White; self.node_count()];
        for start in 0..self.node_count() {
            if mark[start] != Mark::White {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            mark[start] = Mark::Grey;
            while let Some(top) = stack.last_mut() {
                let (node, slot) = *top;
                top.1 += 1;
                if let Some(&edge) = self.outgoing[node].get(slot) {
                    let target = self.edges[edge].target;
                    match mark[target] {
                        Mark::Grey => return true,
                        Mark::White => {
                            mark[target] = Mark::Grey;
                            stack.push((target, 0));
                        }
                        Mark::Black => {}
                    }
                } else {
                    mark[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        false
    }
}

// ============================================================================
// SECTOR INDEX
// ============================================================================

/// Layer × azimuth buckets of node indices.
struct SectorIndex {
    count: u16,
    window: u16,
    buckets: HashMap<(LayerId, u16), Vec<NodeIndex>>,
}

impl SectorIndex {
    fn new(points: &[&SpacePoint], count: u16, window: u16) -> Self {
        let mut buckets: HashMap<(LayerId, u16), Vec<NodeIndex>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            buckets
                .entry((p.layer, sector_of(p.phi(), count)))
                .or_default()
                .push(i);
        }
        Self {
            count,
            window,
            buckets,
        }
    }

    /// Nodes on the next `jump` layers in the sector window around `point`.
    fn candidates<'a>(&'a self, point: &SpacePoint, jump: u16) -> impl Iterator<Item = NodeIndex> + 'a {
        let home = sector_of(point.phi(), self.count);
        let sectors = self.neighbourhood(home);
        let first = point.layer.0.saturating_add(1);
        let last = point.layer.0.saturating_add(jump);
        (first..=last).flat_map(move |layer| {
            sectors
                .clone()
                .into_iter()
                .filter_map(move |s| self.buckets.get(&(LayerId(layer), s)))
                .flatten()
                .copied()
        })
    }

    fn neighbourhood(&self, home: u16) -> Vec<u16> {
        if 2 * u32::from(self.window) + 1 >= u32::from(self.count) {
            return (0..self.count).collect();
        }
        let count = i32::from(self.count);
        let window = i32::from(self.window);
        (-window..=window)
            .map(|k| (i32::from(home) + k).rem_euclid(count) as u16)
            .collect()
    }
}

fn sector_of(phi: f64, count: u16) -> u16 {
    let t = (phi + PI) / (2.0 * PI);
    ((t * f64::from(count)) as u16).min(count - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Never;
    use crate::relation::RelationStrategy;
    use nalgebra::Vector3;
    use trackfinder_env::{SensorId, Subsystem};

    fn sp(id: u32, r: f64, phi: f64, layer: u16) -> SpacePoint {
        SpacePoint::new(
            SpacePointId(id),
            Vector3::new(r * phi.cos(), r * phi.sin(), 0.0),
            0.01,
            LayerId(layer),
            SensorId(0),
            Subsystem::Svd,
        )
    }

    fn config() -> PipelineConfig {
        PipelineConfig::for_subsystems(&[Subsystem::Svd])
    }

    fn build(points: Vec<SpacePoint>, config: &PipelineConfig) -> CandidateGraph {
        let store = SpacePointStore::new(points);
        let filter = RelationStrategy::geometric(&config.relation);
        CandidateGraph::build(&store, &filter, config, &Never).unwrap()
    }

    #[test]
    fn test_radial_line_builds_chain_with_jumps() {
        let points = (1..=4).map(|l| sp(l as u32, 2.0 * f64::from(l), 0.2, l)).collect();
        let graph = build(points, &config());
        assert_eq!(graph.node_count(), 4);
        // 3 single steps + 2 jumps over one layer
        assert_eq!(graph.edge_count(), 5);
        assert!(!graph.has_cycle());
        for e in graph.edges() {
            assert!(graph.layer(e.target) > graph.layer(e.source));
        }
    }

    #[test]
    fn test_far_sector_points_never_related() {
        let points = vec![sp(1, 4.0, 0.0, 1), sp(2, 8.0, 2.0, 2), sp(3, 8.0, 0.05, 2)];
        let graph = build(points, &config());
        let edges = graph.relation_edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, SpacePointId(1));
        assert_eq!(edges[0].target, SpacePointId(3));
    }

    #[test]
    fn test_wide_delta_phi_widens_sector_search() {
        let mut config = config();
        config.relation.max_delta_phi = 1.0;
        assert!(config.validate().is_ok());

        let points = vec![sp(1, 4.0, 0.0, 1), sp(2, 8.0, 0.8, 2)];
        let filter = RelationStrategy::geometric(&config.relation);
        let ctx = RelationContext::new(config.relation.jump_size);
        assert!(filter.compatible(&points[0], &points[1], &ctx).accepted);

        let graph = build(points, &config);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_sector_boundary_at_pi() {
        let points = vec![sp(1, 4.0, PI - 0.01, 1), sp(2, 8.0, -PI + 0.01, 2)];
        let graph = build(points, &config());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_non_participating_subsystem_ignored() {
        let mut pxd = sp(9, 1.0, 0.2, 1);
        pxd.subsystem = Subsystem::Pxd;
        let points = vec![pxd, sp(1, 4.0, 0.2, 2), sp(2, 8.0, 0.2, 3)];
        let graph = build(points, &config());
        assert_eq!(graph.node_count(), 2);
        assert!(graph.node_of(SpacePointId(9)).is_none());
    }

    #[test]
    fn test_build_is_deterministic() {
        let points: Vec<SpacePoint> = (0..40)
            .map(|i| sp(i, 2.0 * f64::from(i % 5 + 1), 0.01 * f64::from(i), (i % 5 + 1) as u16))
            .collect();
        let a = build(points.clone(), &config());
        let b = build(points, &config());
        assert_eq!(a.relation_edges(), b.relation_edges());
    }

    #[test]
    fn test_triplet_pruning_drops_kinked_edge() {
        let mut config = config();
        config.relation.use_triplets = true;
        config.relation.jump_size = 1;
        // straight chain 1-2-3 plus a kinked branch 2-4
        let kink = SpacePoint::new(
            SpacePointId(4),
            Vector3::new(11.0, 3.5, 0.0),
            0.01,
            LayerId(3),
            SensorId(0),
            Subsystem::Svd,
        );
        let points = vec![sp(1, 4.0, 0.0, 1), sp(2, 8.0, 0.0, 2), sp(3, 12.0, 0.0, 3), kink];
        let graph = build(points, &config);
        let targets: Vec<SpacePointId> = graph.relation_edges().iter().map(|e| e.target).collect();
        assert_eq!(targets, vec![SpacePointId(2), SpacePointId(3)]);
    }

    #[test]
    fn test_from_parts_and_cycle_detection() {
        let nodes = vec![(SpacePointId(1), LayerId(1)), (SpacePointId(2), LayerId(2))];
        let edge = |source, target| GraphEdge {
            source,
            target,
            weight: 1.0,
            direction_consistent: true,
        };
        let dag = CandidateGraph::from_parts(nodes.clone(), vec![edge(0, 1)]);
        assert!(!dag.has_cycle());
        assert_eq!(dag.layer_count(), 2);
        let cyclic = CandidateGraph::from_parts(nodes, vec![edge(0, 1), edge(1, 0)]);
        assert!(cyclic.has_cycle());
    }

    #[test]
    fn test_cancelled_build() {
        let store = SpacePointStore::new(vec![sp(1, 4.0, 0.0, 1)]);
        let config = config();
        let flag = std::sync::atomic::AtomicBool::new(true);
        let filter = RelationStrategy::All;
        assert!(matches!(
            CandidateGraph::build(&store, &filter, &config, &flag),
            Err(EventError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_neighbourhood_wraps() {
        let index = SectorIndex::new(&[], 8, 1);
        let mut n = index.neighbourhood(0);
        n.sort_unstable();
        assert_eq!(n, vec![0, 1, 7]);
        let wide = SectorIndex::new(&[], 4, 2);
        assert_eq!(wide.neighbourhood(1).len(), 4);
    }
}
