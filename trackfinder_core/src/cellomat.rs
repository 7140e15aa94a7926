//! Cellular-automaton path finder.
//!
//! Every node carries the length of the longest chain starting at it and
//! leading outward, plus the neighbour that realises it. Edges are swept in
//! layer-descending order of their source, so on an acyclic graph the first
//! sweep already reaches the fixpoint and the second one only confirms it.

use serde::Serialize;
use tracing::debug;

use crate::config::ExtractionMode;
use crate::error::EventError;
use crate::graph::{CandidateGraph, NodeIndex};
use crate::interrupt::{checkpoint, Interrupt};

/// Per-node automaton state of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaState {
    /// Longest outward chain starting at the node, counted in nodes
    pub chain_length: Vec<u32>,
    /// Next node along that chain
    pub best_predecessor: Vec<Option<NodeIndex>>,
}

impl CaState {
    fn new(nodes: usize) -> Self {
        Self {
            chain_length: vec![1; nodes],
            best_predecessor: vec![None; nodes],
        }
    }
}

/// Final state plus the number of sweeps it took.
#[derive(Debug, Clone)]
pub struct CaOutcome {
    pub state: CaState,
    pub sweeps: usize,
}

pub struct CellularAutomaton<'g> {
    graph: &'g CandidateGraph,
    max_sweeps: usize,
}

impl<'g> CellularAutomaton<'g> {
    pub fn new(graph: &'g CandidateGraph, max_sweeps: usize) -> Self {
        Self { graph, max_sweeps }
    }

    pub fn run(&self, interrupt: &dyn Interrupt) -> Result<CaOutcome, EventError> {
        self.run_with_observer(interrupt, |_, _| {})
    }

    /// Like [`run`](Self::run), handing the state after every sweep to `observer`.
    pub fn run_with_observer(
        &self,
        interrupt: &dyn Interrupt,
        mut observer: impl FnMut(usize, &CaState),
    ) -> Result<CaOutcome, EventError> {
        let graph = self.graph;
        let order = self.sweep_order()?;
        let mut state = CaState::new(graph.node_count());
        let mut sweeps = 0;

        loop {
            checkpoint(interrupt, "ca sweep")?;
            if sweeps == self.max_sweeps {
                return Err(EventError::CaDidNotConverge { sweeps });
            }
            sweeps += 1;

            let mut changed = false;
            for &e in &order {
                let edge = &graph.edges()[e];
                let candidate = state.chain_length[edge.target] + 1;
                if candidate > state.chain_length[edge.source] {
                    state.chain_length[edge.source] = candidate;
                    state.best_predecessor[edge.source] = Some(edge.target);
                    changed = true;
                }
            }
            observer(sweeps, &state);

            if !changed {
                break;
            }
        }

        debug!("Cellular automaton converged after {} sweeps", sweeps);
        Ok(CaOutcome { state, sweeps })
    }

    /// Edge indices by source layer descending, then source and target ascending.
    fn sweep_order(&self) -> Result<Vec<usize>, EventError> {
        let graph = self.graph;
        for edge in graph.edges() {
            let (from, to) = (graph.layer(edge.source), graph.layer(edge.target));
            if to <= from {
                return Err(EventError::NonDagEdge {
                    from: graph.point(edge.source),
                    to: graph.point(edge.target),
                    from_layer: from.0,
                    to_layer: to.0,
                });
            }
        }
        let mut order: Vec<usize> = (0..graph.edge_count()).collect();
        order.sort_by_key(|&e| {
            let edge = &graph.edges()[e];
            (std::cmp::Reverse(graph.layer(edge.source)), edge.source, edge.target)
        });
        Ok(order)
    }
}

// ============================================================================
// PATH EXTRACTION
// ============================================================================

/// Read candidate node paths (inner → outer) off a converged state.
pub fn extract_paths(
    graph: &CandidateGraph,
    state: &CaState,
    min_hits: usize,
    mode: ExtractionMode,
) -> Vec<Vec<NodeIndex>> {
    let seeds = local_maxima(graph, state, min_hits);
    match mode {
        ExtractionMode::BestPath => best_paths(state, &seeds),
        ExtractionMode::AllPaths { max_paths_per_seed } => seeds
            .iter()
            .flat_map(|&seed| all_paths(graph, state, seed, max_paths_per_seed))
            .collect(),
    }
}

/// Nodes long enough to seed a candidate that no inner node extends,
/// ordered by chain length descending then node index.
fn local_maxima(graph: &CandidateGraph, state: &CaState, min_hits: usize) -> Vec<NodeIndex> {
    let mut seeds: Vec<NodeIndex> = (0..graph.node_count())
        .filter(|&u| state.chain_length[u] as usize >= min_hits)
        .filter(|&u| {
            graph
                .incoming(u)
                .all(|e| state.chain_length[e.source] != state.chain_length[u] + 1)
        })
        .collect();
    seeds.sort_by_key(|&u| (std::cmp::Reverse(state.chain_length[u]), u));
    seeds
}

fn best_paths(state: &CaState, seeds: &[NodeIndex]) -> Vec<Vec<NodeIndex>> {
    let mut interior = vec![false; state.chain_length.len()];
    let mut paths = Vec::new();
    for &seed in seeds {
        if interior[seed] {
            continue;
        }
        let mut path = vec![seed];
        let mut node = seed;
        while let Some(next) = state.best_predecessor[node] {
            interior[next] = true;
            path.push(next);
            node = next;
        }
        paths.push(path);
    }
    paths
}

/// Depth-first enumeration of every path whose chain length drops by one per step.
fn all_paths(graph: &CandidateGraph, state: &CaState, seed: NodeIndex, cap: usize) -> Vec<Vec<NodeIndex>> {
    let mut paths = Vec::new();
    let mut stack = vec![vec![seed]];
    while let Some(path) = stack.pop() {
        if paths.len() == cap {
            break;
        }
        let Some(&last) = path.last() else {
            continue;
        };
        let mut next: Vec<NodeIndex> = graph
            .outgoing(last)
            .filter(|e| state.chain_length[e.target] + 1 == state.chain_length[last])
            .map(|e| e.target)
            .collect();
        if next.is_empty() {
            paths.push(path);
            continue;
        }
        // reverse so the lowest index is expanded first
        next.sort_unstable_by(|a, b| b.cmp(a));
        for n in next {
            let mut extended = path.clone();
            extended.push(n);
            stack.push(extended);
        }
    }
    paths
}
