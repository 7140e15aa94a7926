//! Overlap graph between candidates that share space points.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use trackfinder_env::SpacePointId;

use crate::candidate::TrackCandidate;
use crate::error::EventError;

/// Two candidates sharing at least one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictEdge {
    pub a: usize,
    pub b: usize,
    /// Number of shared points
    pub shared: usize,
    pub weight: f64,
}

/// Undirected conflict graph over candidate indices.
#[derive(Debug, Clone, Default)]
pub struct ConflictGraph {
    edges: Vec<ConflictEdge>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl ConflictGraph {
    /// Build the graph through an inverted index point → candidates.
    ///
    /// With `overlap_weighting` an edge weighs `shared / min(len_a, len_b)`,
    /// otherwise 1.
    pub fn build(candidates: &[TrackCandidate], overlap_weighting: bool) -> Result<Self, EventError> {
        let mut users: HashMap<SpacePointId, Vec<usize>> = HashMap::new();
        for (i, tc) in candidates.iter().enumerate() {
            let mut seen = HashSet::with_capacity(tc.len());
            for &hit in &tc.hits {
                if !seen.insert(hit) {
                    return Err(EventError::DuplicateHit {
                        candidate: tc.id,
                        point: hit,
                    });
                }
                users.entry(hit).or_default().push(i);
            }
        }

        let mut shared: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for list in users.values() {
            for (k, &a) in list.iter().enumerate() {
                for &b in &list[k + 1..] {
                    *shared.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }
        }

        let mut adjacency = vec![Vec::new(); candidates.len()];
        let edges: Vec<ConflictEdge> = shared
            .into_iter()
            .map(|((a, b), n)| {
                let weight = if overlap_weighting {
                    n as f64 / candidates[a].len().min(candidates[b].len()) as f64
                } else {
                    1.0
                };
                ConflictEdge { a, b, shared: n, weight }
            })
            .collect();
        for e in &edges {
            adjacency[e.a].push((e.b, e.weight));
            adjacency[e.b].push((e.a, e.weight));
        }

        Ok(Self { edges, adjacency })
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges sorted by (a, b).
    pub fn edges(&self) -> &[ConflictEdge] {
        &self.edges
    }

    /// Conflicting candidates of `i` with edge weights, ascending index.
    pub fn neighbours(&self, i: usize) -> &[(usize, f64)] {
        &self.adjacency[i]
    }

    pub fn degree(&self, i: usize) -> usize {
        self.adjacency[i].len()
    }

    pub fn conflicts(&self, i: usize, j: usize) -> bool {
        self.adjacency[i].iter().any(|&(k, _)| k == j)
    }

    /// Connected components, each sorted, ordered by smallest member.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.len()];
        let mut components = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(i) = queue.pop_front() {
                for &(j, _) in &self.adjacency[i] {
                    if !seen[j] {
                        seen[j] = true;
                        component.push(j);
                        queue.push_back(j);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// True when no two accepted candidates conflict.
    pub fn is_conflict_free(&self, accepted: &[bool]) -> bool {
        self.edges.iter().all(|e| !(accepted[e.a] && accepted[e.b]))
    }
}

/// Mark candidates whose hit set is contained in another candidate's.
///
/// Of such a pair the lower-scoring one goes; on equal score the longer one
/// stays, then the lower id. Returns the number removed.
pub fn remove_subsets(candidates: &[TrackCandidate], graph: &ConflictGraph, alive: &mut [bool]) -> usize {
    let mut removed = 0;
    for e in graph.edges() {
        if !alive[e.a] || !alive[e.b] {
            continue;
        }
        let (a, b) = (&candidates[e.a], &candidates[e.b]);
        if e.shared < a.len().min(b.len()) {
            continue;
        }
        let loser = if ranks_above(a, b) { e.b } else { e.a };
        alive[loser] = false;
        removed += 1;
    }
    removed
}

fn ranks_above(a: &TrackCandidate, b: &TrackCandidate) -> bool {
    let (sa, sb) = (a.quality.score, b.quality.score);
    if sa != sb {
        return sa > sb;
    }
    if a.len() != b.len() {
        return a.len() > b.len();
    }
    a.id < b.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;

    fn tc(id: u32, hits: &[u32], score: f64) -> TrackCandidate {
        let mut c = TrackCandidate::new(CandidateId(id), hits.iter().map(|&h| SpacePointId(h)).collect());
        c.quality.score = score;
        c
    }

    #[test]
    fn test_shared_points_make_edges() {
        let cands = vec![tc(0, &[1, 2, 3], 0.5), tc(1, &[3, 4, 5], 0.5), tc(2, &[6, 7, 8], 0.5)];
        let g = ConflictGraph::build(&cands, false).unwrap();
        assert_eq!(g.edge_count(), 1);
        assert!(g.conflicts(0, 1));
        assert!(!g.conflicts(0, 2));
        assert_eq!(g.components(), vec![vec![0, 1], vec![2]]);
        assert!(g.is_conflict_free(&[true, false, true]));
        assert!(!g.is_conflict_free(&[true, true, false]));
    }

    #[test]
    fn test_overlap_weighting() {
        let cands = vec![tc(0, &[1, 2, 3, 4], 0.5), tc(1, &[3, 4, 5], 0.5)];
        let g = ConflictGraph::build(&cands, true).unwrap();
        let e = g.edges()[0];
        assert_eq!(e.shared, 2);
        assert!((e.weight - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(g.neighbours(1), &[(0, e.weight)]);
    }

    #[test]
    fn test_duplicate_hit_is_fatal() {
        let cands = vec![tc(4, &[1, 2, 1], 0.5)];
        assert!(matches!(
            ConflictGraph::build(&cands, false),
            Err(EventError::DuplicateHit { candidate: CandidateId(4), point: SpacePointId(1) })
        ));
    }

    #[test]
    fn test_subset_removed_keeping_better() {
        let cands = vec![
            tc(0, &[1, 2, 3, 4], 0.6),
            tc(1, &[2, 3, 4], 0.7),
            tc(2, &[4, 5, 6], 0.9),
        ];
        let g = ConflictGraph::build(&cands, false).unwrap();
        let mut alive = vec![true; 3];
        assert_eq!(remove_subsets(&cands, &g, &mut alive), 1);
        assert_eq!(alive, vec![false, true, true]);
    }

    #[test]
    fn test_identical_candidates_keep_lower_id() {
        let cands = vec![tc(0, &[1, 2, 3], 0.5), tc(1, &[1, 2, 3], 0.5)];
        let g = ConflictGraph::build(&cands, false).unwrap();
        let mut alive = vec![true; 2];
        remove_subsets(&cands, &g, &mut alive);
        assert_eq!(alive, vec![true, false]);
    }

    #[test]
    fn test_chain_components() {
        let cands = vec![
            tc(0, &[1, 2, 3], 0.5),
            tc(1, &[3, 4, 5], 0.5),
            tc(2, &[5, 6, 7], 0.5),
            tc(3, &[8, 9, 10], 0.5),
        ];
        let g = ConflictGraph::build(&cands, false).unwrap();
        assert_eq!(g.components(), vec![vec![0, 1, 2], vec![3]]);
        assert_eq!(g.degree(1), 2);
    }
}
