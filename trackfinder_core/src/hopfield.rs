//! Conflict resolution: pick a conflict-free subset of high total quality.
//!
//! Candidates without conflicts are taken directly and a two-candidate
//! component keeps its better member. Larger components are relaxed by a
//! Hopfield network and binarised; a deterministic greedy repair then
//! guarantees that no two accepted candidates share a point, whatever the
//! network converged to.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::candidate::CandidateId;
use crate::config::{HopfieldConfig, SelectorStrategy};
use crate::conflict::ConflictGraph;
use crate::error::EventError;
use crate::interrupt::{checkpoint, Interrupt};

/// Activation above which a neuron counts as "on".
pub const ACTIVATION_THRESHOLD: f64 = 0.5;

/// Result of one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOutcome {
    /// Aligned with the candidate list
    pub accepted: Vec<bool>,
    /// Final activations (1/0 for candidates decided outside the network)
    pub activations: Vec<f64>,
    pub rounds: usize,
    pub converged: bool,
    /// Largest activation change of the last round
    pub final_delta: f64,
    /// Candidates dropped by the repair pass
    pub repairs: usize,
    /// Components where the network switched everything off
    pub fallbacks: usize,
}

/// Quality and tie-break identity of one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neuron {
    pub quality: f64,
    pub id: CandidateId,
}

/// Higher quality first, then lower id.
fn rank(a: &Neuron, b: &Neuron) -> Ordering {
    b.quality.total_cmp(&a.quality).then(a.id.cmp(&b.id))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub struct HopfieldSelector<'c> {
    config: &'c HopfieldConfig,
}

impl<'c> HopfieldSelector<'c> {
    pub fn new(config: &'c HopfieldConfig) -> Self {
        Self { config }
    }

    pub fn select(
        &self,
        neurons: &[Neuron],
        graph: &ConflictGraph,
        interrupt: &dyn Interrupt,
    ) -> Result<SelectionOutcome, EventError> {
        match self.config.strategy {
            SelectorStrategy::Greedy => {
                let all: Vec<usize> = (0..neurons.len()).collect();
                let mut accepted = vec![false; neurons.len()];
                greedy_fill(&all, neurons, graph, &mut accepted);
                Ok(SelectionOutcome {
                    activations: accepted.iter().map(|&a| if a { 1.0 } else { 0.0 }).collect(),
                    accepted,
                    rounds: 0,
                    converged: true,
                    final_delta: 0.0,
                    repairs: 0,
                    fallbacks: 0,
                })
            }
            SelectorStrategy::Hopfield => self.hopfield(neurons, graph, interrupt),
        }
    }

    fn hopfield(
        &self,
        neurons: &[Neuron],
        graph: &ConflictGraph,
        interrupt: &dyn Interrupt,
    ) -> Result<SelectionOutcome, EventError> {
        let n = neurons.len();
        let mut activations = vec![0.0; n];
        let mut network: Vec<usize> = Vec::new();
        let mut large_components: Vec<Vec<usize>> = Vec::new();

        for component in graph.components() {
            match component.as_slice() {
                [single] => activations[*single] = 1.0,
                [a, b] => {
                    let winner = if rank(&neurons[*a], &neurons[*b]) == Ordering::Greater { *b } else { *a };
                    activations[winner] = 1.0;
                }
                _ => {
                    network.extend_from_slice(&component);
                    large_components.push(component);
                }
            }
        }

        let relaxation = self.relax(&network, neurons, graph, &mut activations, interrupt)?;

        let mut accepted: Vec<bool> = activations.iter().map(|&x| x > ACTIVATION_THRESHOLD).collect();
        let repairs = repair(&network, neurons, graph, &mut accepted);

        let mut fallbacks = 0;
        for component in &large_components {
            if component.iter().all(|&i| !accepted[i]) {
                greedy_fill(component, neurons, graph, &mut accepted);
                fallbacks += 1;
            }
        }

        if !relaxation.converged {
            debug!(
                "Hopfield network not converged after {} rounds (delta {:.2e})",
                relaxation.rounds, relaxation.final_delta
            );
        }

        Ok(SelectionOutcome {
            accepted,
            activations,
            rounds: relaxation.rounds,
            converged: relaxation.converged,
            final_delta: relaxation.final_delta,
            repairs,
            fallbacks,
        })
    }

    /// Asynchronous updates in a seeded random order.
    fn relax(
        &self,
        network: &[usize],
        neurons: &[Neuron],
        graph: &ConflictGraph,
        x: &mut [f64],
        interrupt: &dyn Interrupt,
    ) -> Result<Relaxation, EventError> {
        if network.is_empty() {
            return Ok(Relaxation {
                rounds: 0,
                converged: true,
                final_delta: 0.0,
            });
        }
        let c = self.config;
        let max_quality = network.iter().map(|&i| neurons[i].quality).fold(0.0, f64::max);
        for &i in network {
            x[i] = if max_quality > 0.0 {
                neurons[i].quality / max_quality
            } else {
                0.0
            };
        }

        let mut rng = ChaCha8Rng::seed_from_u64(c.hopfield_seed);
        let mut order = network.to_vec();
        let mut temperature = c.hopfield_temperature;
        let mut result = Relaxation {
            rounds: 0,
            converged: false,
            final_delta: f64::INFINITY,
        };

        for round in 1..=c.hopfield_rounds {
            checkpoint(interrupt, "hopfield round")?;
            order.shuffle(&mut rng);
            let mut delta: f64 = 0.0;
            for &i in &order {
                let inhibition: f64 = graph.neighbours(i).iter().map(|&(j, w)| w * x[j]).sum();
                let net = neurons[i].quality - c.hopfield_damping * inhibition;
                let updated = sigmoid(temperature * net);
                delta = delta.max((updated - x[i]).abs());
                x[i] = updated;
            }
            temperature *= c.hopfield_anneal;
            result.rounds = round;
            result.final_delta = delta;
            if delta < c.hopfield_convergence {
                result.converged = true;
                break;
            }
        }
        Ok(result)
    }
}

struct Relaxation {
    rounds: usize,
    converged: bool,
    final_delta: f64,
}

/// Drop accepted members of `scope` that conflict with a better accepted one.
fn repair(scope: &[usize], neurons: &[Neuron], graph: &ConflictGraph, accepted: &mut [bool]) -> usize {
    let mut on: Vec<usize> = scope.iter().copied().filter(|&i| accepted[i]).collect();
    on.sort_by(|&a, &b| rank(&neurons[a], &neurons[b]));
    for &i in &on {
        accepted[i] = false;
    }
    let mut repairs = 0;
    for i in on {
        if graph.neighbours(i).iter().any(|&(j, _)| accepted[j]) {
            repairs += 1;
        } else {
            accepted[i] = true;
        }
    }
    repairs
}

/// Accept members of `scope` best first unless they conflict with an accepted one.
fn greedy_fill(scope: &[usize], neurons: &[Neuron], graph: &ConflictGraph, accepted: &mut [bool]) {
    let mut order = scope.to_vec();
    order.sort_by(|&a, &b| rank(&neurons[a], &neurons[b]));
    for i in order {
        if !graph.neighbours(i).iter().any(|&(j, _)| accepted[j]) {
            accepted[i] = true;
        }
    }
}
