//! Ground truth oracle for simulation.
//!
//! The Oracle owns the "God's eye view" of an event:
//! - Helical particles from the interaction point
//! - Hit generation on every layer they cross (smeared, with inefficiency)
//! - Noise and corrupt hits
//! - The truth map from space point to producing particle(s)

use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use trackfinder_core::SpacePointStore;
use trackfinder_env::{EventId, InMemorySource, LayerId, SensorId, SpacePoint, SpacePointId, Subsystem};

use crate::detector::{DetectorLayer, DetectorLayout};

/// Curvature constant: pt [GeV] = 0.003 · B [T] · R [cm].
const CURVATURE: f64 = 0.003;

/// A charged particle from the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: u32,
    /// Transverse momentum in GeV
    pub pt: f64,
    /// Initial azimuth
    pub phi0: f64,
    pub tan_lambda: f64,
    pub charge: i8,
}

impl Particle {
    /// Radius of curvature in cm.
    pub fn radius(&self, b_field: f64) -> f64 {
        self.pt / (CURVATURE * b_field)
    }

    /// Crossing with the cylinder of transverse radius `r` on the outgoing arc.
    ///
    /// Negative particles turn counter-clockwise for a positive field.
    pub fn intersect(&self, r: f64, b_field: f64) -> Option<Vector3<f64>> {
        let big_r = self.radius(b_field);
        if r <= 0.0 || r > 2.0 * big_r {
            return None;
        }
        let turn = 2.0 * (r / (2.0 * big_r)).asin();
        let side = if self.charge < 0 { 1.0 } else { -1.0 };
        let (x, y) = (big_r * turn.sin(), side * big_r * (1.0 - turn.cos()));
        let (s, c) = self.phi0.sin_cos();
        Some(Vector3::new(c * x - s * y, s * x + c * y, self.tan_lambda * big_r * turn))
    }
}

/// Truth record of one generated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub event: EventId,
    pub particles: Vec<Particle>,
    pub points: Vec<SpacePoint>,
    /// Producing particles of each point; empty for noise
    pub truth: BTreeMap<SpacePointId, Vec<u32>>,
    /// Points injected with a non-finite position
    pub corrupt: Vec<SpacePointId>,
}

impl SimEvent {
    /// Store over the points of the given subsystems.
    pub fn store(&self, subsystems: &[Subsystem]) -> SpacePointStore {
        SpacePointStore::new(
            self.points
                .iter()
                .filter(|p| subsystems.contains(&p.subsystem))
                .cloned(),
        )
    }

    /// Source serving this event, one slot per subsystem.
    pub fn source(&self, subsystems: &[Subsystem]) -> InMemorySource {
        let mut source = InMemorySource::new();
        for &subsystem in subsystems {
            let points = self.points.iter().filter(|p| p.subsystem == subsystem).cloned().collect();
            source.insert(self.event, subsystem, points);
        }
        source
    }

    pub fn particles_of(&self, id: SpacePointId) -> &[u32] {
        self.truth.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Points produced by `particle`, inner → outer.
    pub fn hits_of(&self, particle: u32) -> Vec<&SpacePoint> {
        let mut hits: Vec<&SpacePoint> = self
            .points
            .iter()
            .filter(|p| self.particles_of(p.id).contains(&particle))
            .collect();
        hits.sort_by_key(|p| p.layer);
        hits
    }

    /// Attribute the hit of `particle` on `layer` to `other` as well, dropping
    /// `other`'s own hit there. Returns the shared point.
    pub fn share_hit(&mut self, particle: u32, other: u32, layer: LayerId) -> Option<SpacePointId> {
        let shared = self.hits_of(particle).into_iter().find(|p| p.layer == layer)?.id;
        let own = self.hits_of(other).into_iter().find(|p| p.layer == layer).map(|p| p.id);
        if let Some(own) = own {
            self.points.retain(|p| p.id != own);
            self.truth.remove(&own);
        }
        self.truth.entry(shared).or_default().push(other);
        Some(shared)
    }

    /// Drop the hit of `particle` on `layer`.
    pub fn drop_hit(&mut self, particle: u32, layer: LayerId) {
        if let Some(id) = self.hits_of(particle).into_iter().find(|p| p.layer == layer).map(|p| p.id) {
            self.points.retain(|p| p.id != id);
            self.truth.remove(&id);
        }
    }
}

/// The Oracle - spawns particles and generates events from them.
pub struct Oracle {
    /// RNG for particles, smearing and noise
    rng: ChaCha8Rng,

    layout: DetectorLayout,

    /// Solenoid field in T
    b_field: f64,

    particles: Vec<Particle>,

    /// Uniform noise hits per layer
    noise_per_layer: usize,

    /// Hits with a NaN coordinate per event
    corrupt_hits: usize,

    next_event: u64,
}

impl Oracle {
    /// Creates a new Oracle with the given seed and a 1.5 T field.
    pub fn new(seed: u64, layout: DetectorLayout) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            layout,
            b_field: 1.5,
            particles: Vec::new(),
            noise_per_layer: 0,
            corrupt_hits: 0,
            next_event: 0,
        }
    }

    pub fn with_b_field(mut self, tesla: f64) -> Self {
        self.b_field = tesla;
        self
    }

    pub fn set_noise(&mut self, hits_per_layer: usize) {
        self.noise_per_layer = hits_per_layer;
    }

    pub fn set_corrupt_hits(&mut self, count: usize) {
        self.corrupt_hits = count;
    }

    pub fn layout(&self) -> &DetectorLayout {
        &self.layout
    }

    pub fn b_field(&self) -> f64 {
        self.b_field
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Spawns a particle and returns its ID.
    pub fn spawn_particle(&mut self, pt: f64, phi0: f64, tan_lambda: f64, charge: i8) -> u32 {
        let id = self.particles.len() as u32;
        self.particles.push(Particle {
            id,
            pt,
            phi0,
            tan_lambda,
            charge,
        });
        id
    }

    /// Spawns `n` particles with pt in [0.3, 2] GeV, any azimuth, |tanλ| < 0.5.
    pub fn spawn_random(&mut self, n: usize) {
        for _ in 0..n {
            let pt = self.rng.gen_range(0.3..2.0);
            let phi0 = self.rng.gen_range(-PI..PI);
            let tan_lambda = self.rng.gen_range(-0.5..0.5);
            let charge = if self.rng.gen_bool(0.5) { 1 } else { -1 };
            self.spawn_particle(pt, phi0, tan_lambda, charge);
        }
    }

    /// Forget all particles.
    pub fn clear_particles(&mut self) {
        self.particles.clear();
    }

    /// Intersect every particle with every layer and add noise.
    pub fn generate_event(&mut self) -> SimEvent {
        let event = EventId(self.next_event);
        self.next_event += 1;

        let mut points = Vec::new();
        let mut truth = BTreeMap::new();
        let mut next_id = 0u32;
        let layers = self.layout.layers.clone();

        for particle in self.particles.clone() {
            for layer in &layers {
                let Some(exact) = particle.intersect(layer.radius, self.b_field) else {
                    break;
                };
                if exact.z.abs() > layer.half_length {
                    break;
                }
                if !self.rng.gen_bool(layer.efficiency.clamp(0.0, 1.0)) {
                    continue;
                }
                let id = SpacePointId(next_id);
                next_id += 1;
                points.push(self.measure(id, exact, layer));
                truth.insert(id, vec![particle.id]);
            }
        }

        for layer in &layers {
            for _ in 0..self.noise_per_layer {
                let phi = self.rng.gen_range(-PI..PI);
                let z = self.rng.gen_range(-layer.half_length..layer.half_length);
                let exact = Vector3::new(layer.radius * phi.cos(), layer.radius * phi.sin(), z);
                points.push(self.measure(SpacePointId(next_id), exact, layer));
                next_id += 1;
            }
        }

        // Corrupt hits need a layer to sit on
        let corrupt_hits = if layers.is_empty() { 0 } else { self.corrupt_hits };
        let mut corrupt = Vec::with_capacity(corrupt_hits);
        for _ in 0..corrupt_hits {
            let layer = &layers[self.rng.gen_range(0..layers.len())];
            let id = SpacePointId(next_id);
            next_id += 1;
            let mut point = self.measure(id, Vector3::new(layer.radius, 0.0, 0.0), layer);
            point.position.y = f64::NAN;
            points.push(point);
            corrupt.push(id);
        }

        SimEvent {
            event,
            particles: self.particles.clone(),
            points,
            truth,
            corrupt,
        }
    }

    /// Smear `exact` along rφ and z with the layer resolution.
    fn measure(&mut self, id: SpacePointId, exact: Vector3<f64>, layer: &DetectorLayer) -> SpacePoint {
        let d_rphi = gaussian(&mut self.rng, layer.sigma_rphi);
        let d_z = gaussian(&mut self.rng, layer.sigma_z);
        let phi = exact.y.atan2(exact.x) + d_rphi / layer.radius;
        let r = exact.xy().norm();
        let position = Vector3::new(r * phi.cos(), r * phi.sin(), exact.z + d_z);

        let (s, c) = phi.sin_cos();
        let var_rphi = layer.sigma_rphi * layer.sigma_rphi;
        let covariance = Matrix3::new(
            var_rphi * s * s,
            -var_rphi * s * c,
            0.0,
            -var_rphi * s * c,
            var_rphi * c * c,
            0.0,
            0.0,
            0.0,
            layer.sigma_z * layer.sigma_z,
        );
        let sensor = SensorId(u32::from(layer.layer.0) * 1000 + ((phi + PI) / (2.0 * PI) * 16.0) as u32);
        SpacePoint::new(id, position, layer.sigma_rphi, layer.layer, sensor, layer.subsystem)
            .with_covariance(covariance)
    }
}

fn gaussian(rng: &mut ChaCha8Rng, sigma: f64) -> f64 {
    match Normal::new(0.0, sigma) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}
