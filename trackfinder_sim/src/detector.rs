//! Toy detector: concentric cylindrical layers around the beam line.

use serde::{Deserialize, Serialize};
use trackfinder_env::{LayerId, Subsystem};

/// One cylindrical layer. Lengths in cm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorLayer {
    pub layer: LayerId,
    pub subsystem: Subsystem,
    pub radius: f64,
    pub half_length: f64,
    /// Resolution along the azimuthal direction
    pub sigma_rphi: f64,
    pub sigma_z: f64,
    /// Probability that a crossing particle leaves a hit
    pub efficiency: f64,
}

/// Layers ordered by radius, layer ids counted from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorLayout {
    pub layers: Vec<DetectorLayer>,
}

impl DetectorLayout {
    /// Build from `(subsystem, radius, half_length, sigma_rphi, sigma_z)` rows, innermost first.
    fn from_rows(rows: &[(Subsystem, f64, f64, f64, f64)]) -> Self {
        let layers = rows
            .iter()
            .enumerate()
            .map(|(i, &(subsystem, radius, half_length, sigma_rphi, sigma_z))| DetectorLayer {
                layer: LayerId(i as u16 + 1),
                subsystem,
                radius,
                half_length,
                sigma_rphi,
                sigma_z,
                efficiency: 1.0,
            })
            .collect();
        Self { layers }
    }

    /// Two pixel layers, four strip layers and eight wire layers.
    pub fn belle_like() -> Self {
        use Subsystem::{Cdc, Pxd, Svd};
        Self::from_rows(&[
            (Pxd, 1.4, 6.0, 0.001, 0.001),
            (Pxd, 2.2, 8.0, 0.001, 0.001),
            (Svd, 3.9, 12.0, 0.002, 0.004),
            (Svd, 8.0, 20.0, 0.002, 0.004),
            (Svd, 10.4, 25.0, 0.002, 0.004),
            (Svd, 13.5, 30.0, 0.002, 0.004),
            (Cdc, 16.8, 60.0, 0.01, 0.1),
            (Cdc, 25.6, 80.0, 0.01, 0.1),
            (Cdc, 36.9, 100.0, 0.01, 0.1),
            (Cdc, 48.0, 110.0, 0.01, 0.1),
            (Cdc, 59.0, 120.0, 0.01, 0.1),
            (Cdc, 70.0, 130.0, 0.01, 0.1),
            (Cdc, 81.0, 140.0, 0.01, 0.1),
            (Cdc, 92.0, 150.0, 0.01, 0.1),
        ])
    }

    /// `n` evenly spaced strip layers from 3 cm outward.
    pub fn uniform(n: usize) -> Self {
        let rows: Vec<_> = (0..n)
            .map(|i| (Subsystem::Svd, 3.0 + 3.0 * i as f64, 30.0, 0.002, 0.004))
            .collect();
        Self::from_rows(&rows)
    }

    /// Same efficiency on every layer.
    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        for l in &mut self.layers {
            l.efficiency = efficiency;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, id: LayerId) -> Option<&DetectorLayer> {
        self.layers.iter().find(|l| l.layer == id)
    }

    pub fn layers_of(&self, subsystem: Subsystem) -> impl Iterator<Item = &DetectorLayer> + '_ {
        self.layers.iter().filter(move |l| l.subsystem == subsystem)
    }

    /// Subsystems present, inner to outer.
    pub fn subsystems(&self) -> Vec<Subsystem> {
        let mut out: Vec<Subsystem> = Vec::new();
        for l in &self.layers {
            if !out.contains(&l.subsystem) {
                out.push(l.subsystem);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belle_like_layout() {
        let d = DetectorLayout::belle_like();
        assert_eq!(d.len(), 14);
        assert_eq!(d.layers_of(Subsystem::Pxd).count(), 2);
        assert_eq!(d.layers_of(Subsystem::Svd).count(), 4);
        assert_eq!(d.layers_of(Subsystem::Cdc).count(), 8);
        assert_eq!(d.subsystems(), vec![Subsystem::Pxd, Subsystem::Svd, Subsystem::Cdc]);
        assert!(d.layers.windows(2).all(|w| w[0].radius < w[1].radius && w[0].layer < w[1].layer));
    }

    #[test]
    fn test_uniform_layout() {
        let d = DetectorLayout::uniform(5).with_efficiency(0.9);
        assert_eq!(d.len(), 5);
        assert_eq!(d.layer(LayerId(5)).map(|l| l.radius), Some(15.0));
        assert!(d.layers.iter().all(|l| l.efficiency == 0.9));
        assert!(d.layer(LayerId(6)).is_none());
    }
}
