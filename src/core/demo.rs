//! Synthetic hierarchy for exercising the telemetry path without a real model.
//!
//! Pre-encoders read a raw input (RGB by default); hierarchy layer 0 reads every
//! pre-encoder's hidden state and each further layer reads the one below it.
//! Weights are random but fixed per seed; winners drift as a travelling wave
//! with a little noise so the viewer has something to watch.

use crate::model::{EncoderView, HierarchyView, Int3, VisibleLayer, VisibleLayerDesc};
use crate::prng::Prng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DemoLayerConfig {
    pub hidden_size: Int3,
    pub radius: i32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DemoConfig {
    pub seed: u64,
    pub input_size: Int3,
    pub num_pre_encoders: usize,
    pub pre_encoder: DemoLayerConfig,
    pub layers: Vec<DemoLayerConfig>,
    /// Probability per column per step of a random winner.
    pub noise: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 123,
            input_size: Int3::new(32, 32, 3),
            num_pre_encoders: 1,
            pre_encoder: DemoLayerConfig {
                hidden_size: Int3::new(16, 16, 16),
                radius: 2,
            },
            layers: vec![
                DemoLayerConfig {
                    hidden_size: Int3::new(8, 8, 32),
                    radius: 2,
                },
                DemoLayerConfig {
                    hidden_size: Int3::new(4, 4, 32),
                    radius: 2,
                },
            ],
            noise: 0.05,
        }
    }
}

/// One encoder: hidden winners plus weights for each visible layer.
#[derive(Debug, Clone)]
pub struct DemoEncoder {
    hidden_size: Int3,
    winners: Vec<u16>,
    visible: Vec<(VisibleLayerDesc, Vec<u8>)>,
}

impl DemoEncoder {
    fn new(hidden_size: Int3, visible_descs: &[VisibleLayerDesc], rng: &mut Prng) -> Self {
        let visible = visible_descs
            .iter()
            .map(|&desc| {
                let diam = desc.diam() as usize;
                let n = hidden_size.volume() * diam * diam * desc.size.z as usize;
                let mut weights = vec![0u8; n];
                rng.fill_bytes(&mut weights);
                (desc, weights)
            })
            .collect();

        Self {
            hidden_size,
            winners: vec![0; hidden_size.area()],
            visible,
        }
    }

    fn advance(&mut self, t: u64, phase: u64, noise: f32, rng: &mut Prng) {
        let column_size = self.hidden_size.z.max(1) as u64;
        let height = self.hidden_size.y.max(1) as usize;
        for (i, w) in self.winners.iter_mut().enumerate() {
            let x = (i / height) as u64;
            let y = (i % height) as u64;
            *w = if rng.chance(noise) {
                rng.below(column_size as usize) as u16
            } else {
                ((x + 2 * y + t + phase) % column_size) as u16
            };
        }
    }
}

impl EncoderView for DemoEncoder {
    fn hidden_size(&self) -> Int3 {
        self.hidden_size
    }

    fn hidden_winners(&self) -> &[u16] {
        &self.winners
    }

    fn num_visible_layers(&self) -> usize {
        self.visible.len()
    }

    fn visible_layer(&self, index: usize) -> VisibleLayer<'_> {
        let (desc, weights) = &self.visible[index];
        VisibleLayer {
            desc: *desc,
            weights,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DemoHierarchy {
    layers: Vec<DemoEncoder>,
}

impl HierarchyView for DemoHierarchy {
    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, index: usize) -> &dyn EncoderView {
        &self.layers[index]
    }
}

/// Pre-encoders plus hierarchy, stepped together.
#[derive(Debug, Clone)]
pub struct DemoModel {
    pre_encoders: Vec<DemoEncoder>,
    hierarchy: DemoHierarchy,
    rng: Prng,
    noise: f32,
    steps: u64,
}

impl DemoModel {
    pub fn new(cfg: &DemoConfig) -> Self {
        let mut rng = Prng::new(cfg.seed);

        let input_desc = VisibleLayerDesc {
            size: cfg.input_size,
            radius: cfg.pre_encoder.radius,
        };
        let pre_encoders: Vec<DemoEncoder> = (0..cfg.num_pre_encoders)
            .map(|_| DemoEncoder::new(cfg.pre_encoder.hidden_size, &[input_desc], &mut rng))
            .collect();

        let mut layers: Vec<DemoEncoder> = Vec::with_capacity(cfg.layers.len());
        for (l, layer_cfg) in cfg.layers.iter().enumerate() {
            let descs: Vec<VisibleLayerDesc> = if l == 0 {
                pre_encoders
                    .iter()
                    .map(|e| VisibleLayerDesc {
                        size: e.hidden_size,
                        radius: layer_cfg.radius,
                    })
                    .collect()
            } else {
                vec![VisibleLayerDesc {
                    size: layers[l - 1].hidden_size,
                    radius: layer_cfg.radius,
                }]
            };
            layers.push(DemoEncoder::new(layer_cfg.hidden_size, &descs, &mut rng));
        }

        let mut model = Self {
            pre_encoders,
            hierarchy: DemoHierarchy { layers },
            rng,
            noise: cfg.noise.clamp(0.0, 1.0),
            steps: 0,
        };
        model.refresh();
        model
    }

    /// Advance one simulation step.
    pub fn step(&mut self) {
        self.steps += 1;
        self.refresh();
    }

    fn refresh(&mut self) {
        let t = self.steps;
        let noise = self.noise;
        for (i, enc) in self.pre_encoders.iter_mut().enumerate() {
            enc.advance(t, i as u64 * 3, noise, &mut self.rng);
        }
        for (i, enc) in self.hierarchy.layers.iter_mut().enumerate() {
            // Higher layers change more slowly.
            enc.advance(t >> (i + 1), i as u64, noise, &mut self.rng);
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn hierarchy(&self) -> &DemoHierarchy {
        &self.hierarchy
    }

    pub fn pre_encoders(&self) -> Vec<&dyn EncoderView> {
        self.pre_encoders
            .iter()
            .map(|e| e as &dyn EncoderView)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receptive::expected_weight_count;

    #[test]
    fn weight_stores_match_descriptors() {
        let model = DemoModel::new(&DemoConfig::default());
        let h = model.hierarchy();
        for enc in model.pre_encoders() {
            for v in 0..enc.num_visible_layers() {
                let vl = enc.visible_layer(v);
                assert_eq!(vl.weights.len(), expected_weight_count(enc.hidden_size(), &vl));
            }
        }
        for l in 0..h.num_layers() {
            let enc = h.layer(l);
            for v in 0..enc.num_visible_layers() {
                let vl = enc.visible_layer(v);
                assert_eq!(vl.weights.len(), expected_weight_count(enc.hidden_size(), &vl));
            }
        }
    }

    #[test]
    fn first_layer_reads_every_pre_encoder() {
        let cfg = DemoConfig {
            num_pre_encoders: 2,
            ..DemoConfig::default()
        };
        let model = DemoModel::new(&cfg);
        assert_eq!(model.hierarchy().layer(0).num_visible_layers(), 2);
        assert_eq!(model.hierarchy().layer(1).num_visible_layers(), 1);
        assert_eq!(
            model.hierarchy().layer(1).visible_layer(0).desc.size,
            Int3::new(8, 8, 32)
        );
    }

    #[test]
    fn winners_stay_inside_columns_across_steps() {
        let mut model = DemoModel::new(&DemoConfig {
            noise: 0.5,
            ..DemoConfig::default()
        });
        for _ in 0..20 {
            model.step();
            for l in 0..model.hierarchy().num_layers() {
                let enc = model.hierarchy().layer(l);
                let cs = enc.hidden_size().z as u16;
                assert_eq!(enc.hidden_winners().len(), enc.hidden_size().area());
                assert!(enc.hidden_winners().iter().all(|&w| w < cs));
            }
        }
        assert_eq!(model.steps(), 20);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let mut a = DemoModel::new(&DemoConfig::default());
        let mut b = DemoModel::new(&DemoConfig::default());
        a.step();
        b.step();
        assert_eq!(
            a.hierarchy().layer(0).hidden_winners(),
            b.hierarchy().layer(0).hidden_winners()
        );
    }
}
