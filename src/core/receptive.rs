//! Receptive-field extraction from raw encoder weights.
//!
//! For a hidden cell `(hx, hy, hz)` the visible layer is sampled over a
//! `diam x diam` window centred on the projection of the cell's column,
//! `diam = 2 * radius + 1`. The output always has the unclamped window size;
//! window positions that fall outside the visible layer stay zero.
//!
//! Output layout: entry `(ox, oy, vc)` is at `vc + vz * (oy + diam * ox)`.

use crate::model::{address2, project, EncoderKind, Int3, VisibleLayer};
use crate::protocol::Field;

/// Weight index for an encoder reading raw input.
///
/// Visible channel nested inside the window offset, hidden channel innermost:
/// `hz + hz_size * (vc + vz * (oy + diam * (ox + diam * column)))`.
#[inline]
pub fn raw_input_weight_index(
    hidden_size: Int3,
    vz: i32,
    diam: i32,
    hidden_column: usize,
    offset: (i32, i32),
    vc: i32,
    hz: i32,
) -> usize {
    let partial = vz as usize
        * (offset.1 as usize + diam as usize * (offset.0 as usize + diam as usize * hidden_column));
    hz as usize + hidden_size.z as usize * (vc as usize + partial)
}

/// Weight index for an encoder reading another encoder's hidden state.
///
/// Visible channel outside the window offset, hidden channel innermost:
/// `hz + hz_size * (oy + diam * (ox + diam * (vc + vz * column)))`.
#[inline]
pub fn encoder_weight_index(
    hidden_size: Int3,
    vz: i32,
    diam: i32,
    hidden_column: usize,
    offset: (i32, i32),
    vc: i32,
    hz: i32,
) -> usize {
    let outer = vc as usize + vz as usize * hidden_column;
    hz as usize
        + hidden_size.z as usize
            * (offset.1 as usize + diam as usize * (offset.0 as usize + diam as usize * outer))
}

/// Number of weights a visible layer must hold for an encoder of `hidden_size`.
pub fn expected_weight_count(hidden_size: Int3, layer: &VisibleLayer<'_>) -> usize {
    let diam = layer.desc.diam().max(0) as usize;
    hidden_size.volume() * diam * diam * layer.desc.size.z.max(0) as usize
}

/// A quantized patch and its `(diam, diam, channels)` size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptiveField {
    pub size: Int3,
    pub data: Vec<u8>,
}

impl ReceptiveField {
    pub fn into_field(self, name: impl Into<String>) -> Field {
        Field::new(name, self.size, self.data)
    }
}

/// Extract the receptive field of hidden cell `pos` over one visible layer.
///
/// # Panics
///
/// The caller guarantees `pos` lies inside `hidden_size` and that the weight
/// store matches the layer descriptor. Either violation is a bug in the caller
/// and panics.
pub fn extract(
    kind: EncoderKind,
    hidden_size: Int3,
    layer: &VisibleLayer<'_>,
    pos: Int3,
) -> ReceptiveField {
    let desc = layer.desc;
    assert!(
        hidden_size.contains(pos),
        "hidden position {pos:?} outside hidden size {hidden_size:?}"
    );
    assert!(
        desc.radius >= 0 && desc.size.x > 0 && desc.size.y > 0 && desc.size.z > 0,
        "invalid visible layer descriptor {desc:?}"
    );
    assert_eq!(
        layer.weights.len(),
        expected_weight_count(hidden_size, layer),
        "weight store does not match radius {} / channels {} for hidden size {hidden_size:?}",
        desc.radius,
        desc.size.z
    );

    let diam = desc.diam();
    let vz = desc.size.z;
    let hidden_column = address2(pos.x, pos.y, hidden_size.y);

    let center = (
        project(pos.x, desc.size.x, hidden_size.x),
        project(pos.y, desc.size.y, hidden_size.y),
    );
    let lower = (center.0 - desc.radius, center.1 - desc.radius);
    let iter_lower = (lower.0.max(0), lower.1.max(0));
    let iter_upper = (
        (center.0 + desc.radius).min(desc.size.x - 1),
        (center.1 + desc.radius).min(desc.size.y - 1),
    );

    let index_of = match kind {
        EncoderKind::RawInput => raw_input_weight_index,
        EncoderKind::EncoderOfEncoder => encoder_weight_index,
    };

    let mut data = vec![0u8; (diam * diam * vz) as usize];

    for ix in iter_lower.0..=iter_upper.0 {
        for iy in iter_lower.1..=iter_upper.1 {
            let offset = (ix - lower.0, iy - lower.1);
            let out_start = (vz * (offset.1 + diam * offset.0)) as usize;

            for vc in 0..vz {
                let wi = index_of(hidden_size, vz, diam, hidden_column, offset, vc, pos.z);
                data[out_start + vc as usize] = layer.weights[wi];
            }
        }
    }

    ReceptiveField {
        size: Int3::new(diam, diam, vz),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VisibleLayerDesc;

    /// Weight store where every entry encodes its own index (mod 251).
    fn indexed_weights(hidden: Int3, desc: VisibleLayerDesc) -> Vec<u8> {
        let n = hidden.volume() * (desc.diam() * desc.diam() * desc.size.z) as usize;
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn radius_zero_is_single_lookup_at_projected_center() {
        let hidden = Int3::new(4, 4, 3);
        let desc = VisibleLayerDesc {
            size: Int3::new(8, 8, 2),
            radius: 0,
        };
        let weights = indexed_weights(hidden, desc);
        let layer = VisibleLayer {
            desc,
            weights: &weights,
        };
        let pos = Int3::new(2, 1, 2);
        let column = address2(2, 1, 4);

        for kind in [EncoderKind::RawInput, EncoderKind::EncoderOfEncoder] {
            let rf = extract(kind, hidden, &layer, pos);
            assert_eq!(rf.size, Int3::new(1, 1, 2));
            for vc in 0..2 {
                let wi = match kind {
                    EncoderKind::RawInput => {
                        raw_input_weight_index(hidden, 2, 1, column, (0, 0), vc, 2)
                    }
                    EncoderKind::EncoderOfEncoder => {
                        encoder_weight_index(hidden, 2, 1, column, (0, 0), vc, 2)
                    }
                };
                assert_eq!(rf.data[vc as usize], weights[wi]);
            }
        }
    }

    #[test]
    fn variant_formulas_differ_in_channel_nesting() {
        let hidden = Int3::new(2, 2, 3);
        // diam 3, 2 visible channels, column 1, offset (1, 2), vc 1, hz 2
        let a = raw_input_weight_index(hidden, 2, 3, 1, (1, 2), 1, 2);
        let b = encoder_weight_index(hidden, 2, 3, 1, (1, 2), 1, 2);
        // A: 2 + 3 * (1 + 2 * (2 + 3 * (1 + 3 * 1))) = 2 + 3 * (1 + 2 * 14) = 89
        assert_eq!(a, 89);
        // B: 2 + 3 * (2 + 3 * (1 + 3 * (1 + 2 * 1))) = 2 + 3 * (2 + 3 * 10) = 98
        assert_eq!(b, 98);
    }

    #[test]
    fn both_variants_stay_inside_weight_store() {
        let hidden = Int3::new(3, 2, 4);
        let desc = VisibleLayerDesc {
            size: Int3::new(6, 5, 3),
            radius: 2,
        };
        let weights = indexed_weights(hidden, desc);
        let layer = VisibleLayer {
            desc,
            weights: &weights,
        };
        for kind in [EncoderKind::RawInput, EncoderKind::EncoderOfEncoder] {
            for x in 0..3 {
                for y in 0..2 {
                    for z in 0..4 {
                        let rf = extract(kind, hidden, &layer, Int3::new(x, y, z));
                        assert_eq!(rf.data.len(), 5 * 5 * 3);
                    }
                }
            }
        }
    }

    #[test]
    fn border_window_is_zero_filled_outside_visible_layer() {
        let hidden = Int3::new(4, 4, 1);
        let desc = VisibleLayerDesc {
            size: Int3::new(4, 4, 1),
            radius: 1,
        };
        // Every weight is 200 so any sampled entry is non-zero.
        let weights = vec![200u8; hidden.volume() * 9];
        let layer = VisibleLayer {
            desc,
            weights: &weights,
        };

        for kind in [EncoderKind::RawInput, EncoderKind::EncoderOfEncoder] {
            let rf = extract(kind, hidden, &layer, Int3::new(0, 0, 0));
            assert_eq!(rf.size, Int3::new(3, 3, 1));
            // Centre (0,0): offsets with ox == 0 or oy == 0 fall at -1.
            for ox in 0..3 {
                for oy in 0..3 {
                    let v = rf.data[oy + 3 * ox];
                    if ox == 0 || oy == 0 {
                        assert_eq!(v, 0, "offset ({ox},{oy}) should be clamped out");
                    } else {
                        assert_eq!(v, 200, "offset ({ox},{oy}) should be sampled");
                    }
                }
            }
        }
    }

    #[test]
    fn in_range_entries_carry_their_own_weight() {
        let hidden = Int3::new(2, 2, 2);
        let desc = VisibleLayerDesc {
            size: Int3::new(4, 4, 1),
            radius: 1,
        };
        let weights = indexed_weights(hidden, desc);
        let layer = VisibleLayer {
            desc,
            weights: &weights,
        };
        // Column (1,1) projects to (2,2): the whole window is in range.
        let pos = Int3::new(1, 1, 1);
        let column = address2(1, 1, 2);
        let rf = extract(EncoderKind::EncoderOfEncoder, hidden, &layer, pos);
        for ox in 0..3 {
            for oy in 0..3 {
                let wi = encoder_weight_index(hidden, 1, 3, column, (ox, oy), 0, 1);
                assert_eq!(rf.data[(oy + 3 * ox) as usize], weights[wi]);
            }
        }
    }

    #[test]
    #[should_panic(expected = "weight store does not match")]
    fn mismatched_weight_store_is_a_contract_violation() {
        let hidden = Int3::new(2, 2, 2);
        let desc = VisibleLayerDesc {
            size: Int3::new(4, 4, 3),
            radius: 1,
        };
        let weights = vec![0u8; 10];
        let layer = VisibleLayer {
            desc,
            weights: &weights,
        };
        let _ = extract(EncoderKind::RawInput, hidden, &layer, Int3::new(0, 0, 0));
    }

    #[test]
    fn into_field_keeps_size_and_data() {
        let rf = ReceptiveField {
            size: Int3::new(1, 1, 2),
            data: vec![3, 4],
        };
        let f = rf.into_field("field 0");
        assert_eq!(f.name, "field 0");
        assert_eq!(f.size, Int3::new(1, 1, 2));
        assert_eq!(f.data, vec![3, 4]);
    }
}
