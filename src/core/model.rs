//! Read-only view of a running hierarchy.
//!
//! The telemetry server never owns or mutates the model; it borrows it once per
//! tick through these traits. Any hierarchy implementation (including the
//! synthetic one in [`crate::demo`]) only needs to expose its hidden state and
//! the raw weight storage of each visible layer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Integer 3-vector used for hidden/visible sizes and cell positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Int3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Int3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Product of the three components (0 if any component is non-positive).
    pub fn volume(self) -> usize {
        if self.x <= 0 || self.y <= 0 || self.z <= 0 {
            return 0;
        }
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Number of columns in the x/y plane.
    pub fn area(self) -> usize {
        if self.x <= 0 || self.y <= 0 {
            return 0;
        }
        self.x as usize * self.y as usize
    }

    /// True when `pos` lies inside `[0, self)` on every axis.
    pub fn contains(self, pos: Int3) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && pos.x < self.x
            && pos.y < self.y
            && pos.z < self.z
    }
}

/// Flat index of column `(x, y)` in a grid of the given size.
///
/// Columns are laid out column-major: `y` varies fastest.
#[inline]
pub fn address2(x: i32, y: i32, size_y: i32) -> usize {
    (y + x * size_y) as usize
}

/// Project a hidden column onto the visible grid.
///
/// Uses exact integer arithmetic so the result is `floor(h * visible / hidden)`.
#[inline]
pub fn project(h: i32, visible: i32, hidden: i32) -> i32 {
    debug_assert!(hidden > 0);
    ((h as i64 * visible as i64) / hidden as i64) as i32
}

/// Shape of one visible (input) layer feeding an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VisibleLayerDesc {
    pub size: Int3,
    pub radius: i32,
}

impl VisibleLayerDesc {
    pub fn diam(&self) -> i32 {
        self.radius * 2 + 1
    }
}

/// Borrowed visible layer: its descriptor plus the raw quantized weights.
#[derive(Debug, Clone, Copy)]
pub struct VisibleLayer<'a> {
    pub desc: VisibleLayerDesc,
    pub weights: &'a [u8],
}

/// How an encoder's weight storage is laid out.
///
/// Encoders that read raw input and encoders that read another encoder's
/// hidden state nest the visible channel differently, so receptive fields
/// must be addressed with a different formula for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EncoderKind {
    /// First-stage encoder over raw input (image encoder).
    RawInput,
    /// Hierarchy layer encoder over a lower encoder's hidden state.
    EncoderOfEncoder,
}

/// Read-only accessors for one encoder.
pub trait EncoderView {
    fn hidden_size(&self) -> Int3;

    /// Winning cell per column, `hidden_size().area()` entries.
    fn hidden_winners(&self) -> &[u16];

    fn num_visible_layers(&self) -> usize;

    fn visible_layer(&self, index: usize) -> VisibleLayer<'_>;
}

/// Read-only accessors for a hierarchy of encoder layers.
pub trait HierarchyView {
    fn num_layers(&self) -> usize;

    fn layer(&self, index: usize) -> &dyn EncoderView;
}

/// The pre-encoders followed by the hierarchy layers, as streamed to viewers.
///
/// Layer indices in carets and snapshots address this combined list.
pub struct LayerStack<'a> {
    hierarchy: &'a dyn HierarchyView,
    pre_encoders: &'a [&'a dyn EncoderView],
}

impl<'a> LayerStack<'a> {
    pub fn new(hierarchy: &'a dyn HierarchyView, pre_encoders: &'a [&'a dyn EncoderView]) -> Self {
        Self {
            hierarchy,
            pre_encoders,
        }
    }

    pub fn len(&self) -> usize {
        self.pre_encoders.len() + self.hierarchy.num_layers()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_pre_encoders(&self) -> usize {
        self.pre_encoders.len()
    }

    pub fn get(&self, index: usize) -> Option<(EncoderKind, &'a dyn EncoderView)> {
        if index < self.pre_encoders.len() {
            return Some((EncoderKind::RawInput, self.pre_encoders[index]));
        }
        let l = index - self.pre_encoders.len();
        if l < self.hierarchy.num_layers() {
            Some((EncoderKind::EncoderOfEncoder, self.hierarchy.layer(l)))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EncoderKind, &'a dyn EncoderView)> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_rejects_negative_and_upper_bound() {
        let size = Int3::new(4, 3, 2);
        assert!(size.contains(Int3::new(0, 0, 0)));
        assert!(size.contains(Int3::new(3, 2, 1)));
        assert!(!size.contains(Int3::new(4, 0, 0)));
        assert!(!size.contains(Int3::new(0, 0, -1)));
        assert!(!size.contains(Int3::new(-1, -1, -1)));
    }

    #[test]
    fn project_floors_scaled_coordinate() {
        // 4 hidden columns over 10 visible: 0, 2.5, 5, 7.5
        assert_eq!(project(0, 10, 4), 0);
        assert_eq!(project(1, 10, 4), 2);
        assert_eq!(project(2, 10, 4), 5);
        assert_eq!(project(3, 10, 4), 7);
    }

    #[test]
    fn address2_is_column_major() {
        assert_eq!(address2(0, 0, 5), 0);
        assert_eq!(address2(0, 4, 5), 4);
        assert_eq!(address2(1, 0, 5), 5);
        assert_eq!(address2(2, 3, 5), 13);
    }

    #[test]
    fn volume_of_degenerate_size_is_zero() {
        assert_eq!(Int3::new(3, 0, 2).volume(), 0);
        assert_eq!(Int3::new(3, 2, 2).volume(), 12);
    }
}
