//! Column grid packing.
//!
//! Each column of an SDR layer becomes a square tile holding its cells as a
//! `root x root` block of nodes, `root = ceil(sqrt(column_size))`. Tiles are
//! laid out in raster space with tile `(cx, cy)` at `(cx, cy) * tile_size`.
//!
//! The displayed canvas is the raster canvas flipped vertically, so
//! hit-testing maps increasing screen y to decreasing node rows.

use crate::protocol::SdrGrid;

/// Smallest `r` with `r * r >= column_size`.
pub fn root_column_size(column_size: u32) -> u32 {
    let mut r = (column_size as f64).sqrt() as u32;
    while r * r < column_size {
        r += 1;
    }
    while r > 0 && (r - 1) * (r - 1) >= column_size {
        r -= 1;
    }
    r
}

/// A cell resolved from a displayed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellHit {
    /// Column (tile) coordinates.
    pub column: (u32, u32),
    /// Node within the tile, each in `[0, root)`.
    pub sub: (u32, u32),
    /// `sub.0 + sub.1 * root`, the cell index within the column.
    pub sub_index: u32,
    /// Composite node coordinate `column * root + sub`.
    pub node: (u32, u32),
}

/// Geometry of one layer's canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    width: u32,
    height: u32,
    column_size: u32,
    root: u32,
    node_space_size: f32,
}

impl GridLayout {
    pub fn new(width: u16, height: u16, column_size: u16, node_space_size: f32) -> Self {
        debug_assert!(node_space_size > 0.0);
        Self {
            width: width as u32,
            height: height as u32,
            column_size: column_size as u32,
            root: root_column_size(column_size as u32),
            node_space_size,
        }
    }

    pub fn for_grid(grid: &SdrGrid, node_space_size: f32) -> Self {
        Self::new(grid.width, grid.height, grid.column_size, node_space_size)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn column_size(&self) -> u32 {
        self.column_size
    }

    pub fn root_column_size(&self) -> u32 {
        self.root
    }

    pub fn node_space_size(&self) -> f32 {
        self.node_space_size
    }

    /// Pixel size of one tile edge.
    pub fn tile_size(&self) -> f32 {
        self.node_space_size * self.root as f32
    }

    /// Canvas size in pixels.
    pub fn canvas_size(&self) -> (u32, u32) {
        let r = self.tile_size();
        (
            (self.width as f32 * r).ceil() as u32,
            (self.height as f32 * r).ceil() as u32,
        )
    }

    /// Grid size counted in nodes rather than pixels.
    pub fn size_in_nodes(&self) -> (u32, u32) {
        (self.width * self.root, self.height * self.root)
    }

    /// Raster-space origin of tile `(cx, cy)`.
    pub fn tile_origin(&self, cx: u32, cy: u32) -> (f32, f32) {
        let r = self.tile_size();
        (cx as f32 * r, cy as f32 * r)
    }

    /// Raster-space origin of node `(sx, sy)` inside tile `(cx, cy)`.
    pub fn sub_cell_origin(&self, cx: u32, cy: u32, sx: u32, sy: u32) -> (f32, f32) {
        let (ox, oy) = self.tile_origin(cx, cy);
        (
            ox + sx as f32 * self.node_space_size,
            oy + sy as f32 * self.node_space_size,
        )
    }

    /// Displayed-canvas origin of node `(sx, sy)` inside tile `(cx, cy)`.
    ///
    /// Same as [`GridLayout::sub_cell_origin`] with the node rows flipped.
    pub fn display_sub_cell_origin(&self, cx: u32, cy: u32, sx: u32, sy: u32) -> (f32, f32) {
        let (_, rows) = self.size_in_nodes();
        let ty = cy * self.root + sy;
        let tx = cx * self.root + sx;
        (
            tx as f32 * self.node_space_size,
            (rows - 1 - ty) as f32 * self.node_space_size,
        )
    }

    pub fn sub_index(&self, sx: u32, sy: u32) -> u32 {
        sx + sy * self.root
    }

    /// Nodes past `column_size` in the last rows of a tile are not drawn.
    pub fn is_valid_sub_cell(&self, sx: u32, sy: u32) -> bool {
        sx < self.root && sy < self.root && self.sub_index(sx, sy) < self.column_size
    }

    /// Checkerboard parity for tile backgrounds.
    pub fn is_odd(cx: u32, cy: u32) -> bool {
        (cx % 2) != (cy % 2)
    }

    /// Composite node coordinate under a displayed pixel, before validity checks.
    ///
    /// This is what a pointer sets as the highlight; it may land on a node
    /// slot that holds no cell.
    pub fn hit_node(&self, px: f32, py: f32) -> Option<(u32, u32)> {
        if !(px >= 0.0 && py >= 0.0) {
            return None;
        }
        let (cols, rows) = self.size_in_nodes();
        let nx = (px / self.node_space_size).floor() as u32;
        let ny = (py / self.node_space_size).floor() as u32;
        if nx >= cols || ny >= rows {
            return None;
        }
        Some((nx, rows - ny - 1))
    }

    /// Resolve a displayed pixel to the cell drawn there, if any.
    pub fn hit_test(&self, px: f32, py: f32) -> Option<CellHit> {
        let (tx, ty) = self.hit_node(px, py)?;
        let column = (tx / self.root, ty / self.root);
        let sub = (tx % self.root, ty % self.root);
        if !self.is_valid_sub_cell(sub.0, sub.1) {
            return None;
        }
        Some(CellHit {
            column,
            sub,
            sub_index: self.sub_index(sub.0, sub.1),
            node: (tx, ty),
        })
    }

    /// Iterate all drawable nodes as `(cx, cy, sx, sy)`.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, u32, u32)> + '_ {
        let root = self.root;
        (0..self.width).flat_map(move |cx| {
            (0..self.height).flat_map(move |cy| {
                (0..root).flat_map(move |sx| {
                    (0..root)
                        .filter(move |&sy| self.is_valid_sub_cell(sx, sy))
                        .map(move |sy| (cx, cy, sx, sy))
                })
            })
        })
    }
}
