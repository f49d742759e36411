//! Viewer-side render model.
//!
//! Holds the latest decoded [`Snapshot`], one [`LayerView`] per layer and the
//! caret the viewer will send next. Drawing is software rasterization into
//! RGBA canvases; uploading them anywhere is the caller's business.

use crate::grid::GridLayout;
use crate::model::Int3;
use crate::protocol::{Caret, Field, SdrGrid, Snapshot};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RenderConfig {
    pub node_space_size: f32,
    pub edge_radius: f32,
    pub node_outer_ratio: f32,
    pub node_inner_ratio: f32,
    pub background_color0: Color,
    pub background_color1: Color,
    pub node_outer_color: Color,
    pub node_inner_color: Color,
    pub node_inner_color_highlight: Color,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            node_space_size: 8.0,
            edge_radius: 2.0,
            node_outer_ratio: 0.85,
            node_inner_ratio: 0.75,
            background_color0: Color::rgb(98, 98, 98),
            background_color1: Color::rgb(168, 168, 168),
            node_outer_color: Color::rgb(64, 64, 64),
            node_inner_color: Color::rgb(255, 0, 0),
            node_inner_color_highlight: Color::rgb(0, 255, 0),
        }
    }
}

/// RGBA pixel buffer, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[(y * self.width + x) as usize])
    }

    fn set(&mut self, x: u32, y: u32, c: Color) {
        self.pixels[(y * self.width + x) as usize] = c;
    }

    /// Pixel index range whose centres fall in `[lo, hi)`, clipped to `len`.
    fn span(lo: f32, hi: f32, len: u32) -> std::ops::Range<u32> {
        let start = (lo - 0.5).ceil().max(0.0) as u32;
        let end = ((hi - 0.5).ceil().max(0.0) as u32).min(len);
        start.min(end)..end
    }

    /// Fill pixels whose centres lie inside the rectangle.
    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, c: Color) {
        for py in Self::span(y, y + h, self.height) {
            for px in Self::span(x, x + w, self.width) {
                self.set(px, py, c);
            }
        }
    }

    /// Fill pixels whose centres lie inside the disc.
    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, c: Color) {
        let r2 = radius * radius;
        for py in Self::span(cy - radius, cy + radius + 1.0, self.height) {
            for px in Self::span(cx - radius, cx + radius + 1.0, self.width) {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.set(px, py, c);
                }
            }
        }
    }

    /// The same image upside down; this is how a layer canvas is displayed.
    pub fn flipped_vertically(&self) -> Canvas {
        let w = self.width as usize;
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks_exact(w.max(1)).rev() {
            pixels.extend_from_slice(row);
        }
        Canvas {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// Draw state for one layer.
#[derive(Debug, Clone)]
pub struct LayerView {
    layout: GridLayout,
    winners: Vec<u16>,
    /// Node coordinate set by the pointer, if any.
    highlight: Option<(u32, u32)>,
    /// `(cx, cy, sub_index)` of the drawn cell matching `highlight`.
    highlighted: Int3,
}

impl LayerView {
    pub fn new(grid: &SdrGrid, node_space_size: f32) -> Self {
        Self {
            layout: GridLayout::for_grid(grid, node_space_size),
            winners: grid.winners.clone(),
            highlight: None,
            highlighted: Caret::NO_CELL,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    fn matches(&self, grid: &SdrGrid) -> bool {
        self.layout.width() == grid.width as u32
            && self.layout.height() == grid.height as u32
            && self.layout.column_size() == grid.column_size as u32
    }

    pub fn set_winners(&mut self, winners: &[u16]) {
        self.winners.clear();
        self.winners.extend_from_slice(winners);
    }

    fn winner_at(&self, cx: u32, cy: u32) -> Option<u16> {
        self.winners
            .get((cy + cx * self.layout.height()) as usize)
            .copied()
    }

    /// Set the highlight from a displayed pixel. Pixels off the canvas clear it.
    pub fn set_highlight_from_pixel(&mut self, px: f32, py: f32) {
        self.highlight = self.layout.hit_node(px, py);
    }

    pub fn set_highlight(&mut self, node: Option<(u32, u32)>) {
        self.highlight = node;
    }

    pub fn clear_highlight(&mut self) {
        self.highlight = None;
    }

    pub fn highlight(&self) -> Option<(u32, u32)> {
        self.highlight
    }

    /// Cell resolved by the last [`LayerView::draw`], or `(-1, -1, -1)`.
    pub fn highlighted_cell(&self) -> Int3 {
        self.highlighted
    }

    /// Rasterize the layer (raster orientation) and resolve the highlight.
    pub fn draw(&mut self, cfg: &RenderConfig) -> Canvas {
        let (w, h) = self.layout.canvas_size();
        let mut canvas = Canvas::new(w, h);
        self.highlighted = Caret::NO_CELL;

        for cx in 0..self.layout.width() {
            for cy in 0..self.layout.height() {
                self.draw_column(&mut canvas, cfg, cx, cy);
            }
        }

        canvas
    }

    fn draw_column(&mut self, canvas: &mut Canvas, cfg: &RenderConfig, cx: u32, cy: u32) {
        let layout = self.layout;
        let r = layout.tile_size();
        let e = cfg.edge_radius;
        let ns = layout.node_space_size();
        let (ox, oy) = layout.tile_origin(cx, cy);

        let background = if GridLayout::is_odd(cx, cy) {
            cfg.background_color1
        } else {
            cfg.background_color0
        };

        // Rounded tile: two overlapping rectangles plus corner discs.
        canvas.fill_rect(ox, oy + e, r, r - e * 2.0, background);
        canvas.fill_rect(ox + e, oy, r - e * 2.0, r, background);
        for (kx, ky) in [(e, e), (r - e, e), (r - e, r - e), (e, r - e)] {
            canvas.fill_circle(ox + kx, oy + ky, e, background);
        }

        let outer_radius = ns * cfg.node_outer_ratio * 0.5;
        let inner_radius = outer_radius * cfg.node_inner_ratio;
        let winner = self.winner_at(cx, cy).map(u32::from);
        let root = layout.root_column_size();

        for sx in 0..root {
            for sy in 0..root {
                if !layout.is_valid_sub_cell(sx, sy) {
                    continue;
                }
                let sub_index = layout.sub_index(sx, sy);
                let (nx, ny) = layout.sub_cell_origin(cx, cy, sx, sy);
                let (px, py) = (nx + e * 2.0, ny + e * 2.0);

                canvas.fill_circle(px, py, outer_radius, cfg.node_outer_color);

                let node = (cx * root + sx, cy * root + sy);
                let highlight = self.highlight == Some(node);
                if highlight {
                    self.highlighted = Int3::new(cx as i32, cy as i32, sub_index as i32);
                }

                if highlight {
                    canvas.fill_circle(px, py, inner_radius, cfg.node_inner_color_highlight);
                } else if winner == Some(sub_index) {
                    canvas.fill_circle(px, py, inner_radius, cfg.node_inner_color);
                }
            }
        }
    }
}

/// Grayscale or RGB image of one field, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 3]>,
}

/// Convert a field to an image.
///
/// Empty fields become a single black pixel. With `as_rgb` a 3-channel field
/// is shown in colour; otherwise channel `z` is shown in grayscale.
pub fn field_image(field: &Field, z: i32, as_rgb: bool) -> FieldImage {
    let size = field.size;
    if field.is_empty() || field.data.len() != size.volume() {
        return FieldImage {
            width: 1,
            height: 1,
            pixels: vec![[0, 0, 0]],
        };
    }

    let (w, h, d) = (size.x as usize, size.y as usize, size.z as usize);
    let z = (z.max(0) as usize).min(d - 1);
    let mut pixels = vec![[0u8; 3]; w * h];

    for x in 0..w {
        for y in 0..h {
            let base = d * (y + h * x);
            pixels[y * w + x] = if as_rgb && d == 3 {
                [field.data[base], field.data[base + 1], field.data[base + 2]]
            } else {
                let v = field.data[base + z];
                [v, v, v]
            };
        }
    }

    FieldImage {
        width: w as u32,
        height: h as u32,
        pixels,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected!",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Disconnected => "Disconnected.",
        }
    }
}

/// Everything the viewer shows, plus the caret it will send next.
#[derive(Debug, Clone, Default)]
pub struct ViewerState {
    config: RenderConfig,
    status: ConnectionStatus,
    snapshot: Option<Snapshot>,
    layers: Vec<LayerView>,
    field_z: Vec<i32>,
    caret: Caret,
    /// Layer currently being pointed at with the select button held.
    selecting: Option<usize>,
}

impl ViewerState {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Losing the connection drops every piece of render state.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        if status == ConnectionStatus::Disconnected {
            self.snapshot = None;
            self.layers.clear();
            self.field_z.clear();
            self.selecting = None;
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn layers(&self) -> &[LayerView] {
        &self.layers
    }

    pub fn caret(&self) -> Caret {
        self.caret
    }

    /// Take in a freshly decoded snapshot.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let reuse = self.layers.len() == snapshot.grids.len()
            && self
                .layers
                .iter()
                .zip(&snapshot.grids)
                .all(|(view, grid)| view.matches(grid));

        if reuse {
            for (view, grid) in self.layers.iter_mut().zip(&snapshot.grids) {
                view.set_winners(&grid.winners);
            }
        } else {
            let ns = self.config.node_space_size;
            self.layers = snapshot
                .grids
                .iter()
                .map(|g| LayerView::new(g, ns))
                .collect();
            self.selecting = None;
        }

        self.field_z.resize(snapshot.fields.len(), 0);
        for (z, field) in self.field_z.iter_mut().zip(&snapshot.fields) {
            *z = (*z).min(field.size.z - 1).max(0);
        }

        self.snapshot = Some(snapshot);
    }

    /// Pointer held over `layer` at displayed pixel `(px, py)`.
    ///
    /// The next [`ViewerState::render`] turns the highlighted cell into the caret.
    pub fn select(&mut self, layer: usize, px: f32, py: f32) {
        let Some(view) = self.layers.get_mut(layer) else {
            return;
        };
        view.set_highlight_from_pixel(px, py);
        self.selecting = Some(layer);
        for (l, other) in self.layers.iter_mut().enumerate() {
            if l != layer {
                other.clear_highlight();
            }
        }
    }

    /// Pointer left `layer`.
    pub fn leave(&mut self, layer: usize) {
        if let Some(view) = self.layers.get_mut(layer) {
            view.clear_highlight();
        }
        if self.selecting == Some(layer) {
            self.selecting = None;
        }
    }

    /// Draw every layer and return the displayed (flipped) canvases.
    pub fn render(&mut self) -> Vec<Canvas> {
        let cfg = &self.config;

        #[cfg(feature = "parallel")]
        let canvases = self
            .layers
            .par_iter_mut()
            .map(|view| view.draw(cfg).flipped_vertically())
            .collect();

        #[cfg(not(feature = "parallel"))]
        let canvases = self
            .layers
            .iter_mut()
            .map(|view| view.draw(cfg).flipped_vertically())
            .collect();

        if let Some(layer) = self.selecting {
            if let Some(view) = self.layers.get(layer) {
                self.caret = Caret::new(layer as u16, view.highlighted_cell());
            }
        }

        canvases
    }

    /// Adjust the displayed channel of field `index` by a scroll delta.
    pub fn scroll_field(&mut self, index: usize, delta: i32) {
        let Some(depth) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.fields.get(index))
            .map(|f| f.size.z)
        else {
            return;
        };
        if let Some(z) = self.field_z.get_mut(index) {
            *z = z.saturating_add(delta).min(depth - 1).max(0);
        }
    }

    pub fn field_z(&self, index: usize) -> i32 {
        self.field_z.get(index).copied().unwrap_or(0)
    }

    fn caret_on_encoder_layer(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.is_encoder_layer(self.caret.layer as usize))
    }

    /// Images of every field in the current snapshot.
    pub fn field_images(&self) -> Vec<FieldImage> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        let rgb = self.caret_on_encoder_layer();
        snapshot
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| field_image(f, self.field_z(i), rgb))
            .collect()
    }

    /// Hover label for field `index`: `RGB` or the selected channel.
    pub fn field_label(&self, index: usize) -> String {
        let depth = self
            .snapshot
            .as_ref()
            .and_then(|s| s.fields.get(index))
            .map_or(0, |f| f.size.z);
        if (depth == 3 || depth == 6) && self.caret_on_encoder_layer() {
            "RGB".to_string()
        } else {
            format!("Z: {}", self.field_z(index))
        }
    }
}
