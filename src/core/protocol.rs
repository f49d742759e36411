//! Wire format shared by the telemetry server and viewers.
//!
//! Two frames, both little-endian with no framing beyond the counts they carry:
//!
//! Caret (viewer -> server), 14 bytes:
//! - layer: u16
//! - x, y, z: i32
//!
//! Snapshot (server -> viewer):
//! - num_layers: u16
//! - num_encoder_layers: u16
//! - num_layers x { width: u16, height: u16, column_size: u16, winners: u16[width*height] }
//! - num_fields: u16
//! - num_fields x { name: [u8; 64], size_x: i32, size_y: i32, size_z: i32, data: u8[x*y*z] }

use crate::model::Int3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Encoded size of a [`Caret`].
pub const CARET_FRAME_LEN: usize = 14;

/// Fixed size of a field name on the wire (ASCII, NUL padded).
pub const FIELD_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated frame: need {needed} bytes, only {available} available")]
    TruncatedFrame { needed: usize, available: usize },

    #[error("{num_encoder_layers} encoder layers declared but only {num_layers} layers")]
    EncoderLayerCount {
        num_encoder_layers: u16,
        num_layers: u16,
    },

    #[error("field {index} has invalid size {size:?}")]
    InvalidFieldSize { index: usize, size: Int3 },

    #[error("layer {layer} column {column}: winner {winner} >= column size {column_size}")]
    WinnerOutOfRange {
        layer: usize,
        column: usize,
        winner: u16,
        column_size: u16,
    },
}

// ─────────────────────────────────────────────────────────────────────────
// Little-endian primitives
// ─────────────────────────────────────────────────────────────────────────

fn put_u16_le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32_le(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Cursor over a borrowed frame. Every read checks the remaining length first.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let needed = self.pos.saturating_add(n);
        if needed > self.buf.len() {
            return Err(ProtocolError::TruncatedFrame {
                needed,
                available: self.buf.len(),
            });
        }
        let s = &self.buf[self.pos..needed];
        self.pos = needed;
        Ok(s)
    }

    fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_int3(&mut self) -> Result<Int3, ProtocolError> {
        Ok(Int3::new(self.read_i32()?, self.read_i32()?, self.read_i32()?))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Caret
// ─────────────────────────────────────────────────────────────────────────

/// Viewer-selected cursor: a layer and a hidden cell within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Caret {
    pub layer: u16,
    pub cell: Int3,
}

impl Caret {
    /// Cell value meaning "no selection".
    pub const NO_CELL: Int3 = Int3::new(-1, -1, -1);

    pub const fn new(layer: u16, cell: Int3) -> Self {
        Self { layer, cell }
    }

    pub fn is_unset(&self) -> bool {
        self.cell == Self::NO_CELL
    }

    pub fn encode(&self) -> [u8; CARET_FRAME_LEN] {
        let mut out = [0u8; CARET_FRAME_LEN];
        out[0..2].copy_from_slice(&self.layer.to_le_bytes());
        out[2..6].copy_from_slice(&self.cell.x.to_le_bytes());
        out[6..10].copy_from_slice(&self.cell.y.to_le_bytes());
        out[10..14].copy_from_slice(&self.cell.z.to_le_bytes());
        out
    }

    /// Decode the first [`CARET_FRAME_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(bytes);
        let layer = r.read_u16()?;
        let cell = r.read_int3()?;
        Ok(Self { layer, cell })
    }
}

impl Default for Caret {
    fn default() -> Self {
        Self::new(0, Self::NO_CELL)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────

/// Winners of one layer's column grid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SdrGrid {
    pub width: u16,
    pub height: u16,
    pub column_size: u16,
    /// One winner per column, column-major (`y + x * height`).
    pub winners: Vec<u16>,
}

impl SdrGrid {
    pub fn new(width: u16, height: u16, column_size: u16, winners: Vec<u16>) -> Self {
        debug_assert_eq!(winners.len(), width as usize * height as usize);
        Self {
            width,
            height,
            column_size,
            winners,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn winner_at(&self, x: u16, y: u16) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.winners
            .get(y as usize + x as usize * self.height as usize)
            .copied()
    }

    pub fn validate(&self, layer: usize) -> Result<(), ProtocolError> {
        for (column, &winner) in self.winners.iter().enumerate() {
            if winner >= self.column_size {
                return Err(ProtocolError::WinnerOutOfRange {
                    layer,
                    column,
                    winner,
                    column_size: self.column_size,
                });
            }
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        6 + 2 * self.winners.len()
    }
}

/// Quantized diagnostic tensor, typically a receptive field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Field {
    pub name: String,
    pub size: Int3,
    /// `size.x * size.y * size.z` bytes; entry `(x, y, z)` is at `z + size.z * (y + size.y * x)`.
    pub data: Vec<u8>,
}

impl Field {
    pub fn new(name: impl Into<String>, size: Int3, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), size.volume());
        Self {
            name: name.into(),
            size,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.volume() == 0
    }

    /// Name as written on the wire: truncated to at most 64 bytes on a
    /// character boundary and NUL padded.
    pub fn wire_name(&self) -> [u8; FIELD_NAME_LEN] {
        let mut out = [0u8; FIELD_NAME_LEN];
        let mut n = self.name.len().min(FIELD_NAME_LEN);
        while !self.name.is_char_boundary(n) {
            n -= 1;
        }
        out[..n].copy_from_slice(&self.name.as_bytes()[..n]);
        out
    }

    fn encoded_len(&self) -> usize {
        FIELD_NAME_LEN + 12 + self.data.len()
    }
}

fn name_from_wire(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn field_volume(index: usize, size: Int3) -> Result<usize, ProtocolError> {
    let invalid = || ProtocolError::InvalidFieldSize { index, size };
    if size.x < 0 || size.y < 0 || size.z < 0 {
        return Err(invalid());
    }
    (size.x as usize)
        .checked_mul(size.y as usize)
        .and_then(|v| v.checked_mul(size.z as usize))
        .ok_or_else(invalid)
}

/// Everything a viewer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    /// Leading layers that are pre-encoders rather than hierarchy layers.
    pub num_encoder_layers: u16,
    pub grids: Vec<SdrGrid>,
    pub fields: Vec<Field>,
}

impl Snapshot {
    pub fn num_layers(&self) -> usize {
        self.grids.len()
    }

    pub fn is_encoder_layer(&self, layer: usize) -> bool {
        layer < self.num_encoder_layers as usize
    }

    /// Display title: `Pre-encoder N` or `Layer N`.
    pub fn layer_title(&self, layer: usize) -> String {
        let encs = self.num_encoder_layers as usize;
        if layer < encs {
            format!("Pre-encoder {layer}")
        } else {
            format!("Layer {}", layer - encs)
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + 2
            + self.grids.iter().map(SdrGrid::encoded_len).sum::<usize>()
            + 2
            + self.fields.iter().map(Field::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        debug_assert!(self.grids.len() <= u16::MAX as usize);
        debug_assert!(self.fields.len() <= u16::MAX as usize);
        debug_assert!(self.num_encoder_layers as usize <= self.grids.len());

        put_u16_le(out, self.grids.len() as u16);
        put_u16_le(out, self.num_encoder_layers);

        for g in &self.grids {
            put_u16_le(out, g.width);
            put_u16_le(out, g.height);
            put_u16_le(out, g.column_size);
            for &w in &g.winners {
                put_u16_le(out, w);
            }
        }

        put_u16_le(out, self.fields.len() as u16);

        for f in &self.fields {
            out.extend_from_slice(&f.wire_name());
            put_i32_le(out, f.size.x);
            put_i32_le(out, f.size.y);
            put_i32_le(out, f.size.z);
            out.extend_from_slice(&f.data);
        }
    }

    /// Decode a complete snapshot from the start of `bytes`.
    ///
    /// Trailing bytes past the frame are ignored; use [`Snapshot::frame_len`]
    /// to find where the frame ends.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(bytes);

        let num_layers = r.read_u16()?;
        let num_encoder_layers = r.read_u16()?;
        if num_encoder_layers > num_layers {
            return Err(ProtocolError::EncoderLayerCount {
                num_encoder_layers,
                num_layers,
            });
        }
        let num_layers = num_layers as usize;

        let mut grids = Vec::with_capacity(num_layers);
        for layer in 0..num_layers {
            let width = r.read_u16()?;
            let height = r.read_u16()?;
            let column_size = r.read_u16()?;
            let count = width as usize * height as usize;
            let raw = r.take(count * 2)?;
            let winners = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            let grid = SdrGrid {
                width,
                height,
                column_size,
                winners,
            };
            grid.validate(layer)?;
            grids.push(grid);
        }

        let num_fields = r.read_u16()? as usize;
        let mut fields = Vec::with_capacity(num_fields);
        for index in 0..num_fields {
            let name = name_from_wire(r.take(FIELD_NAME_LEN)?);
            let size = r.read_int3()?;
            let volume = field_volume(index, size)?;
            let data = r.take(volume)?.to_vec();
            fields.push(Field { name, size, data });
        }

        Ok(Self {
            num_encoder_layers,
            grids,
            fields,
        })
    }

    /// Length of the snapshot frame at the start of `bytes`, reading only headers.
    ///
    /// Returns [`ProtocolError::TruncatedFrame`] until the whole frame is
    /// buffered. Payload bytes are skipped, not parsed.
    pub fn frame_len(bytes: &[u8]) -> Result<usize, ProtocolError> {
        let mut r = FrameReader::new(bytes);

        let num_layers = r.read_u16()? as usize;
        r.skip(2)?;

        for _ in 0..num_layers {
            let width = r.read_u16()? as usize;
            let height = r.read_u16()? as usize;
            r.skip(2)?;
            r.skip(width * height * 2)?;
        }

        let num_fields = r.read_u16()? as usize;
        for index in 0..num_fields {
            r.skip(FIELD_NAME_LEN)?;
            let size = r.read_int3()?;
            r.skip(field_volume(index, size)?)?;
        }

        Ok(r.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            num_encoder_layers: 1,
            grids: vec![
                SdrGrid::new(2, 3, 4, vec![0, 1, 2, 3, 0, 1]),
                SdrGrid::new(1, 1, 16, vec![15]),
            ],
            fields: vec![
                Field::new("field 0", Int3::new(1, 2, 3), vec![1, 2, 3, 4, 5, 6]),
                Field::new("field 1", Int3::new(0, 0, 0), vec![]),
            ],
        }
    }

    #[test]
    fn caret_frame_is_fourteen_little_endian_bytes() {
        let caret = Caret::new(0x0102, Int3::new(1, -1, 0x01020304));
        let bytes = caret.encode();
        assert_eq!(bytes.len(), CARET_FRAME_LEN);
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[2..6], &[1, 0, 0, 0]);
        assert_eq!(&bytes[6..10], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&bytes[10..14], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(Caret::decode(&bytes).unwrap(), caret);
    }

    #[test]
    fn default_caret_is_unset() {
        let caret = Caret::default();
        assert_eq!(caret.layer, 0);
        assert!(caret.is_unset());
    }

    #[test]
    fn short_caret_is_truncated() {
        let bytes = Caret::default().encode();
        assert_eq!(
            Caret::decode(&bytes[..9]),
            Err(ProtocolError::TruncatedFrame {
                needed: 10,
                available: 9
            })
        );
    }

    #[test]
    fn snapshot_round_trip_preserves_everything() {
        let snap = sample_snapshot();
        let bytes = snap.encode();
        assert_eq!(bytes.len(), snap.encoded_len());
        let back = Snapshot::decode(&bytes).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.num_layers(), 2);
        assert_eq!(back.fields[0].name, "field 0");
    }

    #[test]
    fn snapshot_header_layout() {
        let bytes = sample_snapshot().encode();
        // num_layers, num_encoder_layers, then first grid's width/height/column_size
        assert_eq!(&bytes[0..10], &[2, 0, 1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn every_strict_prefix_is_truncated() {
        let bytes = sample_snapshot().encode();
        for cut in 0..bytes.len() {
            match Snapshot::decode(&bytes[..cut]) {
                Err(ProtocolError::TruncatedFrame { available, .. }) => {
                    assert_eq!(available, cut)
                }
                other => panic!("prefix {cut}: expected truncation, got {other:?}"),
            }
        }
    }

    #[test]
    fn frame_len_matches_encoding_and_ignores_trailing_bytes() {
        let mut bytes = sample_snapshot().encode();
        let n = bytes.len();
        bytes.extend_from_slice(&[9, 9, 9]);
        assert_eq!(Snapshot::frame_len(&bytes), Ok(n));
        assert_eq!(Snapshot::decode(&bytes).unwrap(), sample_snapshot());
    }

    #[test]
    fn frame_len_known_before_payload_arrives() {
        let snap = Snapshot {
            num_encoder_layers: 0,
            grids: vec![SdrGrid::new(4, 4, 2, vec![1; 16])],
            fields: vec![],
        };
        let bytes = snap.encode();
        // Grid header is present but winners and the field count are not.
        assert!(matches!(
            Snapshot::frame_len(&bytes[..8]),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
        assert_eq!(Snapshot::frame_len(&bytes), Ok(bytes.len()));
    }

    #[test]
    fn long_field_names_are_truncated_to_wire_width() {
        let name = "x".repeat(100);
        let field = Field::new(name, Int3::new(1, 1, 1), vec![7]);
        let snap = Snapshot {
            num_encoder_layers: 0,
            grids: vec![],
            fields: vec![field],
        };
        let back = Snapshot::decode(&snap.encode()).unwrap();
        assert_eq!(back.fields[0].name.len(), FIELD_NAME_LEN);
        assert_eq!(back.fields[0].data, vec![7]);
    }

    #[test]
    fn multibyte_name_is_cut_on_a_character_boundary() {
        // 63 ASCII bytes then a 2-byte character straddling the 64-byte limit.
        let name = format!("{}é tail", "a".repeat(63));
        let field = Field::new(name, Int3::new(1, 1, 1), vec![1]);
        let snap = Snapshot {
            num_encoder_layers: 0,
            grids: vec![],
            fields: vec![field],
        };
        let back = Snapshot::decode(&snap.encode()).unwrap();
        assert_eq!(back.fields[0].name, "a".repeat(63));

        let short = Field::new("ré", Int3::new(0, 0, 0), vec![]);
        let wire = short.wire_name();
        assert_eq!(&wire[..3], "ré".as_bytes());
        assert_eq!(wire[3], 0);
    }

    #[test]
    fn more_encoder_layers_than_layers_is_rejected() {
        let snap = Snapshot {
            num_encoder_layers: 2,
            grids: vec![SdrGrid::new(1, 1, 2, vec![0])],
            fields: vec![],
        };
        assert_eq!(
            Snapshot::decode(&snap.encode()),
            Err(ProtocolError::EncoderLayerCount {
                num_encoder_layers: 2,
                num_layers: 1,
            })
        );
    }

    #[test]
    fn negative_field_size_is_rejected() {
        let mut bytes = Vec::new();
        put_u16_le(&mut bytes, 0);
        put_u16_le(&mut bytes, 0);
        put_u16_le(&mut bytes, 1);
        bytes.extend_from_slice(&[0u8; FIELD_NAME_LEN]);
        put_i32_le(&mut bytes, 2);
        put_i32_le(&mut bytes, -1);
        put_i32_le(&mut bytes, 1);
        assert!(matches!(
            Snapshot::decode(&bytes),
            Err(ProtocolError::InvalidFieldSize { index: 0, .. })
        ));
    }

    #[test]
    fn winner_outside_column_is_rejected() {
        let snap = Snapshot {
            num_encoder_layers: 0,
            grids: vec![SdrGrid {
                width: 1,
                height: 2,
                column_size: 3,
                winners: vec![0, 3],
            }],
            fields: vec![],
        };
        assert_eq!(
            Snapshot::decode(&snap.encode()),
            Err(ProtocolError::WinnerOutOfRange {
                layer: 0,
                column: 1,
                winner: 3,
                column_size: 3
            })
        );
    }

    #[test]
    fn layer_titles_split_on_encoder_count() {
        let snap = sample_snapshot();
        assert_eq!(snap.layer_title(0), "Pre-encoder 0");
        assert_eq!(snap.layer_title(1), "Layer 0");
        assert!(snap.is_encoder_layer(0));
        assert!(!snap.is_encoder_layer(1));
    }

    #[test]
    fn winner_at_uses_column_major_order() {
        let grid = SdrGrid::new(2, 3, 4, vec![0, 1, 2, 3, 0, 1]);
        assert_eq!(grid.winner_at(0, 2), Some(2));
        assert_eq!(grid.winner_at(1, 0), Some(3));
        assert_eq!(grid.winner_at(2, 0), None);
    }
}
