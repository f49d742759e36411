//! Stream framing for the telemetry connection.
//!
//! Inbound frames are snapshots, whose length is only known after walking
//! their headers; outbound frames are fixed-size carets.

use bytes::{BufMut, BytesMut};
use neovis::protocol::{Caret, ProtocolError, Snapshot, CARET_FRAME_LEN};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ViewerError;

/// Largest snapshot accepted by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on a single up-front buffer reservation.
const RESERVE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SnapshotCodec {
    max_frame_len: usize,
}

impl SnapshotCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SnapshotCodec {
    type Item = Snapshot;
    type Error = ViewerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Snapshot>, ViewerError> {
        let len = match Snapshot::frame_len(src) {
            Ok(len) => len,
            Err(ProtocolError::TruncatedFrame { needed, .. }) => {
                if needed > self.max_frame_len {
                    return Err(ViewerError::FrameTooLarge {
                        len: needed,
                        max: self.max_frame_len,
                    });
                }
                src.reserve(needed.saturating_sub(src.len()).min(RESERVE_CHUNK));
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if len > self.max_frame_len {
            return Err(ViewerError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let frame = src.split_to(len);
        Ok(Some(Snapshot::decode(&frame)?))
    }
}

impl Encoder<Caret> for SnapshotCodec {
    type Error = ViewerError;

    fn encode(&mut self, caret: Caret, dst: &mut BytesMut) -> Result<(), ViewerError> {
        dst.reserve(CARET_FRAME_LEN);
        dst.put_slice(&caret.encode());
        Ok(())
    }
}
