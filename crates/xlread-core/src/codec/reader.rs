use super::layout::{NARROW_DELTA_BYTES, WIDE_DELTA_BYTES, mask_bytes, subsample_label};
use crate::cursor::ByteCursor;
use crate::error::DecodeError;

/// Packet-level byte conventions on top of the cursor.
///
/// Every read except the event marker treats the end of the buffer as
/// truncation.
pub struct PacketReader<'c, 'b> {
    cursor: &'c mut ByteCursor<'b>,
}

impl<'c, 'b> PacketReader<'c, 'b> {
    pub fn new(cursor: &'c mut ByteCursor<'b>) -> Self {
        Self { cursor }
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Leading byte of a packet; `None` once the stream is exhausted.
    pub fn event_marker(&mut self) -> Result<Option<u8>, DecodeError> {
        Ok(self.cursor.read_raw(1)?.map(|byte| byte as u8))
    }

    /// Subsample label from the frequency byte; `None` when no known bit is set.
    pub fn subsample_label(&mut self) -> Result<Option<i32>, DecodeError> {
        let flags = self.byte()?;
        Ok(subsample_label(flags))
    }

    /// Per-channel "wide delta" flags, LSB first within each byte.
    pub fn delta_mask(&mut self, channel_count: usize) -> Result<Vec<bool>, DecodeError> {
        let mut wide = Vec::with_capacity(channel_count);
        for _ in 0..mask_bytes(channel_count) {
            let byte = self.byte()?;
            for bit in 0..8 {
                if wide.len() == channel_count {
                    break;
                }
                wide.push(byte & (1 << bit) != 0);
            }
        }
        Ok(wide)
    }

    /// Unsigned big-endian delta slot, one or two bytes wide.
    pub fn delta(&mut self, wide: bool) -> Result<u64, DecodeError> {
        let width = if wide {
            WIDE_DELTA_BYTES
        } else {
            NARROW_DELTA_BYTES
        };
        self.required(width)
    }

    pub fn absolute(&mut self) -> Result<i32, DecodeError> {
        Ok(self.cursor.read_i32()?)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        self.required(1).map(|byte| byte as u8)
    }

    fn required(&mut self, width: usize) -> Result<u64, DecodeError> {
        let offset = self.cursor.position();
        self.cursor
            .read_raw(width)?
            .ok_or(DecodeError::UnexpectedEof {
                offset,
                needed: width,
                available: 0,
            })
    }
}
