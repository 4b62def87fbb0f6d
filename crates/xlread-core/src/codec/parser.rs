use serde::Serialize;
use tracing::warn;

use super::config::ChannelLayout;
use super::layout::{ABSOLUTE_SENTINEL, FULL_RATE};
use super::reader::PacketReader;
use crate::cursor::ByteCursor;
use crate::error::DecodeError;

/// One decoded packet.
///
/// `values` and `channel_ids` are parallel: delta-coded channels first, then
/// channels that carried an absolute value, each in ascending channel order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    pub values: Vec<f64>,
    pub channel_ids: Vec<usize>,
    /// Subsample factor, or `-1` for a full-rate packet.
    pub subsample: i32,
    /// Cursor offset just past the packet.
    pub end_offset: usize,
}

/// Every packet of one stream, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PacketStream {
    pub packets: Vec<Packet>,
    /// Packets whose frequency byte had no known bit set.
    pub frequency_anomalies: usize,
}

impl PacketStream {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn end_offsets(&self) -> Vec<usize> {
        self.packets.iter().map(|packet| packet.end_offset).collect()
    }

    /// End offsets increase strictly, so this is a binary search.
    pub fn contains_end_offset(&self, offset: usize) -> bool {
        self.packets
            .binary_search_by_key(&offset, |packet| packet.end_offset)
            .is_ok()
    }
}

struct PendingDelta {
    channel: usize,
    delta: u64,
    offset: usize,
}

/// Decode packets until the cursor is exhausted at a packet boundary.
///
/// Channel state starts unset and lives only for this call.
///
/// # Errors
/// `UnexpectedEof` when a packet is cut short, `UnsetDeltaReference` when a
/// channel's first value in the stream is a delta.
///
/// # Examples
/// ```
/// use xlread_core::{ByteCursor, ChannelLayout};
/// use xlread_core::codec::decode_packets;
///
/// // Event byte, both channels wide, two absolute sentinels, two absolutes.
/// let mut bytes = vec![0x00, 0b11, 0xFF, 0xFF, 0xFF, 0xFF];
/// bytes.extend_from_slice(&100i32.to_ne_bytes());
/// bytes.extend_from_slice(&50i32.to_ne_bytes());
/// let layout = ChannelLayout::new(2, vec![1.0, 2.0]);
/// let stream = decode_packets(&mut ByteCursor::new(&bytes), &layout).unwrap();
/// assert_eq!(stream.packets[0].values, [100.0, 100.0]);
/// ```
pub fn decode_packets(
    cursor: &mut ByteCursor<'_>,
    layout: &ChannelLayout,
) -> Result<PacketStream, DecodeError> {
    let channel_count = layout.channel_count();
    let shift = layout.discard_bits();
    let mut last_values: Vec<Option<f64>> = vec![None; channel_count];
    let mut stream = PacketStream::default();
    let mut reader = PacketReader::new(cursor);

    while reader.event_marker()?.is_some() {
        let subsample = if layout.is_subsampled() {
            let offset = reader.position();
            match reader.subsample_label()? {
                Some(label) => label,
                None => {
                    warn!(
                        offset,
                        "frequency byte has no known bit set; decoding packet at full rate"
                    );
                    stream.frequency_anomalies += 1;
                    FULL_RATE
                }
            }
        } else {
            FULL_RATE
        };

        let wide = reader.delta_mask(channel_count)?;
        let mut deltas = Vec::new();
        let mut absolute_channels = Vec::new();
        for (channel, &is_wide) in wide.iter().enumerate() {
            if !layout.reads_channel(channel, subsample) {
                continue;
            }
            let offset = reader.position();
            let slot = reader.delta(is_wide)?;
            if slot == ABSOLUTE_SENTINEL {
                absolute_channels.push(channel);
            } else {
                deltas.push(PendingDelta {
                    channel,
                    delta: slot << shift,
                    offset,
                });
            }
        }

        let mut absolute_values = Vec::with_capacity(absolute_channels.len());
        for &channel in &absolute_channels {
            let raw = i64::from(reader.absolute()?) << shift;
            let value = raw as f64 * layout.factor(channel);
            last_values[channel] = Some(value);
            absolute_values.push(value);
        }

        let mut values = Vec::with_capacity(deltas.len() + absolute_values.len());
        let mut channel_ids = Vec::with_capacity(values.capacity());
        for pending in deltas {
            let base = last_values[pending.channel].ok_or(DecodeError::UnsetDeltaReference {
                channel: pending.channel,
                offset: pending.offset,
            })?;
            let value = base + pending.delta as f64 * layout.factor(pending.channel);
            last_values[pending.channel] = Some(value);
            values.push(value);
            channel_ids.push(pending.channel);
        }
        values.extend(absolute_values);
        channel_ids.extend(absolute_channels);

        stream.packets.push(Packet {
            values,
            channel_ids,
            subsample,
            end_offset: reader.position(),
        });
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::decode_packets;
    use crate::DecodeError;
    use crate::codec::ChannelLayout;
    use crate::cursor::ByteCursor;

    fn decode(bytes: &[u8], layout: &ChannelLayout) -> Result<super::PacketStream, DecodeError> {
        decode_packets(&mut ByteCursor::new(bytes), layout)
    }

    fn absolute(bytes: &mut Vec<u8>, value: i32) {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }

    #[test]
    fn absolute_then_delta_packets() {
        let mut bytes = vec![0x00, 0b11, 0xFF, 0xFF, 0xFF, 0xFF];
        absolute(&mut bytes, 100);
        absolute(&mut bytes, 50);
        let first_end = bytes.len();
        bytes.extend_from_slice(&[0x00, 0b00, 5, 0]);

        let layout = ChannelLayout::new(2, vec![1.0, 2.0]);
        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.len(), 2);

        let first = &stream.packets[0];
        assert_eq!(first.values, [100.0, 100.0]);
        assert_eq!(first.channel_ids, [0, 1]);
        assert_eq!(first.subsample, -1);
        assert_eq!(first.end_offset, first_end);

        let second = &stream.packets[1];
        assert_eq!(second.values, [105.0, 100.0]);
        assert_eq!(second.channel_ids, [0, 1]);
        assert_eq!(second.end_offset, bytes.len());
        assert_eq!(stream.end_offsets(), [first_end, bytes.len()]);
        assert!(stream.contains_end_offset(first_end));
        assert!(!stream.contains_end_offset(first_end + 1));
    }

    #[test]
    fn deltas_precede_absolutes_in_output() {
        let mut bytes = vec![0x00, 0b11, 0xFF, 0xFF, 0xFF, 0xFF];
        absolute(&mut bytes, 10);
        absolute(&mut bytes, 20);
        // channel 0 absolute again, channel 1 wide delta of 0x0102.
        bytes.extend_from_slice(&[0x00, 0b11, 0xFF, 0xFF, 0x01, 0x02]);
        absolute(&mut bytes, -7);

        let layout = ChannelLayout::new(2, vec![1.0, 1.0]);
        let stream = decode(&bytes, &layout).unwrap();
        let second = &stream.packets[1];
        assert_eq!(second.channel_ids, [1, 0]);
        assert_eq!(second.values, [20.0 + 258.0, -7.0]);
    }

    #[test]
    fn discard_bits_scale_both_encodings() {
        let mut bytes = vec![0x00, 0b1, 0xFF, 0xFF];
        absolute(&mut bytes, -3);
        bytes.extend_from_slice(&[0x00, 0b0, 2]);

        let layout = ChannelLayout::new(1, vec![0.5]).with_discard_bits(4);
        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.packets[0].values, [-24.0]);
        assert_eq!(stream.packets[1].values, [-24.0 + 16.0]);
    }

    #[test]
    fn shorted_channels_are_never_read() {
        let mut bytes = vec![0x00, 0b101, 0xFF, 0xFF, 0xFF, 0xFF];
        absolute(&mut bytes, 1);
        absolute(&mut bytes, 3);
        bytes.extend_from_slice(&[0x00, 0b000, 1, 1]);

        let layout = ChannelLayout::new(3, vec![1.0; 3]).with_shorted(&[1]);
        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.len(), 2);
        for packet in &stream.packets {
            assert!(!packet.channel_ids.contains(&1));
        }
        assert_eq!(stream.packets[1].values, [2.0, 4.0]);
    }

    #[test]
    fn subsample_groups_restrict_channels() {
        // Channels 0 and 2 at full rate, channel 1 in group 2.
        let layout = ChannelLayout::new(3, vec![1.0; 3])
            .with_frequency_factors(&[32767, 2, 32767])
            .with_shorted(&[]);
        let mut bytes = Vec::new();
        // Full-rate packet (bit 7): all three absolute.
        bytes.extend_from_slice(&[0x00, 0b1000_0000, 0b111, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        absolute(&mut bytes, 1);
        absolute(&mut bytes, 2);
        absolute(&mut bytes, 3);
        // Group 2 packet (bit 0): only channel 1.
        bytes.extend_from_slice(&[0x00, 0b0000_0001, 0b000, 4]);

        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.packets[0].subsample, -1);
        assert_eq!(stream.packets[0].channel_ids, [0, 1, 2]);
        assert_eq!(stream.packets[1].subsample, 2);
        assert_eq!(stream.packets[1].channel_ids, [1]);
        assert_eq!(stream.packets[1].values, [6.0]);
        assert_eq!(stream.frequency_anomalies, 0);
    }

    #[test]
    fn shorted_channel_stays_out_of_its_subsample_group() {
        let layout = ChannelLayout::new(3, vec![1.0; 3])
            .with_shorted(&[1])
            .with_frequency_factors(&[32767, 2, 2]);
        // Full rate: channels 0 and 2 only.
        let mut bytes = vec![0x00, 0b1000_0000, 0b101, 0xFF, 0xFF, 0xFF, 0xFF];
        absolute(&mut bytes, 1);
        absolute(&mut bytes, 3);
        // Group 2: channel 2 only.
        bytes.extend_from_slice(&[0x00, 0b0000_0001, 0b000, 4]);

        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.packets[0].channel_ids, [0, 2]);
        assert_eq!(stream.packets[1].subsample, 2);
        assert_eq!(stream.packets[1].channel_ids, [2]);
        assert_eq!(stream.packets[1].values, [7.0]);
        for packet in &stream.packets {
            assert!(!packet.channel_ids.contains(&1));
        }
    }

    #[test]
    fn frequency_byte_follows_factors_past_channel_count() {
        // Only the unused third and fourth slots are subsampled.
        let layout =
            ChannelLayout::new(2, vec![1.0, 2.0]).with_frequency_factors(&[32767, 32767, 5, 5]);
        let mut bytes = vec![0x00, 0b1000_0000, 0b11, 0xFF, 0xFF, 0xFF, 0xFF];
        absolute(&mut bytes, 100);
        absolute(&mut bytes, 50);

        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.packets[0].subsample, -1);
        assert_eq!(stream.packets[0].values, [100.0, 100.0]);
        assert_eq!(stream.packets[0].end_offset, bytes.len());
    }

    #[test]
    fn unknown_frequency_bits_fall_back_to_full_rate() {
        let layout = ChannelLayout::new(1, vec![1.0]).with_frequency_factors(&[4]);
        let mut bytes = vec![0x00, 0b0000_0010, 0b1, 0xFF, 0xFF];
        absolute(&mut bytes, 9);
        bytes.extend_from_slice(&[0x00, 0b0100_0000, 0b0, 1]);

        let stream = decode(&bytes, &layout).unwrap();
        assert_eq!(stream.packets[0].subsample, 4);
        assert_eq!(stream.packets[1].subsample, -1);
        assert_eq!(stream.packets[1].values, [10.0]);
        assert_eq!(stream.frequency_anomalies, 1);
    }

    #[test]
    fn delta_before_absolute_is_error() {
        let bytes = [0x00, 0b0, 7];
        let err = decode(&bytes, &ChannelLayout::new(1, vec![1.0])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsetDeltaReference { channel: 0, offset: 2 }
        ));
    }

    #[test]
    fn truncated_packet_is_eof() {
        let bytes = [0x00, 0b1, 0xFF, 0xFF, 0x01, 0x00];
        let err = decode(&bytes, &ChannelLayout::new(1, vec![1.0])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnexpectedEof { offset: 4, needed: 4, available: 2 }
        ));

        let bytes = [0x00, 0b1, 0xFF];
        let err = decode(&bytes, &ChannelLayout::new(1, vec![1.0])).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { offset: 2, .. }));
    }

    #[test]
    fn empty_stream_has_no_packets() {
        let stream = decode(&[], &ChannelLayout::new(4, vec![1.0; 4])).unwrap();
        assert!(stream.is_empty());
    }
}
