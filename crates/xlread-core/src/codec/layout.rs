/// Subsample label meaning "every channel carries a value".
pub const FULL_RATE: i32 = -1;

/// Frequency factor of a channel sampled at the full rate (C `SHRT_MAX`).
pub const DEFAULT_FREQUENCY_FACTOR: i64 = 32767;

/// Delta slot value announcing a 32-bit absolute value later in the packet.
pub const ABSOLUTE_SENTINEL: u64 = 0xFFFF;

/// Bits scanned in the frequency byte.
pub const FLAG_BITS: u32 = 8;

/// Widest accepted discard-bit shift.
pub const MAX_DISCARD_BITS: u32 = 32;

/// Subsample label for each frequency-byte bit, low bit first.
pub const SUBSAMPLE_LABELS: [Option<i32>; FLAG_BITS as usize] = [
    Some(2),
    Some(4),
    Some(5),
    Some(10),
    Some(20),
    Some(50),
    None,
    Some(FULL_RATE),
];

pub const NARROW_DELTA_BYTES: usize = 1;
pub const WIDE_DELTA_BYTES: usize = 2;

/// Label selected by a frequency byte: the first set bit, scanning from the
/// low bit, that has a known label.
pub fn subsample_label(flags: u8) -> Option<i32> {
    (0..FLAG_BITS).find_map(|bit| {
        if flags & (1 << bit) == 0 {
            return None;
        }
        SUBSAMPLE_LABELS[bit as usize]
    })
}

/// Bytes in the per-packet delta width mask.
pub const fn mask_bytes(channel_count: usize) -> usize {
    channel_count.div_ceil(8)
}
