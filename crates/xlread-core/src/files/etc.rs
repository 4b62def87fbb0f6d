use crate::codec::PacketStream;
use crate::error::DecodeError;
use crate::{Record, Value};

/// Repeat block of a decoded `etc` file.
pub const TOC_SECTION: &str = "table_of_content";
pub const TOC_OFFSET_FIELD: &str = "offset";

/// Check that every table-of-contents offset ends a packet of `stream`.
///
/// `null` entries (the trailing empty record) are skipped. Returns the number
/// of offsets checked. Nothing is repaired.
///
/// # Errors
/// `MissingField` when the record has no offsets, `InvalidTemplate` for a
/// non-integer offset, `TocOffsetMismatch` for the first offset that ends no
/// packet.
///
/// # Examples
/// ```
/// use xlread_core::{Packet, PacketStream, Record, Value, ValueMap, validate_toc};
///
/// let stream = PacketStream {
///     packets: vec![Packet { values: vec![], channel_ids: vec![], subsample: -1, end_offset: 420 }],
///     frequency_anomalies: 0,
/// };
/// let mut record = Record::new();
/// record.insert(
///     "table_of_content",
///     Value::Map(ValueMap::from([(
///         "offset".to_string(),
///         Value::List(vec![Value::Int(420)]),
///     )])),
/// );
/// assert_eq!(validate_toc(&record, &stream).unwrap(), 1);
/// ```
pub fn validate_toc(record: &Record, stream: &PacketStream) -> Result<usize, DecodeError> {
    let offsets = record
        .field(TOC_SECTION, TOC_OFFSET_FIELD)
        .ok_or_else(|| DecodeError::missing_field(TOC_SECTION, TOC_OFFSET_FIELD))?;
    let offsets = match offsets {
        Value::List(items) => items.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };

    let mut checked = 0;
    for (index, offset) in offsets.iter().enumerate() {
        if offset.is_null() {
            continue;
        }
        let offset = offset.as_i64().ok_or_else(|| {
            DecodeError::invalid_template(
                format!("{TOC_SECTION}.{TOC_OFFSET_FIELD}[{index}]"),
                format!("expected an integer offset, got {offset}"),
            )
        })?;
        let ends_packet = usize::try_from(offset)
            .is_ok_and(|offset| stream.contains_end_offset(offset));
        if !ends_packet {
            return Err(DecodeError::TocOffsetMismatch { index, offset });
        }
        checked += 1;
    }
    Ok(checked)
}
