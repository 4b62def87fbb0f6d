use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// FILETIME of 1970-01-01T00:00:00Z.
pub const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const NANOS_PER_TICK: i128 = 100;

/// Render a Windows FILETIME (100 ns ticks since 1601-01-01 UTC) as RFC 3339.
///
/// Returns `None` when the instant falls outside the representable range.
///
/// # Examples
/// ```
/// use xlread_core::filetime_to_rfc3339;
///
/// let one_second_after_unix_epoch = 116_444_736_010_000_000;
/// assert_eq!(
///     filetime_to_rfc3339(one_second_after_unix_epoch).as_deref(),
///     Some("1970-01-01T00:00:01Z")
/// );
/// ```
pub fn filetime_to_rfc3339(filetime: i64) -> Option<String> {
    let ticks = i128::from(filetime) - i128::from(FILETIME_UNIX_EPOCH);
    OffsetDateTime::from_unix_timestamp_nanos(ticks * NANOS_PER_TICK)
        .ok()
        .and_then(|instant| instant.format(&Rfc3339).ok())
}
