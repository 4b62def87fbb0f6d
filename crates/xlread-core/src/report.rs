use serde::Serialize;

use crate::codec::Packet;
use crate::files::{ChannelInfo, DecodedFile, FileKind};
use crate::filetime::filetime_to_rfc3339;
use crate::{Record, Value};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;

const VIDEO_SECTION: &str = "video_toc_entry";
const VIDEO_START_FIELD: &str = "filetime_starttime";
const VIDEO_END_FIELD: &str = "filetime_endtime";
const SYNC_SECTION: &str = "time_mappings";
const SYNC_TIME_FIELD: &str = "sample_time";

/// Summary of one decoded file, as written by the CLI.
///
/// # Examples
/// ```
/// use xlread_core::{DecodedFile, FileKind, Record, build_report};
///
/// let decoded = DecodedFile {
///     kind: FileKind::Eeg,
///     record: Record::new(),
///     file_schema: Some(3),
///     consumed: 352,
///     packets: None,
///     channels: None,
/// };
/// let report = build_report("study.eeg", 400, &decoded, false);
/// assert_eq!(report.report_version, xlread_core::REPORT_VERSION);
/// assert!(report.packets.is_none());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    pub input: InputInfo,
    pub kind: FileKind,
    /// Body template discriminant; absent for headerless kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_schema: Option<i64>,
    /// Bytes walked by the templates and the packet codec.
    pub consumed: usize,
    pub record: Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<ChannelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<PacketSummary>,
    /// Wall-clock spans found in `vtc` and `snc` records.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub time_ranges: Vec<TimeRange>,
}

/// Tool metadata embedded in reports.
///
/// # Examples
/// ```
/// use xlread_core::ToolInfo;
///
/// let tool = ToolInfo {
///     name: "xlread".to_string(),
///     version: "0.1.0".to_string(),
/// };
/// assert_eq!(tool.name, "xlread");
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputInfo {
    /// Input path as provided to the decoder.
    pub path: String,
    pub bytes: u64,
}

/// Packet-stream statistics for `erd` files.
#[derive(Debug, Clone, Serialize)]
pub struct PacketSummary {
    pub count: usize,
    pub frequency_anomalies: usize,
    pub end_offsets: Vec<usize>,
    /// Every packet, only when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<Vec<Packet>>,
}

/// A FILETIME span rendered as RFC 3339.
///
/// `start`/`end` are absent when the raw value is missing or out of range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    /// Record block the span was read from.
    pub source: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// Build the report for `decoded`; `include_packets` adds every packet.
pub fn build_report(
    input_path: &str,
    input_bytes: u64,
    decoded: &DecodedFile,
    include_packets: bool,
) -> DecodeReport {
    let packets = decoded.packets.as_ref().map(|stream| PacketSummary {
        count: stream.len(),
        frequency_anomalies: stream.frequency_anomalies,
        end_offsets: stream.end_offsets(),
        packets: include_packets.then(|| stream.packets.clone()),
    });
    let time_ranges = match decoded.kind {
        FileKind::Vtc => video_ranges(&decoded.record),
        FileKind::Snc => sync_range(&decoded.record).into_iter().collect(),
        _ => Vec::new(),
    };

    DecodeReport {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "xlread".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
        },
        kind: decoded.kind,
        file_schema: decoded.file_schema,
        consumed: decoded.consumed,
        record: decoded.record.clone(),
        channels: decoded.channels.clone(),
        packets,
        time_ranges,
    }
}

fn column<'r>(record: &'r Record, section: &str, field: &str) -> &'r [Value] {
    match record.field(section, field) {
        Some(Value::List(items)) => items,
        Some(scalar) => std::slice::from_ref(scalar),
        None => &[],
    }
}

fn render(value: &Value) -> Option<String> {
    value.as_i64().and_then(filetime_to_rfc3339)
}

/// One span per video file.
fn video_ranges(record: &Record) -> Vec<TimeRange> {
    let starts = column(record, VIDEO_SECTION, VIDEO_START_FIELD);
    let ends = column(record, VIDEO_SECTION, VIDEO_END_FIELD);
    starts
        .iter()
        .zip(ends)
        .enumerate()
        .filter(|(_, (start, end))| !start.is_null() || !end.is_null())
        .map(|(index, (start, end))| TimeRange {
            source: VIDEO_SECTION.to_string(),
            index,
            start: render(start),
            end: render(end),
        })
        .collect()
}

/// First to last sync point.
fn sync_range(record: &Record) -> Option<TimeRange> {
    let mut times = column(record, SYNC_SECTION, SYNC_TIME_FIELD)
        .iter()
        .filter(|value| !value.is_null());
    let first = times.next()?;
    let last = times.last().unwrap_or(first);
    Some(TimeRange {
        source: SYNC_SECTION.to_string(),
        index: 0,
        start: render(first),
        end: render(last),
    })
}
