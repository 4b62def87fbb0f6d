use serde::Serialize;

use crate::codec::config::CHANNEL_COUNT_FIELD;
use crate::codec::{ChannelLayout, PacketStream, decode_packets};
use crate::conversion::ConversionTable;
use crate::error::DecodeError;
use crate::expr::Scope;
use crate::schema::engine::DISCRIMINANT_FIELD;
use crate::schema::{SpecialContext, SpecialFieldHandler};
use crate::{Record, Value, ValueMap};

/// Special-field name the packet codec is registered under.
pub const DATA_PACKETS_FIELD: &str = "data_packets";
/// Body section holding the channel setup.
pub const RAW_HEADER_SECTION: &str = "raw_data_file_header";

const HEADBOX_NAME_ENTRY: &str = "headbox_name";
const CHANNEL_NAMES_ENTRY: &str = "channel_names";
const CONVERSION_FACTORS_ENTRY: &str = "conversion_factors";
const CHANNEL_VARIABLE: &str = "channel";
const PHYSICAL_CHANNEL_FIELD: &str = "phys_chan";
/// Per-headbox lists of which only the first headbox is used.
const COLLAPSED_FIELDS: [&str; 2] = ["headbox_type", "headbox_sn"];

/// Channel naming and calibration resolved from the conversion table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub headbox_name: String,
    pub channel_names: Vec<String>,
    pub factors: Vec<f64>,
}

/// `special:data_packets` hook: resolves calibration, then decodes the
/// packet stream from the current cursor position to the end of the file.
///
/// The record entry for the special field gets a short summary; the stream
/// itself is kept on the hook and handed out by [`into_parts`](Self::into_parts).
#[derive(Debug, Default)]
pub struct PacketStreamField {
    reorder_electrodes: bool,
    stream: Option<PacketStream>,
    channels: Option<ChannelInfo>,
}

impl PacketStreamField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_electrode_reorder(mut self, reorder: bool) -> Self {
        self.reorder_electrodes = reorder;
        self
    }

    pub fn stream(&self) -> Option<&PacketStream> {
        self.stream.as_ref()
    }

    pub fn channels(&self) -> Option<&ChannelInfo> {
        self.channels.as_ref()
    }

    pub fn into_parts(self) -> (Option<PacketStream>, Option<ChannelInfo>) {
        (self.stream, self.channels)
    }
}

impl SpecialFieldHandler for PacketStreamField {
    fn read_special(&mut self, ctx: SpecialContext<'_, '_>) -> Result<(), DecodeError> {
        let header = collapse_headbox_lists(ctx.record)?;
        let table = ctx.store.conversion_table(ctx.file_schema)?;
        let file_schema = ctx.file_schema.map_or(Value::Null, Value::Int);

        let mut channels = resolve_channels(&table, &header, &file_schema)?;
        if self.reorder_electrodes {
            channels.channel_names = reorder_by_physical_channel(&header, channels.channel_names)?;
        }

        let layout = ChannelLayout::from_header(RAW_HEADER_SECTION, &header, channels.factors.clone())?;
        let stream = decode_packets(ctx.cursor, &layout)?;

        let summary = ValueMap::from([
            (
                "packet_count".to_string(),
                Value::from_u64(stream.len() as u64),
            ),
            (
                "frequency_anomalies".to_string(),
                Value::from_u64(stream.frequency_anomalies as u64),
            ),
        ]);
        ctx.record.insert(ctx.name, Value::Map(summary));
        self.stream = Some(stream);
        self.channels = Some(channels);
        Ok(())
    }
}

/// Replace per-headbox lists with their first element, in place, and return
/// a copy of the header section.
fn collapse_headbox_lists(record: &mut Record) -> Result<ValueMap, DecodeError> {
    let Some(Value::Map(header)) = record.get_mut(RAW_HEADER_SECTION) else {
        return Err(DecodeError::missing_field(
            RAW_HEADER_SECTION,
            CHANNEL_COUNT_FIELD,
        ));
    };
    for field in COLLAPSED_FIELDS {
        if let Some(Value::List(items)) = header.get(field) {
            let first = items.first().cloned().unwrap_or(Value::Null);
            header.insert(field.to_string(), first);
        }
    }
    Ok(header.clone())
}

fn resolve_channels(
    table: &ConversionTable,
    header: &ValueMap,
    file_schema: &Value,
) -> Result<ChannelInfo, DecodeError> {
    let channel_count = header
        .get(CHANNEL_COUNT_FIELD)
        .ok_or_else(|| DecodeError::missing_field(RAW_HEADER_SECTION, CHANNEL_COUNT_FIELD))?
        .as_i64()
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| {
            DecodeError::invalid_template(
                format!("{RAW_HEADER_SECTION}.{CHANNEL_COUNT_FIELD}"),
                "must be a non-negative integer",
            )
        })?;

    let mut scope = Scope::new();
    scope.bind_map(header);
    scope.bind(DISCRIMINANT_FIELD, file_schema);

    let headbox_name = match table.evaluate(HEADBOX_NAME_ENTRY, &scope)? {
        Value::Text(name) => name,
        other => other.to_string(),
    };
    let channel_names = match table.evaluate(CHANNEL_NAMES_ENTRY, &scope)? {
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Text(name) => Ok(name),
                other => Err(DecodeError::invalid_template(
                    CHANNEL_NAMES_ENTRY,
                    format!("channel name must be a string, got {other}"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(DecodeError::invalid_template(
                CHANNEL_NAMES_ENTRY,
                format!("expected a list of names, got {other}"),
            ));
        }
    };

    let mut factors = Vec::with_capacity(channel_count);
    for channel in 0..channel_count {
        let index = Value::from_u64(channel as u64);
        let mut scope = scope.clone();
        scope.bind(CHANNEL_VARIABLE, &index);
        let factor = table.evaluate(CONVERSION_FACTORS_ENTRY, &scope)?;
        factors.push(factor.as_f64().ok_or_else(|| {
            DecodeError::invalid_template(
                CONVERSION_FACTORS_ENTRY,
                format!("factor for channel {channel} is {factor}, not a number"),
            )
        })?);
    }

    Ok(ChannelInfo {
        headbox_name,
        channel_names,
        factors,
    })
}

/// Virtual channel `v` takes the name listed for physical channel `phys_chan[v]`.
/// Names past the end of `phys_chan` stay where they are.
fn reorder_by_physical_channel(
    header: &ValueMap,
    names: Vec<String>,
) -> Result<Vec<String>, DecodeError> {
    let entry = || format!("{RAW_HEADER_SECTION}.{PHYSICAL_CHANNEL_FIELD}");
    let physical = header
        .get(PHYSICAL_CHANNEL_FIELD)
        .ok_or_else(|| DecodeError::missing_field(RAW_HEADER_SECTION, PHYSICAL_CHANNEL_FIELD))?;
    let physical = match physical {
        Value::List(items) => items.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };

    let mut reordered = names.clone();
    for (slot, physical) in reordered.iter_mut().zip(physical) {
        let name = physical
            .as_i64()
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| names.get(index))
            .ok_or_else(|| {
                DecodeError::invalid_template(
                    entry(),
                    format!("{physical} is not a channel index below {}", names.len()),
                )
            })?;
        slot.clone_from(name);
    }
    Ok(reordered)
}
