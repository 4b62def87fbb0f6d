use std::collections::BTreeMap;

use super::layout::{DEFAULT_FREQUENCY_FACTOR, FULL_RATE, MAX_DISCARD_BITS};
use crate::{Value, ValueMap};
use crate::error::DecodeError;

pub const CHANNEL_COUNT_FIELD: &str = "num_channels";
pub const DISCARD_BITS_FIELD: &str = "discardbits";
pub const SHORTED_FIELD: &str = "shorted";
pub const FREQUENCY_FACTOR_FIELD: &str = "frequency_factor";

/// Per-recording channel setup for the packet decoder.
///
/// # Examples
/// ```
/// use xlread_core::ChannelLayout;
///
/// let layout = ChannelLayout::new(4, vec![1.0; 4])
///     .with_shorted(&[3])
///     .with_frequency_factors(&[32767, 2, 2, 32767]);
/// assert!(layout.is_subsampled());
/// assert!(layout.reads_channel(0, -1));
/// assert!(!layout.reads_channel(0, 2));
/// assert!(layout.reads_channel(1, 2));
/// assert!(!layout.reads_channel(3, -1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLayout {
    channel_count: usize,
    discard_bits: u32,
    factors: Vec<f64>,
    shorted: Vec<bool>,
    groups: Option<BTreeMap<i64, Vec<usize>>>,
}

impl ChannelLayout {
    /// Full-rate layout with no shorted channels and no discarded bits.
    ///
    /// Missing calibration factors default to `1.0`.
    pub fn new(channel_count: usize, mut factors: Vec<f64>) -> Self {
        factors.resize(channel_count, 1.0);
        Self {
            channel_count,
            discard_bits: 0,
            factors,
            shorted: vec![false; channel_count],
            groups: None,
        }
    }

    pub fn with_discard_bits(mut self, discard_bits: u32) -> Self {
        self.discard_bits = discard_bits;
        self
    }

    pub fn with_shorted(mut self, channels: &[usize]) -> Self {
        for &channel in channels {
            if let Some(flag) = self.shorted.get_mut(channel) {
                *flag = true;
            }
        }
        self
    }

    /// Group channels by frequency factor.
    ///
    /// Packets carry a frequency byte as soon as any entry of the header
    /// array differs from the full-rate default, including entries past
    /// `channel_count`. Groups only list channels below `channel_count`.
    pub fn with_frequency_factors(mut self, factors: &[i64]) -> Self {
        let mut groups: Option<BTreeMap<i64, Vec<usize>>> = None;
        for (channel, &factor) in factors.iter().enumerate() {
            if factor == DEFAULT_FREQUENCY_FACTOR {
                continue;
            }
            let members = groups
                .get_or_insert_with(BTreeMap::new)
                .entry(factor)
                .or_default();
            if channel < self.channel_count {
                members.push(channel);
            }
        }
        self.groups = groups;
        self
    }

    /// Build from a decoded raw-data header section.
    ///
    /// # Errors
    /// `MissingField` when `num_channels` is absent, `InvalidTemplate` when a
    /// field has the wrong shape, the discard shift exceeds 32 bits, or the
    /// factor count differs from the channel count.
    pub fn from_header(
        section: &str,
        header: &ValueMap,
        factors: Vec<f64>,
    ) -> Result<Self, DecodeError> {
        let field = |name: &str| {
            header
                .get(name)
                .ok_or_else(|| DecodeError::missing_field(section, name))
        };
        let invalid = |name: &str, message: &str| {
            DecodeError::invalid_template(format!("{section}.{name}"), message)
        };

        let channel_count = field(CHANNEL_COUNT_FIELD)?
            .as_i64()
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| invalid(CHANNEL_COUNT_FIELD, "must be a non-negative integer"))?;
        if factors.len() != channel_count {
            return Err(invalid(
                CHANNEL_COUNT_FIELD,
                &format!(
                    "{} calibration factors for {channel_count} channels",
                    factors.len()
                ),
            ));
        }
        let discard_bits = field(DISCARD_BITS_FIELD)?
            .as_i64()
            .and_then(|bits| u32::try_from(bits).ok())
            .filter(|bits| *bits <= MAX_DISCARD_BITS)
            .ok_or_else(|| invalid(DISCARD_BITS_FIELD, "must be an integer in 0..=32"))?;
        let shorted: Vec<usize> = int_list(field(SHORTED_FIELD)?)
            .ok_or_else(|| invalid(SHORTED_FIELD, "must be an integer or list of integers"))?
            .into_iter()
            .enumerate()
            .filter(|(_, flag)| *flag != 0)
            .map(|(channel, _)| channel)
            .collect();
        let frequency_factors = int_list(field(FREQUENCY_FACTOR_FIELD)?).ok_or_else(|| {
            invalid(FREQUENCY_FACTOR_FIELD, "must be an integer or list of integers")
        })?;

        Ok(Self::new(channel_count, factors)
            .with_discard_bits(discard_bits)
            .with_shorted(&shorted)
            .with_frequency_factors(&frequency_factors))
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn discard_bits(&self) -> u32 {
        self.discard_bits
    }

    pub fn factor(&self, channel: usize) -> f64 {
        self.factors.get(channel).copied().unwrap_or(1.0)
    }

    pub fn is_shorted(&self, channel: usize) -> bool {
        self.shorted.get(channel).copied().unwrap_or(false)
    }

    /// True when packets carry a frequency byte.
    pub fn is_subsampled(&self) -> bool {
        self.groups.is_some()
    }

    /// Channels in subsample group `label`; empty for unknown labels.
    pub fn group(&self, label: i32) -> &[usize] {
        self.groups
            .as_ref()
            .and_then(|groups| groups.get(&i64::from(label)))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether a packet labelled `label` carries a value for `channel`.
    pub fn reads_channel(&self, channel: usize, label: i32) -> bool {
        if self.is_shorted(channel) {
            return false;
        }
        label == FULL_RATE || self.group(label).contains(&channel)
    }
}

/// A scalar or list of integers (booleans count as 0/1).
fn int_list(value: &Value) -> Option<Vec<i64>> {
    let one = |value: &Value| match value {
        Value::Bool(flag) => Some(i64::from(*flag)),
        other => other.as_i64(),
    };
    match value {
        Value::List(items) => items.iter().map(one).collect(),
        scalar => one(scalar).map(|value| vec![value]),
    }
}
