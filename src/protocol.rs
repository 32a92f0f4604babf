//! Datagram protocol
//!
//! Metrics arrive as single-line datagrams in a statsd-like format:
//!
//! ```text
//! <name>:<value>|<type>[|@<sample_rate>][|#<tag>:<value>[,<tag>:<value>...]]
//! ```
//!
//! The first two segments are mandatory and positional. Everything after them
//! is optional and may appear in any order: a segment starting with `@` is a
//! sample rate, a segment starting with `#` is a list of tags.
//!
//! Decoding is strict on the mandatory part and lenient on the optional part.
//! An unparsable sample rate is ignored and a malformed tag entry is skipped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEGMENT_SEPARATOR: char = '|';
const NAME_VALUE_SEPARATOR: char = ':';
const SAMPLE_RATE_PREFIX: char = '@';
const TAGS_PREFIX: char = '#';
const TAG_SEPARATOR: char = ',';

/// The kind of a metric as declared by its one-letter type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    None,
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Wire code of this kind (`c`, `g`, `h`, or empty for [`MetricKind::None`])
    pub fn code(&self) -> &'static str {
        match self {
            MetricKind::None => "",
            MetricKind::Counter => "c",
            MetricKind::Gauge => "g",
            MetricKind::Histogram => "h",
        }
    }

    /// Resolve a wire code. Only the three concrete kinds have a code.
    pub fn from_code(code: &str) -> Option<MetricKind> {
        match code {
            "c" => Some(MetricKind::Counter),
            "g" => Some(MetricKind::Gauge),
            "h" => Some(MetricKind::Histogram),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors produced while decoding a datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than two `|`-separated segments
    #[error("invalid datagram")]
    InvalidDatagram,

    /// The first segment is not exactly `<name>:<value>`
    #[error("malformed metric details")]
    MalformedMetricKey,

    /// The value is not a finite 32-bit floating point number
    #[error("invalid type for metric value")]
    InvalidMetricValueType,

    /// The type code is not one of `c`, `g`, `h`
    #[error("unsupported metric type")]
    UnsupportedMetricType,
}

/// A decoded metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f32,
    pub kind: MetricKind,
    pub sample_rate: Option<f64>,
    pub tags: Option<HashMap<String, String>>,
}

impl Metric {
    /// A bare counter observation without sample rate or tags
    pub fn counter(name: impl Into<String>, value: f32) -> Self {
        Self {
            name: name.into(),
            value,
            kind: MetricKind::Counter,
            sample_rate: None,
            tags: None,
        }
    }

    pub fn is_counter(&self) -> bool {
        self.kind == MetricKind::Counter
    }
}

/// Renders the mandatory part of the datagram, e.g. `http.response.400:1.0|c`
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:.1}|{}", self.name, self.value, self.kind)
    }
}

impl FromStr for Metric {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_datagram(s)
    }
}

/// Decode a single datagram line into a [`Metric`]
pub fn parse_datagram(datagram: &str) -> Result<Metric, DecodeError> {
    let segments: Vec<&str> = datagram.split(SEGMENT_SEPARATOR).collect();
    if segments.len() < 2 {
        return Err(DecodeError::InvalidDatagram);
    }

    let (name, value) = parse_name_value(segments[0])?;
    let kind = MetricKind::from_code(segments[1]).ok_or(DecodeError::UnsupportedMetricType)?;

    let mut metric = Metric {
        name,
        value,
        kind,
        sample_rate: None,
        tags: None,
    };

    for segment in &segments[2..] {
        if let Some(rate) = segment.strip_prefix(SAMPLE_RATE_PREFIX) {
            if let Ok(rate) = rate.parse::<f64>() {
                metric.sample_rate = Some(rate);
            }
        } else if let Some(tags) = segment.strip_prefix(TAGS_PREFIX) {
            metric.tags = Some(parse_tags(tags));
        }
    }

    Ok(metric)
}

fn parse_name_value(segment: &str) -> Result<(String, f32), DecodeError> {
    let parts: Vec<&str> = segment.split(NAME_VALUE_SEPARATOR).collect();
    let [name, value] = parts.as_slice() else {
        return Err(DecodeError::MalformedMetricKey);
    };

    // Out-of-range input parses to infinity
    let value = value
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or(DecodeError::InvalidMetricValueType)?;

    Ok((name.to_string(), value))
}

fn parse_tags(tags: &str) -> HashMap<String, String> {
    tags.split(TAG_SEPARATOR)
        .filter_map(|tag| {
            let parts: Vec<&str> = tag.split(NAME_VALUE_SEPARATOR).collect();
            match parts.as_slice() {
                [key, value] => Some((key.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}
