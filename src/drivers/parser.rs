use std::fmt::Write as _;
use serde::{Deserialize, Serialize};
use crate::drivers::error::LineError;
/// Where a sample's elapsed time comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// Host monotonic clock, started on the first accepted sample.
    #[default]
    Host,
    /// Leading integer microsecond counter sent by the device.
    Device,
}
/// Shape of one line sent by the probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineFormat {
    pub channels: usize,
    pub timestamp: TimestampSource,
}
impl LineFormat {
    pub fn host(channels: usize) -> Self {
        Self {
            channels,
            timestamp: TimestampSource::Host,
        }
    }
    pub fn device_timestamped(channels: usize) -> Self {
        Self {
            channels,
            timestamp: TimestampSource::Device,
        }
    }
    pub fn expected_tokens(&self) -> usize {
        match self.timestamp {
            TimestampSource::Host => self.channels,
            TimestampSource::Device => self.channels + 1,
        }
    }
}
/// A successfully parsed line, before it is stamped with session time.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine {
    pub device_timestamp_us: Option<u64>,
    pub values: Vec<f64>,
}
/// Decodes raw bytes into trimmed text. Undecodable input is reported in hex.
pub fn decode_line(raw: &[u8]) -> Result<&str, LineError> {
    match std::str::from_utf8(raw) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                Err(LineError::Empty)
            } else {
                Ok(text)
            }
        }
        Err(_) => Err(LineError::Decode {
            hex: hex_dump(raw),
        }),
    }
}
pub fn parse_line(text: &str, format: LineFormat) -> Result<ParsedLine, LineError> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(LineError::Empty);
    }
    if tokens.len() != format.expected_tokens() {
        return Err(LineError::TokenCount {
            expected: format.expected_tokens(),
            actual: tokens.len(),
            line: text.to_string(),
        });
    }
    let (device_timestamp_us, value_tokens) = match format.timestamp {
        TimestampSource::Host => (None, &tokens[..]),
        TimestampSource::Device => {
            let ts = tokens[0]
                .parse::<u64>()
                .map_err(|_| LineError::Timestamp {
                    token: tokens[0].to_string(),
                })?;
            (Some(ts), &tokens[1..])
        }
    };
    let values = value_tokens
        .iter()
        .map(|token| parse_value(token))
        .collect::<Result<Vec<f64>, LineError>>()?;
    Ok(ParsedLine {
        device_timestamp_us,
        values,
    })
}
/// Decode + parse in one step, the way the ingestion loop consumes a line.
pub fn parse_raw(raw: &[u8], format: LineFormat) -> Result<ParsedLine, LineError> {
    let text = decode_line(raw)?;
    parse_line(text, format)
}
fn parse_value(token: &str) -> Result<f64, LineError> {
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(LineError::Number {
            token: token.to_string(),
        }),
    }
}
fn hex_dump(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for (i, b) in raw.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}
