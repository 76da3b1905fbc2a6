// ── Wire data model ──
//
// Frames are the unit of delivery on a streamer: an ordered list of
// per-channel series. Series carry encoded samples; decoding them into
// typed values is the consumer's job.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Record separator for variable-density series.
pub const RECORD_SEPARATOR: u8 = b'\n';

// ── DataType ─────────────────────────────────────────────────────────

/// Sample type of a [`Series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    Uint64,
    Uint32,
    Uint16,
    Uint8,
    /// Signed nanoseconds since the Unix epoch.
    Timestamp,
    Uuid,
    String,
    Json,
}

impl DataType {
    /// Bytes per sample, or `None` for newline-separated variable types.
    pub const fn density(self) -> Option<usize> {
        match self {
            Self::Float64 | Self::Int64 | Self::Uint64 | Self::Timestamp => Some(8),
            Self::Float32 | Self::Int32 | Self::Uint32 => Some(4),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int8 | Self::Uint8 => Some(1),
            Self::Uuid => Some(16),
            Self::String | Self::Json => None,
        }
    }

    pub const fn is_variable(self) -> bool {
        self.density().is_none()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::Int8 => "int8",
            Self::Uint64 => "uint64",
            Self::Uint32 => "uint32",
            Self::Uint16 => "uint16",
            Self::Uint8 => "uint8",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::String => "string",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Series ───────────────────────────────────────────────────────────

/// An encoded column of samples for one channel.
///
/// Fixed-density types are packed little-endian. `String` and `Json`
/// series hold one record per line, each terminated by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireSeries", into = "WireSeries")]
pub struct Series {
    data_type: DataType,
    data: Bytes,
}

macro_rules! fixed_constructor {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $dt:expr) => {
        $(#[$doc])*
        pub fn $name(values: &[$ty]) -> Self {
            let mut buf = BytesMut::with_capacity(values.len() * size_of::<$ty>());
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            Self {
                data_type: $dt,
                data: buf.freeze(),
            }
        }
    };
}

impl Series {
    /// Wrap raw bytes, checking they divide evenly into samples.
    pub fn new(data_type: DataType, data: impl Into<Bytes>) -> Result<Self, Error> {
        let data = data.into();
        if let Some(density) = data_type.density() {
            if data.len() % density != 0 {
                return Err(Error::InvalidSeries(format!(
                    "{} bytes is not a multiple of the {data_type} density ({density})",
                    data.len()
                )));
            }
        }
        Ok(Self { data_type, data })
    }

    fixed_constructor!(from_f64, f64, DataType::Float64);
    fixed_constructor!(from_f32, f32, DataType::Float32);
    fixed_constructor!(from_i64, i64, DataType::Int64);
    fixed_constructor!(from_i32, i32, DataType::Int32);
    fixed_constructor!(from_i16, i16, DataType::Int16);
    fixed_constructor!(from_i8, i8, DataType::Int8);
    fixed_constructor!(from_u64, u64, DataType::Uint64);
    fixed_constructor!(from_u32, u32, DataType::Uint32);
    fixed_constructor!(from_u16, u16, DataType::Uint16);
    fixed_constructor!(from_u8, u8, DataType::Uint8);
    fixed_constructor!(
        /// Timestamps as signed nanoseconds since the Unix epoch.
        from_timestamps,
        i64,
        DataType::Timestamp
    );

    pub fn from_uuids(values: &[Uuid]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 16);
        for value in values {
            buf.extend_from_slice(value.as_bytes());
        }
        Self {
            data_type: DataType::Uuid,
            data: buf.freeze(),
        }
    }

    /// Build a `String` series.
    ///
    /// Records are newline-terminated, so a value containing `\n` is
    /// rejected with [`Error::InvalidSeries`].
    pub fn from_strings<I, S>(values: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buf = BytesMut::new();
        for (index, value) in values.into_iter().enumerate() {
            let value = value.as_ref();
            if value.contains('\n') {
                return Err(Error::InvalidSeries(format!(
                    "string record {index} contains a newline"
                )));
            }
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(&[RECORD_SEPARATOR]);
        }
        Ok(Self {
            data_type: DataType::String,
            data: buf.freeze(),
        })
    }

    /// Build a `Json` series, one compact document per record.
    pub fn from_json<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a serde_json::Value>,
    {
        let mut buf = BytesMut::new();
        for value in values {
            // Compact serialization escapes newlines inside strings.
            buf.extend_from_slice(value.to_string().as_bytes());
            buf.extend_from_slice(&[RECORD_SEPARATOR]);
        }
        Self {
            data_type: DataType::Json,
            data: buf.freeze(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of samples in the series.
    pub fn len(&self) -> usize {
        match self.data_type.density() {
            Some(density) => self.data.len() / density,
            None => self.records().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate raw sample bytes: fixed-size chunks, or newline-separated
    /// records for variable types.
    pub fn records(&self) -> Box<dyn Iterator<Item = &[u8]> + '_> {
        if self.data.is_empty() {
            return Box::new(std::iter::empty());
        }
        match self.data_type.density() {
            Some(density) => Box::new(self.data.chunks_exact(density)),
            None => {
                let body = self
                    .data
                    .strip_suffix(&[RECORD_SEPARATOR])
                    .unwrap_or(&self.data[..]);
                Box::new(body.split(|b| *b == RECORD_SEPARATOR))
            }
        }
    }
}

/// Wire form of a [`Series`]: payload bytes as base64.
#[derive(Serialize, Deserialize)]
struct WireSeries {
    data_type: DataType,
    data: String,
}

impl TryFrom<WireSeries> for Series {
    type Error = Error;

    fn try_from(wire: WireSeries) -> Result<Self, Self::Error> {
        let data = STANDARD
            .decode(wire.data.as_bytes())
            .map_err(|e| Error::InvalidSeries(format!("bad base64 payload: {e}")))?;
        Self::new(wire.data_type, data)
    }
}

impl From<Series> for WireSeries {
    fn from(series: Series) -> Self {
        Self {
            data_type: series.data_type,
            data: STANDARD.encode(&series.data),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// One series tagged with the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEntry {
    pub channel: String,
    pub series: Series,
}

/// An inbound unit of data from a streamer.
///
/// Entries keep the order the server produced them in. A frame may hold
/// several channels and more than one series for the same channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    entries: Vec<FrameEntry>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame carrying a single series.
    pub fn single(channel: impl Into<String>, series: Series) -> Self {
        Self::new().with(channel, series)
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, channel: impl Into<String>, series: Series) -> Self {
        self.push(channel, series);
        self
    }

    pub fn push(&mut self, channel: impl Into<String>, series: Series) {
        self.entries.push(FrameEntry {
            channel: channel.into(),
            series,
        });
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<FrameEntry> {
        self.entries
    }

    /// Distinct channel names in first-appearance order.
    pub fn channels(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.channel.as_str()) {
                seen.push(&entry.channel);
            }
        }
        seen
    }

    /// All series for `channel`, in frame order.
    pub fn series_for<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a Series> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.channel == channel)
            .map(|e| &e.series)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
