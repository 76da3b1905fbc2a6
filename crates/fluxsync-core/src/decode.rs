// ── Frame decoding ──
//
// Splits series into samples and converts each sample into a JSON value
// that channel schemas parse. Conversion is lossless: 64-bit integers and
// timestamps stay integers, f32 widens exactly, and non-finite floats are
// rejected instead of being silently mapped to null.

use fluxsync_api::{DataType, Frame, FrameEntry, Series};
use serde_json::{Number, Value};
use uuid::Uuid;

/// Decode every sample in `series`, in order.
///
/// A bad sample yields an `Err` with a reason; the remaining samples are
/// still decoded.
pub fn decode_series(series: &Series) -> Vec<Result<Value, String>> {
    let data_type = series.data_type();
    series
        .records()
        .enumerate()
        .map(|(index, record)| {
            decode_sample(data_type, record).map_err(|reason| format!("sample {index}: {reason}"))
        })
        .collect()
}

/// Decode one raw sample of the given type.
pub fn decode_sample(data_type: DataType, raw: &[u8]) -> Result<Value, String> {
    match data_type {
        DataType::Float64 => finite(f64::from_le_bytes(fixed(raw)?)),
        DataType::Float32 => finite(f64::from(f32::from_le_bytes(fixed(raw)?))),
        DataType::Int64 | DataType::Timestamp => Ok(Value::from(i64::from_le_bytes(fixed(raw)?))),
        DataType::Int32 => Ok(Value::from(i32::from_le_bytes(fixed(raw)?))),
        DataType::Int16 => Ok(Value::from(i16::from_le_bytes(fixed(raw)?))),
        DataType::Int8 => Ok(Value::from(i8::from_le_bytes(fixed(raw)?))),
        DataType::Uint64 => Ok(Value::from(u64::from_le_bytes(fixed(raw)?))),
        DataType::Uint32 => Ok(Value::from(u32::from_le_bytes(fixed(raw)?))),
        DataType::Uint16 => Ok(Value::from(u16::from_le_bytes(fixed(raw)?))),
        DataType::Uint8 => Ok(Value::from(u8::from_le_bytes(fixed(raw)?))),
        DataType::Uuid => Uuid::from_slice(raw)
            .map(|id| Value::String(id.hyphenated().to_string()))
            .map_err(|e| e.to_string()),
        DataType::String => std::str::from_utf8(raw)
            .map(|s| Value::String(s.to_owned()))
            .map_err(|e| format!("invalid UTF-8: {e}")),
        DataType::Json => serde_json::from_slice(raw).map_err(|e| format!("invalid JSON: {e}")),
    }
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N], String> {
    <[u8; N]>::try_from(raw).map_err(|_| format!("expected {N} bytes, got {}", raw.len()))
}

fn finite(value: f64) -> Result<Value, String> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite float {value}"))
}

/// Order in which a frame's entries are dispatched.
///
/// Entries on channels whose name contains `delete` come first, so a frame
/// carrying a delete and a re-set of the same resource applies them in that
/// order. The order is stable otherwise.
pub fn dispatch_order(frame: &Frame) -> Vec<&FrameEntry> {
    let mut entries: Vec<&FrameEntry> = frame.entries().iter().collect();
    entries.sort_by_key(|entry| !entry.channel.contains("delete"));
    entries
}
