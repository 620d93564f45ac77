use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::buffer::RowBuffer;
use super::descriptor::{FieldDescriptor, SqlType};
use crate::client::BlobId;
use crate::error::SqlRuntimeError;
use crate::types::{BlobRef, ConnectionId, Value};

const NULL_INDICATOR: i16 = -1;
const TICKS_PER_SECOND: u32 = 10_000;
const NANOS_PER_TICK: u32 = 100_000;

/// Destination for raw payloads bound to blob columns.
#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Connection that will own any blob written through this writer.
    fn connection_id(&self) -> ConnectionId;

    /// Open a new blob stream, write `data`, close it and return the new id.
    async fn write_new_blob(&self, data: &[u8]) -> Result<BlobId, SqlRuntimeError>;
}

fn day_zero() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap_or_default()
}

pub(crate) fn decode_date(days: i32) -> Option<NaiveDate> {
    day_zero().checked_add_signed(Duration::days(i64::from(days)))
}

pub(crate) fn encode_date(date: NaiveDate) -> Option<i32> {
    i32::try_from(date.signed_duration_since(day_zero()).num_days()).ok()
}

pub(crate) fn decode_time(ticks: u32) -> Option<NaiveTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(
        ticks / TICKS_PER_SECOND,
        (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK,
    )
}

pub(crate) fn encode_time(time: NaiveTime) -> u32 {
    // Leap-second nanos (>= 1e9) clamp to the last tick of the second.
    let frac = time.nanosecond().min(999_999_999) / NANOS_PER_TICK;
    time.num_seconds_from_midnight() * TICKS_PER_SECOND + frac
}

fn scale_factor(scale: i32) -> f64 {
    10f64.powi(scale)
}

fn corrupt(desc: &FieldDescriptor, what: &'static str) -> SqlRuntimeError {
    SqlRuntimeError::IncompatibleValue {
        field: desc.display_name().to_owned(),
        expected: what,
        found: "out-of-range data",
    }
}

#[allow(clippy::cast_precision_loss)]
fn integer_value(desc: &FieldDescriptor, raw: i64) -> Value {
    if desc.scale == 0 {
        Value::Int(raw)
    } else {
        Value::Double(raw as f64 * scale_factor(desc.scale))
    }
}

/// Decode one field. `owner` is the connection blob references are bound to.
///
/// # Errors
/// Returns `BufferOverrun` when the descriptor points outside `buffer`,
/// `UnrecognizedType` for unsupported types and `InvalidUtf8` for bad text.
pub fn decode(
    desc: &FieldDescriptor,
    buffer: &RowBuffer,
    owner: ConnectionId,
) -> Result<Value, SqlRuntimeError> {
    if desc.sql_type == SqlType::Null {
        return Ok(Value::Null);
    }
    if buffer.read_i16(desc.null_offset)? == NULL_INDICATOR {
        return Ok(Value::Null);
    }

    let at = desc.data_offset;
    let value = match desc.sql_type {
        SqlType::Varying => {
            let len = buffer.read_u16(at)? as usize;
            // The prefix may not claim more than the column's declared width.
            if len > desc.byte_length {
                return Err(SqlRuntimeError::BufferOverrun {
                    offset: at + 2,
                    len,
                    buffer_len: desc.byte_length,
                });
            }
            Value::Text(String::from_utf8(buffer.slice(at + 2, len)?.to_vec())?)
        }
        SqlType::Text => {
            let raw = buffer.slice(at, desc.byte_length)?;
            let text = String::from_utf8(raw.to_vec())?;
            Value::Text(text.trim_end_matches(' ').to_owned())
        }
        SqlType::Double => Value::Double(buffer.read_f64(at)?),
        SqlType::Float => Value::Double(f64::from(buffer.read_f32(at)?)),
        SqlType::Short => integer_value(desc, i64::from(buffer.read_i16(at)?)),
        SqlType::Long => integer_value(desc, i64::from(buffer.read_i32(at)?)),
        SqlType::Int64 => integer_value(desc, buffer.read_i64(at)?),
        SqlType::Time => {
            let time = decode_time(buffer.read_u32(at)?).ok_or_else(|| corrupt(desc, "time"))?;
            Value::Time(Local::now().date_naive().and_time(time))
        }
        SqlType::Date => {
            Value::Date(decode_date(buffer.read_i32(at)?).ok_or_else(|| corrupt(desc, "date"))?)
        }
        SqlType::Timestamp => {
            let date =
                decode_date(buffer.read_i32(at)?).ok_or_else(|| corrupt(desc, "timestamp"))?;
            let time =
                decode_time(buffer.read_u32(at + 4)?).ok_or_else(|| corrupt(desc, "timestamp"))?;
            Value::Timestamp(NaiveDateTime::new(date, time))
        }
        SqlType::Boolean => Value::Bool(buffer.read::<1>(at)?[0] != 0),
        SqlType::Blob => Value::Blob(BlobRef {
            id: BlobId(buffer.read::<8>(at)?),
            connection: owner,
        }),
        SqlType::Array => return Err(SqlRuntimeError::UnrecognizedType(SqlType::Array.code())),
        SqlType::Null => Value::Null,
    };
    Ok(value)
}

/// Decode every field of a row, in descriptor order.
///
/// # Errors
/// Propagates the first [`decode`] failure.
pub fn decode_row(
    descs: &[FieldDescriptor],
    buffer: &RowBuffer,
    owner: ConnectionId,
) -> Result<Vec<Value>, SqlRuntimeError> {
    descs
        .iter()
        .map(|desc| decode(desc, buffer, owner))
        .collect()
}

fn mismatch(desc: &FieldDescriptor, expected: &'static str, value: &Value) -> SqlRuntimeError {
    SqlRuntimeError::IncompatibleValue {
        field: desc.display_name().to_owned(),
        expected,
        found: value.kind(),
    }
}

fn set_null(
    desc: &FieldDescriptor,
    buffer: &mut RowBuffer,
    is_null: bool,
) -> Result<(), SqlRuntimeError> {
    let indicator: i16 = if is_null { NULL_INDICATOR } else { 0 };
    buffer.write(desc.null_offset, &indicator.to_le_bytes())
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn scaled_integer(desc: &FieldDescriptor, value: &Value) -> Result<i64, SqlRuntimeError> {
    match (value, desc.scale) {
        (Value::Int(v), 0) => Ok(*v),
        (Value::Int(v), scale) if scale < 0 => 10i64
            .checked_pow(scale.unsigned_abs())
            .and_then(|factor| v.checked_mul(factor))
            .ok_or_else(|| corrupt(desc, "scaled integer")),
        (Value::Double(v), scale) if scale != 0 => {
            let raw = (v / scale_factor(scale)).round();
            if raw.is_finite() && raw >= i64::MIN as f64 && raw <= i64::MAX as f64 {
                Ok(raw as i64)
            } else {
                Err(corrupt(desc, "scaled integer"))
            }
        }
        _ => Err(mismatch(desc, "integer", value)),
    }
}

/// Encode a non-blob value into its field. Writing `Null` only sets the null
/// indicator; the data region is left untouched. Values that do not fit are
/// rejected before anything is written.
///
/// # Errors
/// Returns `ValueTooLong`, `IncompatibleValue`, `UnsupportedBlobSource` (blob
/// columns must go through [`encode`]) or `BufferOverrun`.
pub fn encode_value(
    desc: &FieldDescriptor,
    buffer: &mut RowBuffer,
    value: &Value,
) -> Result<(), SqlRuntimeError> {
    if value.is_null() || desc.sql_type == SqlType::Null {
        return set_null(desc, buffer, value.is_null());
    }

    let at = desc.data_offset;
    match desc.sql_type {
        SqlType::Varying => {
            let Value::Text(text) = value else {
                return Err(mismatch(desc, "text", value));
            };
            let bytes = text.as_bytes();
            if bytes.len() > desc.byte_length {
                return Err(SqlRuntimeError::ValueTooLong {
                    field: desc.display_name().to_owned(),
                    max: desc.byte_length,
                    actual: bytes.len(),
                });
            }
            buffer.slice(at, desc.data_size())?;
            let len = u16::try_from(bytes.len()).map_err(|_| SqlRuntimeError::ValueTooLong {
                field: desc.display_name().to_owned(),
                max: usize::from(u16::MAX),
                actual: bytes.len(),
            })?;
            buffer.write(at, &len.to_le_bytes())?;
            buffer.write(at + 2, bytes)?;
        }
        SqlType::Text => {
            let Value::Text(text) = value else {
                return Err(mismatch(desc, "text", value));
            };
            let bytes = text.as_bytes();
            if bytes.len() > desc.byte_length {
                return Err(SqlRuntimeError::ValueTooLong {
                    field: desc.display_name().to_owned(),
                    max: desc.byte_length,
                    actual: bytes.len(),
                });
            }
            let region = buffer.slice_mut(at, desc.byte_length)?;
            region.fill(b' ');
            region[..bytes.len()].copy_from_slice(bytes);
        }
        SqlType::Double => {
            let v = match value {
                Value::Double(v) => *v,
                #[allow(clippy::cast_precision_loss)]
                Value::Int(v) => *v as f64,
                _ => return Err(mismatch(desc, "double", value)),
            };
            buffer.write(at, &v.to_le_bytes())?;
        }
        SqlType::Float => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let v = match value {
                Value::Double(v) => *v as f32,
                Value::Int(v) => *v as f32,
                _ => return Err(mismatch(desc, "float", value)),
            };
            buffer.write(at, &v.to_le_bytes())?;
        }
        SqlType::Short => {
            let raw = i16::try_from(scaled_integer(desc, value)?)
                .map_err(|_| corrupt(desc, "smallint"))?;
            buffer.write(at, &raw.to_le_bytes())?;
        }
        SqlType::Long => {
            let raw = i32::try_from(scaled_integer(desc, value)?)
                .map_err(|_| corrupt(desc, "integer"))?;
            buffer.write(at, &raw.to_le_bytes())?;
        }
        SqlType::Int64 => {
            buffer.write(at, &scaled_integer(desc, value)?.to_le_bytes())?;
        }
        SqlType::Time => {
            let Value::Time(time) = value else {
                return Err(mismatch(desc, "time", value));
            };
            buffer.write(at, &encode_time(time.time()).to_le_bytes())?;
        }
        SqlType::Date => {
            let Value::Date(date) = value else {
                return Err(mismatch(desc, "date", value));
            };
            let days = encode_date(*date).ok_or_else(|| corrupt(desc, "date"))?;
            buffer.write(at, &days.to_le_bytes())?;
        }
        SqlType::Timestamp => {
            let Value::Timestamp(ts) = value else {
                return Err(mismatch(desc, "timestamp", value));
            };
            let days = encode_date(ts.date()).ok_or_else(|| corrupt(desc, "timestamp"))?;
            buffer.slice(at, 8)?;
            buffer.write(at, &days.to_le_bytes())?;
            buffer.write(at + 4, &encode_time(ts.time()).to_le_bytes())?;
        }
        SqlType::Boolean => {
            let Value::Bool(b) = value else {
                return Err(mismatch(desc, "boolean", value));
            };
            buffer.write(at, &[u8::from(*b)])?;
        }
        SqlType::Blob => match value {
            Value::Blob(_) | Value::Bytes(_) => {
                return Err(SqlRuntimeError::UnsupportedBlobSource(
                    "blob columns need a blob writer".into(),
                ));
            }
            other => {
                return Err(SqlRuntimeError::UnsupportedBlobSource(format!(
                    "{} value for blob column '{}'",
                    other.kind(),
                    desc.display_name()
                )));
            }
        },
        SqlType::Array => return Err(SqlRuntimeError::UnrecognizedType(SqlType::Array.code())),
        SqlType::Null => {}
    }
    set_null(desc, buffer, false)
}

/// Encode one field, writing raw payloads for blob columns through `blobs`.
///
/// Blob columns accept a byte payload (written to a fresh blob), or a blob
/// reference owned by the same connection (its id is copied through).
///
/// # Errors
/// `CrossConnectionBlob` for a reference from another connection,
/// `UnsupportedBlobSource` for any other value shape, plus everything
/// [`encode_value`] reports.
pub async fn encode(
    desc: &FieldDescriptor,
    buffer: &mut RowBuffer,
    value: &Value,
    blobs: &dyn BlobWriter,
) -> Result<(), SqlRuntimeError> {
    if desc.sql_type != SqlType::Blob || value.is_null() {
        return encode_value(desc, buffer, value);
    }

    let id = match value {
        Value::Blob(blob) if blob.connection == blobs.connection_id() => blob.id,
        Value::Blob(_) => return Err(SqlRuntimeError::CrossConnectionBlob),
        Value::Bytes(data) => {
            // Check the target range before creating a blob that could not be stored.
            buffer.slice(desc.data_offset, 8)?;
            blobs.write_new_blob(data).await?
        }
        Value::Text(text) => {
            return Err(SqlRuntimeError::UnsupportedBlobSource(format!(
                "text value for blob column '{}' ({} bytes); pass bytes instead",
                desc.display_name(),
                text.len()
            )));
        }
        other => {
            return Err(SqlRuntimeError::UnsupportedBlobSource(format!(
                "{} value for blob column '{}'",
                other.kind(),
                desc.display_name()
            )));
        }
    };
    buffer.write(desc.data_offset, &id.0)?;
    set_null(desc, buffer, false)
}

/// Encode a full parameter set, position by position.
///
/// # Errors
/// `ArityMismatch` when `values` and `descs` differ in length, otherwise the
/// first [`encode`] failure.
pub async fn encode_row(
    descs: &[FieldDescriptor],
    buffer: &mut RowBuffer,
    values: &[Value],
    blobs: &dyn BlobWriter,
) -> Result<(), SqlRuntimeError> {
    if values.len() != descs.len() {
        return Err(SqlRuntimeError::ArityMismatch {
            expected: descs.len(),
            received: values.len(),
        });
    }
    for (desc, value) in descs.iter().zip(values) {
        encode(desc, buffer, value, blobs).await?;
    }
    Ok(())
}
