//! [`FieldType`] implementations for the built-in field types.
//!
//! Exact column types go through the typed row accessors. Everything else is a
//! boxed read converted here: numeric widening and narrowing with range checks,
//! GUIDs from text or 16 raw bytes, date/time variants, decimal/float coercions
//! and parsing from text.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use uuid::Uuid;

use crate::driver::Row;
use crate::error::{ConvertError, DriverError};
use crate::record::{FieldType, ReadPath};
use crate::value::{ColumnType, Value};

fn incompatible<T>(value: &Value, to: &'static str) -> Result<T, ConvertError> {
    match value.kind() {
        None => Err(DriverError::UnexpectedNull.into()),
        Some(from) => Err(ConvertError::incompatible(from, to)),
    }
}

fn parse_text<T: FromStr>(text: &str, to: &'static str) -> Result<T, ConvertError> {
    text.trim()
        .parse()
        .map_err(|_| ConvertError::parse(text, to))
}

/// Any numeric value as an `i64`, rounding fractional values to nearest.
fn integral(value: &Value, to: &'static str) -> Result<i64, ConvertError> {
    let out_of_range = || ConvertError::OutOfRange { to };
    match value {
        Value::Bool(b) => Ok(*b as i64),
        Value::I16(v) => Ok(*v as i64),
        Value::I32(v) => Ok(*v as i64),
        Value::I64(v) => Ok(*v),
        Value::F32(v) => float_to_i64(*v as f64).ok_or_else(out_of_range),
        Value::F64(v) => float_to_i64(*v).ok_or_else(out_of_range),
        Value::Decimal(d) => d.round().to_i64().ok_or_else(out_of_range),
        Value::Text(s) => parse_text(s, to),
        other => incompatible(other, to),
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    let rounded = v.round_ties_even();
    if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
        Some(rounded as i64)
    } else {
        None
    }
}

fn floating(value: &Value, to: &'static str) -> Result<f64, ConvertError> {
    match value {
        Value::I16(v) => Ok(*v as f64),
        Value::I32(v) => Ok(*v as f64),
        Value::I64(v) => Ok(*v as f64),
        Value::F32(v) => Ok(*v as f64),
        Value::F64(v) => Ok(*v),
        Value::Decimal(d) => d.to_f64().ok_or(ConvertError::OutOfRange { to }),
        Value::Text(s) => parse_text(s, to),
        other => incompatible(other, to),
    }
}

macro_rules! integer_field {
    ($ty:ty, $column:ident, $getter:ident) => {
        impl FieldType for $ty {
            const EXACT: Option<ColumnType> = Some(ColumnType::$column);

            fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
                Ok(row.$getter(ordinal)?)
            }

            fn convert(value: Value) -> Result<Self, ConvertError> {
                let wide = integral(&value, stringify!($ty))?;
                <$ty>::try_from(wide).map_err(|_| ConvertError::OutOfRange {
                    to: stringify!($ty),
                })
            }
        }
    };
}

integer_field!(i16, I16, get_i16);
integer_field!(i32, I32, get_i32);
integer_field!(i64, I64, get_i64);

impl FieldType for bool {
    const EXACT: Option<ColumnType> = Some(ColumnType::Bool);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_bool(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match &value {
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => match s.trim() {
                t if t.eq_ignore_ascii_case("true") || t == "1" => Ok(true),
                t if t.eq_ignore_ascii_case("false") || t == "0" => Ok(false),
                _ => Err(ConvertError::parse(s.as_str(), "bool")),
            },
            Value::I16(_) | Value::I32(_) | Value::I64(_) | Value::Decimal(_) => {
                Ok(integral(&value, "bool")? != 0)
            }
            other => incompatible(other, "bool"),
        }
    }
}

impl FieldType for f64 {
    const EXACT: Option<ColumnType> = Some(ColumnType::F64);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_f64(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        floating(&value, "f64")
    }
}

impl FieldType for f32 {
    const EXACT: Option<ColumnType> = Some(ColumnType::F32);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_f32(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        let wide = floating(&value, "f32")?;
        if wide.is_finite() && wide.abs() > f32::MAX as f64 {
            return Err(ConvertError::OutOfRange { to: "f32" });
        }
        Ok(wide as f32)
    }
}

impl FieldType for Decimal {
    const EXACT: Option<ColumnType> = Some(ColumnType::Decimal);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_decimal(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        let out_of_range = || ConvertError::OutOfRange { to: "decimal" };
        match value {
            Value::Decimal(d) => Ok(d),
            Value::I16(v) => Ok(Decimal::from(v)),
            Value::I32(v) => Ok(Decimal::from(v)),
            Value::I64(v) => Ok(Decimal::from(v)),
            Value::F32(v) => Decimal::from_f32(v).ok_or_else(out_of_range),
            Value::F64(v) => Decimal::from_f64(v).ok_or_else(out_of_range),
            Value::Text(s) => parse_text(&s, "decimal"),
            other => incompatible(&other, "decimal"),
        }
    }
}

impl FieldType for String {
    const EXACT: Option<ColumnType> = Some(ColumnType::Text);
    const NULLABLE: bool = true;

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_str(ordinal)?.to_owned())
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Bytes(b) => {
                String::from_utf8(b).map_err(|_| ConvertError::incompatible(ColumnType::Bytes, "String"))
            }
            Value::Null => Err(DriverError::UnexpectedNull.into()),
            other => Ok(other.to_string()),
        }
    }
}

impl FieldType for Vec<u8> {
    const EXACT: Option<ColumnType> = Some(ColumnType::Bytes);
    const NULLABLE: bool = true;

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_bytes(ordinal)?.to_vec())
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
            other => incompatible(&other, "Vec<u8>"),
        }
    }
}

impl FieldType for Uuid {
    const EXACT: Option<ColumnType> = Some(ColumnType::Uuid);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_uuid(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(s) => parse_text(&s, "uuid"),
            Value::Bytes(b) => {
                Uuid::from_slice(&b).map_err(|_| ConvertError::incompatible(ColumnType::Bytes, "uuid"))
            }
            other => incompatible(&other, "uuid"),
        }
    }
}

impl FieldType for NaiveDate {
    const EXACT: Option<ColumnType> = Some(ColumnType::Date);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_date(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Date(d) => Ok(d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::DateTimeOffset(dt) => Ok(dt.date_naive()),
            Value::Text(s) => parse_text(&s, "date"),
            other => incompatible(&other, "date"),
        }
    }
}

impl FieldType for NaiveTime {
    const EXACT: Option<ColumnType> = Some(ColumnType::Time);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_time(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Time(t) => Ok(t),
            Value::DateTime(dt) => Ok(dt.time()),
            Value::DateTimeOffset(dt) => Ok(dt.time()),
            Value::Text(s) => parse_text(&s, "time"),
            other => incompatible(&other, "time"),
        }
    }
}

fn parse_naive_datetime(text: &str) -> Result<NaiveDateTime, ConvertError> {
    let trimmed = text.trim();
    trimmed
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| ConvertError::parse(text, "datetime"))
}

impl FieldType for NaiveDateTime {
    const EXACT: Option<ColumnType> = Some(ColumnType::DateTime);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_datetime(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            Value::DateTimeOffset(dt) => Ok(dt.naive_local()),
            Value::Text(s) => parse_naive_datetime(&s),
            other => incompatible(&other, "datetime"),
        }
    }
}

impl FieldType for DateTime<FixedOffset> {
    const EXACT: Option<ColumnType> = Some(ColumnType::DateTimeOffset);

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_datetime_offset(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::DateTimeOffset(dt) => Ok(dt),
            Value::DateTime(dt) => Ok(dt.and_utc().fixed_offset()),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN).and_utc().fixed_offset()),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map_err(|_| ConvertError::parse(s, "datetimeoffset")),
            other => incompatible(&other, "datetimeoffset"),
        }
    }
}

impl FieldType for DateTime<Utc> {
    // no direct accessor; offset columns convert
    const EXACT: Option<ColumnType> = None;

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_datetime_offset(ordinal)?.with_timezone(&Utc))
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        DateTime::<FixedOffset>::convert(value).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FieldType for serde_json::Value {
    const EXACT: Option<ColumnType> = Some(ColumnType::Json);
    const NULLABLE: bool = true;

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        Ok(row.get_json(ordinal)?)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => serde_json::from_str(&s).map_err(|_| ConvertError::parse(s, "json")),
            Value::Bool(b) => Ok(b.into()),
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            Value::I64(v) => Ok(v.into()),
            Value::F64(v) => Ok(v.into()),
            other => incompatible(&other, "json"),
        }
    }
}

impl<F: FieldType> FieldType for Option<F> {
    const EXACT: Option<ColumnType> = F::EXACT;
    const NULLABLE: bool = true;

    fn read_path(column: ColumnType) -> ReadPath {
        F::read_path(column)
    }

    fn read_exact(row: &dyn Row, ordinal: usize) -> Result<Self, ConvertError> {
        F::read_exact(row, ordinal).map(Some)
    }

    fn convert(value: Value) -> Result<Self, ConvertError> {
        match value {
            Value::Null => Ok(None),
            other => F::convert(other).map(Some),
        }
    }

    fn parse_name(name: &str) -> Result<Self, ConvertError> {
        F::parse_name(name).map(Some)
    }
}
