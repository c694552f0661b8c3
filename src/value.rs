//! Dynamic cell and parameter values.
//!
//! [`Value`] is what a driver hands back for a boxed read and what callers bind
//! into parameter slots. [`ColumnType`] is the stable type identifier drivers
//! report for each result column.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DriverError, DriverResult};

/// Stable identifier for a column or parameter type.
///
/// The discriminants feed the schema fingerprint and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ColumnType {
    Bool = 1,
    I16 = 2,
    I32 = 3,
    I64 = 4,
    F32 = 5,
    F64 = 6,
    Decimal = 7,
    Text = 8,
    Bytes = 9,
    Uuid = 10,
    Date = 11,
    Time = 12,
    DateTime = 13,
    DateTimeOffset = 14,
    Json = 15,
    /// A type the driver cannot classify; only boxed reads work.
    Unknown = 255,
}

impl ColumnType {
    /// Stable numeric id.
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::I16 => "int2",
            ColumnType::I32 => "int4",
            ColumnType::I64 => "int8",
            ColumnType::F32 => "float4",
            ColumnType::F64 => "float8",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::Bytes => "bytes",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::DateTime => "datetime",
            ColumnType::DateTimeOffset => "datetimeoffset",
            ColumnType::Json => "json",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Json(serde_json::Value),
}

macro_rules! exact_accessor {
    ($(#[$meta:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(&self) -> DriverResult<$ty> {
            match self {
                Value::$variant(v) => Ok(v.clone()),
                other => Err(other.mismatch(ColumnType::$variant)),
            }
        }
    };
}

impl Value {
    /// Type of a non-null value.
    pub fn kind(&self) -> Option<ColumnType> {
        let kind = match self {
            Value::Null => return None,
            Value::Bool(_) => ColumnType::Bool,
            Value::I16(_) => ColumnType::I16,
            Value::I32(_) => ColumnType::I32,
            Value::I64(_) => ColumnType::I64,
            Value::F32(_) => ColumnType::F32,
            Value::F64(_) => ColumnType::F64,
            Value::Decimal(_) => ColumnType::Decimal,
            Value::Text(_) => ColumnType::Text,
            Value::Bytes(_) => ColumnType::Bytes,
            Value::Uuid(_) => ColumnType::Uuid,
            Value::Date(_) => ColumnType::Date,
            Value::Time(_) => ColumnType::Time,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::DateTimeOffset(_) => ColumnType::DateTimeOffset,
            Value::Json(_) => ColumnType::Json,
        };
        Some(kind)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch(&self, expected: ColumnType) -> DriverError {
        match self.kind() {
            None => DriverError::UnexpectedNull,
            Some(actual) => DriverError::TypeMismatch { expected, actual },
        }
    }

    exact_accessor!(as_bool, Bool, bool);
    exact_accessor!(as_i16, I16, i16);
    exact_accessor!(as_i32, I32, i32);
    exact_accessor!(as_i64, I64, i64);
    exact_accessor!(as_f32, F32, f32);
    exact_accessor!(as_f64, F64, f64);
    exact_accessor!(as_decimal, Decimal, Decimal);
    exact_accessor!(as_uuid, Uuid, Uuid);
    exact_accessor!(as_date, Date, NaiveDate);
    exact_accessor!(as_time, Time, NaiveTime);
    exact_accessor!(as_datetime, DateTime, NaiveDateTime);
    exact_accessor!(as_datetime_offset, DateTimeOffset, DateTime<FixedOffset>);
    exact_accessor!(
        /// Clones the JSON document.
        as_json,
        Json,
        serde_json::Value
    );

    pub fn as_str(&self) -> DriverResult<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(other.mismatch(ColumnType::Text)),
        }
    }

    pub fn as_bytes(&self) -> DriverResult<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch(ColumnType::Bytes)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                f.write_str("0x")?;
                for byte in v {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::DateTimeOffset(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTimeOffset(v.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
