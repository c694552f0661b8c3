//! Driver seam: connections, commands and row cursors.
//!
//! Everything the engine needs from a database driver goes through the traits
//! here. [`crate::memory`] and [`crate::postgres`] implement them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DriverError, DriverResult, ExecStage, MapError};
use crate::params::{BoundParameter, Params, SizeLimits};
use crate::schema::ColumnMeta;
use crate::value::Value;

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Free-form SQL.
    Text,
    /// Stored procedure or set-returning function name.
    StoredProcedure,
}

impl CommandKind {
    /// SQL contains whitespace; a bare identifier is a procedure name.
    pub fn infer(text: &str) -> Self {
        if text.trim().contains(char::is_whitespace) {
            CommandKind::Text
        } else {
            CommandKind::StoredProcedure
        }
    }
}

/// A command text with its parameter slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: Arc<str>,
    kind: CommandKind,
    parameters: Vec<BoundParameter>,
}

impl Command {
    pub fn new(text: impl Into<Arc<str>>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            parameters: Vec::new(),
        }
    }

    /// Command with one unbound slot per name, in order.
    pub fn with_slots<'a>(
        text: impl Into<Arc<str>>,
        kind: CommandKind,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut command = Self::new(text, kind);
        command.parameters = names.into_iter().map(BoundParameter::new).collect();
        command
    }

    /// Command with one slot per named value, each value assigned.
    pub fn with_params(
        text: impl Into<Arc<str>>,
        kind: CommandKind,
        params: Params,
        limits: SizeLimits,
    ) -> Self {
        let mut command = Self::new(text, kind);
        command.parameters = params
            .into_iter()
            .map(|(name, value)| {
                let mut slot = BoundParameter::new(&name);
                slot.assign(value, limits);
                slot
            })
            .collect();
        command
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn shared_text(&self) -> &Arc<str> {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [BoundParameter] {
        &mut self.parameters
    }

    /// Slot named `name` (prefixed or bare).
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut BoundParameter> {
        self.parameters.iter_mut().find(|p| p.matches(name))
    }
}

/// Hints for how a reader will be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadBehavior {
    /// Only the first row will be read.
    pub single_row: bool,
    /// Columns are read in order, one row at a time.
    pub sequential: bool,
}

impl ReadBehavior {
    pub const DEFAULT: ReadBehavior = ReadBehavior {
        single_row: false,
        sequential: false,
    };
    pub const SINGLE_ROW: ReadBehavior = ReadBehavior {
        single_row: true,
        sequential: false,
    };
    pub const SEQUENTIAL: ReadBehavior = ReadBehavior {
        single_row: false,
        sequential: true,
    };
}

/// Column-indexed access to the current row.
///
/// Typed getters are exact: asking for an `i32` from an `int8` column is a
/// [`DriverError::TypeMismatch`]. [`Row::get_value`] is the boxed read.
pub trait Row {
    fn column_count(&self) -> usize;

    fn is_null(&self, ordinal: usize) -> DriverResult<bool>;

    fn get_bool(&self, ordinal: usize) -> DriverResult<bool>;
    fn get_i16(&self, ordinal: usize) -> DriverResult<i16>;
    fn get_i32(&self, ordinal: usize) -> DriverResult<i32>;
    fn get_i64(&self, ordinal: usize) -> DriverResult<i64>;
    fn get_f32(&self, ordinal: usize) -> DriverResult<f32>;
    fn get_f64(&self, ordinal: usize) -> DriverResult<f64>;
    fn get_decimal(&self, ordinal: usize) -> DriverResult<Decimal>;
    fn get_str(&self, ordinal: usize) -> DriverResult<&str>;
    fn get_bytes(&self, ordinal: usize) -> DriverResult<&[u8]>;
    fn get_uuid(&self, ordinal: usize) -> DriverResult<Uuid>;
    fn get_date(&self, ordinal: usize) -> DriverResult<NaiveDate>;
    fn get_time(&self, ordinal: usize) -> DriverResult<NaiveTime>;
    fn get_datetime(&self, ordinal: usize) -> DriverResult<NaiveDateTime>;
    fn get_datetime_offset(&self, ordinal: usize) -> DriverResult<DateTime<FixedOffset>>;
    fn get_json(&self, ordinal: usize) -> DriverResult<serde_json::Value>;

    /// Read the cell as a dynamic value. NULL reads as [`Value::Null`].
    fn get_value(&self, ordinal: usize) -> DriverResult<Value>;
}

/// A forward-only cursor over a result set.
pub trait RowCursor: Row + Send {
    /// Result schema, available before the first `next()`.
    fn columns(&self) -> &[ColumnMeta];

    /// Advance to the next row. Returns `false` once exhausted.
    fn next(&mut self) -> impl Future<Output = DriverResult<bool>> + Send;
}

/// A database connection that may be open or closed.
pub trait Connection: Send {
    type Cursor<'c>: RowCursor
    where
        Self: 'c;

    fn id(&self) -> ConnectionId;

    fn is_open(&self) -> bool;

    fn open(&mut self) -> impl Future<Output = DriverResult<()>> + Send;

    /// Release the underlying session. Must not block.
    fn close(&mut self);

    fn execute_reader<'c>(
        &'c mut self,
        command: &'c Command,
        behavior: ReadBehavior,
    ) -> impl Future<Output = DriverResult<Self::Cursor<'c>>> + Send + 'c;

    /// Execute a command that returns no rows; yields the affected row count.
    fn execute_non_query<'c>(
        &'c mut self,
        command: &'c Command,
    ) -> impl Future<Output = DriverResult<u64>> + Send + 'c;
}

/// Implements [`Row`] for a type with
/// `fn cell(&self, ordinal: usize) -> DriverResult<&Value>` and `fn width(&self) -> usize`.
macro_rules! impl_value_row {
    ($ty:ty) => {
        impl $crate::driver::Row for $ty {
            fn column_count(&self) -> usize {
                self.width()
            }
            fn is_null(&self, ordinal: usize) -> $crate::error::DriverResult<bool> {
                Ok(self.cell(ordinal)?.is_null())
            }
            fn get_bool(&self, ordinal: usize) -> $crate::error::DriverResult<bool> {
                self.cell(ordinal)?.as_bool()
            }
            fn get_i16(&self, ordinal: usize) -> $crate::error::DriverResult<i16> {
                self.cell(ordinal)?.as_i16()
            }
            fn get_i32(&self, ordinal: usize) -> $crate::error::DriverResult<i32> {
                self.cell(ordinal)?.as_i32()
            }
            fn get_i64(&self, ordinal: usize) -> $crate::error::DriverResult<i64> {
                self.cell(ordinal)?.as_i64()
            }
            fn get_f32(&self, ordinal: usize) -> $crate::error::DriverResult<f32> {
                self.cell(ordinal)?.as_f32()
            }
            fn get_f64(&self, ordinal: usize) -> $crate::error::DriverResult<f64> {
                self.cell(ordinal)?.as_f64()
            }
            fn get_decimal(
                &self,
                ordinal: usize,
            ) -> $crate::error::DriverResult<rust_decimal::Decimal> {
                self.cell(ordinal)?.as_decimal()
            }
            fn get_str(&self, ordinal: usize) -> $crate::error::DriverResult<&str> {
                self.cell(ordinal)?.as_str()
            }
            fn get_bytes(&self, ordinal: usize) -> $crate::error::DriverResult<&[u8]> {
                self.cell(ordinal)?.as_bytes()
            }
            fn get_uuid(&self, ordinal: usize) -> $crate::error::DriverResult<uuid::Uuid> {
                self.cell(ordinal)?.as_uuid()
            }
            fn get_date(&self, ordinal: usize) -> $crate::error::DriverResult<chrono::NaiveDate> {
                self.cell(ordinal)?.as_date()
            }
            fn get_time(&self, ordinal: usize) -> $crate::error::DriverResult<chrono::NaiveTime> {
                self.cell(ordinal)?.as_time()
            }
            fn get_datetime(
                &self,
                ordinal: usize,
            ) -> $crate::error::DriverResult<chrono::NaiveDateTime> {
                self.cell(ordinal)?.as_datetime()
            }
            fn get_datetime_offset(
                &self,
                ordinal: usize,
            ) -> $crate::error::DriverResult<chrono::DateTime<chrono::FixedOffset>> {
                self.cell(ordinal)?.as_datetime_offset()
            }
            fn get_json(&self, ordinal: usize) -> $crate::error::DriverResult<serde_json::Value> {
                self.cell(ordinal)?.as_json()
            }
            fn get_value(&self, ordinal: usize) -> $crate::error::DriverResult<$crate::value::Value> {
                Ok(self.cell(ordinal)?.clone())
            }
        }
    };
}

pub(crate) use impl_value_row;

/// Map a driver result into the execution error for `stage`.
pub(crate) fn at_stage(stage: ExecStage) -> impl FnOnce(DriverError) -> MapError {
    move |source| MapError::execution(stage, source)
}
