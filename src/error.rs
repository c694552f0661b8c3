//! Error types for rowforge.

use std::fmt;

use thiserror::Error;

use crate::value::ColumnType;

/// Where in an execution a driver failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStage {
    /// Opening a closed connection.
    Open,
    /// Executing the command and reading the result schema.
    Headers,
    /// Advancing the cursor.
    Rows,
    /// Executing a command that returns no rows.
    NonQuery,
}

impl fmt::Display for ExecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ExecStage::Open => "failed while opening the connection",
            ExecStage::Headers => "failed while establishing result headers",
            ExecStage::Rows => "failed during row iteration",
            ExecStage::NonQuery => "failed while executing the command",
        };
        f.write_str(stage)
    }
}

/// Errors raised by a driver (connection, command or cursor).
#[derive(Debug, Error)]
pub enum DriverError {
    /// SQLx error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A typed accessor was used on a column of another type.
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: ColumnType,
        actual: ColumnType,
    },

    /// A typed accessor was used on a NULL cell.
    #[error("Unexpected NULL value")]
    UnexpectedNull,

    /// Column ordinal past the end of the row.
    #[error("Column {ordinal} out of range ({count} columns)")]
    ColumnOutOfRange { ordinal: usize, count: usize },

    /// Row accessor used before `next()` returned true.
    #[error("Cursor is not positioned on a row")]
    NoCurrentRow,

    /// Connection is closed.
    #[error("Connection is closed")]
    Closed,

    /// No such query or procedure.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Column type the driver cannot read.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Query failed on the server.
    #[error("Query failed: {0}")]
    Query(String),
}

/// Errors converting a single cell into a field value.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Reading the cell failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// No conversion exists between the two types.
    #[error("cannot convert {from} into {to}")]
    Incompatible { from: ColumnType, to: &'static str },

    /// The value does not fit the target type.
    #[error("value out of range for {to}")]
    OutOfRange { to: &'static str },

    /// Text that does not parse as the target type.
    #[error("'{value}' is not a valid {to}")]
    Parse { value: String, to: &'static str },

    /// Name or number that matches no enum variant.
    #[error("'{value}' is not a variant of {enum_name}")]
    UnknownVariant {
        enum_name: &'static str,
        value: String,
    },
}

impl ConvertError {
    /// Create an incompatible-types error.
    pub fn incompatible(from: ColumnType, to: &'static str) -> Self {
        Self::Incompatible { from, to }
    }

    /// Create a parse error for textual input.
    pub fn parse(value: impl Into<String>, to: &'static str) -> Self {
        Self::Parse {
            value: value.into(),
            to,
        }
    }
}

/// The main error type for mapping operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// Target type or engine configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cell could not be converted into its field.
    #[error("Failed to set field '{field}' with value '{raw}': {source}")]
    Conversion {
        field: &'static str,
        raw: String,
        #[source]
        source: ConvertError,
    },

    /// The driver failed while executing.
    #[error("Execution error ({stage}): {source}")]
    Execution {
        stage: ExecStage,
        #[source]
        source: DriverError,
    },

    /// The compiled query was already disposed.
    #[error("Compiled query has been disposed")]
    Disposed,

    /// The call was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Positional parameter past the declared slots.
    #[error("Parameter index {index} out of range ({count} parameters)")]
    ParameterIndex { index: usize, count: usize },
}

impl MapError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap a driver error with the stage it happened in.
    pub fn execution(stage: ExecStage, source: DriverError) -> Self {
        Self::Execution { stage, source }
    }

    /// Returns the execution stage for driver failures.
    pub fn stage(&self) -> Option<ExecStage> {
        match self {
            Self::Execution { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type alias for mapping operations.
pub type MapResult<T> = Result<T, MapError>;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MapError::execution(ExecStage::Headers, DriverError::Closed);
        assert_eq!(
            err.to_string(),
            "Execution error (failed while establishing result headers): Connection is closed"
        );
        assert_eq!(err.stage(), Some(ExecStage::Headers));
    }

    #[test]
    fn test_conversion_display() {
        let err = MapError::Conversion {
            field: "Score",
            raw: "abc".into(),
            source: ConvertError::parse("abc", "i32"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to set field 'Score' with value 'abc': 'abc' is not a valid i32"
        );
        assert_eq!(err.stage(), None);
    }
}
