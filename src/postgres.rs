//! PostgreSQL driver over sqlx.
//!
//! Named `@parameters` in SQL text are rewritten to positional `$n` placeholders
//! in slot order. Stored procedure commands become
//! `SELECT * FROM name(param => $1, ...)` for readers and
//! `CALL name(param => $1, ...)` for non-queries.
//!
//! Result headers, including the nullability Postgres can infer, are described
//! once per statement text. The statement is prepared with the bound argument
//! types first, so sqlx's statement cache never holds server-guessed ones.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{Column as _, Executor as _, Postgres, Row as _, Type, TypeInfo as _, ValueRef as _};
use tracing::debug;
use uuid::Uuid;

use crate::driver::{Command, CommandKind, Connection, ConnectionId, ReadBehavior, Row, RowCursor};
use crate::error::{DriverError, DriverResult};
use crate::params::BoundParameter;
use crate::schema::ColumnMeta;
use crate::value::{ColumnType, Value};

/// Map a Postgres type name to a column type.
pub fn column_type(type_name: &str) -> ColumnType {
    match type_name {
        "BOOL" => ColumnType::Bool,
        "INT2" => ColumnType::I16,
        "INT4" => ColumnType::I32,
        "INT8" => ColumnType::I64,
        "FLOAT4" => ColumnType::F32,
        "FLOAT8" => ColumnType::F64,
        "NUMERIC" => ColumnType::Decimal,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => ColumnType::Text,
        "BYTEA" => ColumnType::Bytes,
        "UUID" => ColumnType::Uuid,
        "DATE" => ColumnType::Date,
        "TIME" => ColumnType::Time,
        "TIMESTAMP" => ColumnType::DateTime,
        "TIMESTAMPTZ" => ColumnType::DateTimeOffset,
        "JSON" | "JSONB" => ColumnType::Json,
        _ => ColumnType::Unknown,
    }
}

/// Replace `@name` with `$n` for every declared parameter, outside quotes.
pub fn rewrite_named_parameters(sql: &str, parameters: &[BoundParameter]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, n)) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        end = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &sql[start..end];
                match parameters.iter().position(|p| !name.is_empty() && p.matches(name)) {
                    Some(index) => {
                        let _ = write!(out, "${}", index + 1);
                    }
                    None => {
                        out.push('@');
                        out.push_str(name);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SqlShape {
    Rows,
    NonQuery,
}

fn procedure_call(command: &Command, shape: SqlShape) -> String {
    let args = command
        .parameters()
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} => ${}", p.bare_name(), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    match shape {
        SqlShape::Rows => format!("SELECT * FROM {}({})", command.text(), args),
        SqlShape::NonQuery => format!("CALL {}({})", command.text(), args),
    }
}

struct PreparedSql {
    names: Vec<String>,
    sql: String,
    /// Described on first execution.
    columns: Option<Arc<[ColumnMeta]>>,
}

impl PreparedSql {
    fn new(command: &Command, shape: SqlShape) -> Self {
        let sql = match command.kind() {
            CommandKind::Text => rewrite_named_parameters(command.text(), command.parameters()),
            CommandKind::StoredProcedure => procedure_call(command, shape),
        };
        debug!("Prepared SQL for {}: {}", command.text(), sql);
        Self {
            names: command
                .parameters()
                .iter()
                .map(|p| p.bare_name().to_string())
                .collect(),
            sql,
            columns: None,
        }
    }

    fn fits(&self, command: &Command) -> bool {
        self.names.len() == command.parameters().len()
            && self
                .names
                .iter()
                .zip(command.parameters())
                .all(|(name, p)| p.matches(name))
    }
}

type StatementKey = (Arc<str>, CommandKind, SqlShape);

fn prepared_sql<'s>(
    statements: &'s mut HashMap<StatementKey, PreparedSql>,
    command: &Command,
    shape: SqlShape,
) -> &'s mut PreparedSql {
    let key = (command.shared_text().clone(), command.kind(), shape);
    let prepared = statements
        .entry(key)
        .or_insert_with(|| PreparedSql::new(command, shape));
    if !prepared.fits(command) {
        *prepared = PreparedSql::new(command, shape);
    }
    prepared
}

/// Server type of a slot, matching what [`bind_value`] sends.
fn parameter_type(parameter: &BoundParameter) -> PgTypeInfo {
    match parameter.value().kind().or(parameter.param_type()) {
        Some(ColumnType::Bool) => <bool as Type<Postgres>>::type_info(),
        Some(ColumnType::I16) => <i16 as Type<Postgres>>::type_info(),
        Some(ColumnType::I32) => <i32 as Type<Postgres>>::type_info(),
        Some(ColumnType::I64) => <i64 as Type<Postgres>>::type_info(),
        Some(ColumnType::F32) => <f32 as Type<Postgres>>::type_info(),
        Some(ColumnType::F64) => <f64 as Type<Postgres>>::type_info(),
        Some(ColumnType::Decimal) => <Decimal as Type<Postgres>>::type_info(),
        Some(ColumnType::Bytes) => <Vec<u8> as Type<Postgres>>::type_info(),
        Some(ColumnType::Uuid) => <Uuid as Type<Postgres>>::type_info(),
        Some(ColumnType::Date) => <NaiveDate as Type<Postgres>>::type_info(),
        Some(ColumnType::Time) => <NaiveTime as Type<Postgres>>::type_info(),
        Some(ColumnType::DateTime) => <NaiveDateTime as Type<Postgres>>::type_info(),
        Some(ColumnType::DateTimeOffset) => <DateTime<Utc> as Type<Postgres>>::type_info(),
        Some(ColumnType::Json) => <serde_json::Value as Type<Postgres>>::type_info(),
        Some(ColumnType::Text) | Some(ColumnType::Unknown) | None => {
            <String as Type<Postgres>>::type_info()
        }
    }
}

/// Bind a parameter value to a raw SQLx query.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameter: &BoundParameter,
) -> Query<'q, Postgres, PgArguments> {
    match parameter.value() {
        Value::Null => bind_null(query, parameter.param_type()),
        Value::Bool(v) => query.bind(*v),
        Value::I16(v) => query.bind(*v),
        Value::I32(v) => query.bind(*v),
        Value::I64(v) => query.bind(*v),
        Value::F32(v) => query.bind(*v),
        Value::F64(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Uuid(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeOffset(v) => query.bind(*v),
        Value::Json(v) => query.bind(v.clone()),
    }
}

/// NULL keeps the slot's inferred type so the server sees a typed parameter.
fn bind_null<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param_type: Option<ColumnType>,
) -> Query<'q, Postgres, PgArguments> {
    match param_type {
        Some(ColumnType::Bool) => query.bind(None::<bool>),
        Some(ColumnType::I16) => query.bind(None::<i16>),
        Some(ColumnType::I32) => query.bind(None::<i32>),
        Some(ColumnType::I64) => query.bind(None::<i64>),
        Some(ColumnType::F32) => query.bind(None::<f32>),
        Some(ColumnType::F64) => query.bind(None::<f64>),
        Some(ColumnType::Decimal) => query.bind(None::<Decimal>),
        Some(ColumnType::Bytes) => query.bind(None::<Vec<u8>>),
        Some(ColumnType::Uuid) => query.bind(None::<Uuid>),
        Some(ColumnType::Date) => query.bind(None::<NaiveDate>),
        Some(ColumnType::Time) => query.bind(None::<NaiveTime>),
        Some(ColumnType::DateTime) => query.bind(None::<NaiveDateTime>),
        Some(ColumnType::DateTimeOffset) => query.bind(None::<DateTime<Utc>>),
        Some(ColumnType::Json) => query.bind(None::<serde_json::Value>),
        Some(ColumnType::Text) | Some(ColumnType::Unknown) | None => query.bind(None::<String>),
    }
}

/// A connection checked out of a `PgPool` while open.
pub struct PostgresConnection {
    id: ConnectionId,
    pool: PgPool,
    conn: Option<PoolConnection<Postgres>>,
    statements: HashMap<StatementKey, PreparedSql>,
}

impl PostgresConnection {
    /// Wrap a pool. The connection starts closed.
    pub fn new(pool: PgPool) -> Self {
        Self {
            id: ConnectionId::next(),
            pool,
            conn: None,
            statements: HashMap::new(),
        }
    }

    /// Connect to a database using a connection URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let conn = PostgresConnection::connect("postgres://localhost/mydb").await?;
    /// ```
    pub async fn connect(url: &str) -> DriverResult<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Connection for PostgresConnection {
    type Cursor<'c> = PgCursor<'c>;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn open(&mut self) -> impl Future<Output = DriverResult<()>> + Send {
        async move {
            let conn = self.pool.acquire().await?;
            self.conn = Some(conn);
            Ok(())
        }
    }

    fn close(&mut self) {
        // returns the connection to the pool
        self.conn = None;
    }

    fn execute_reader<'c>(
        &'c mut self,
        command: &'c Command,
        behavior: ReadBehavior,
    ) -> impl Future<Output = DriverResult<PgCursor<'c>>> + Send + 'c {
        async move {
            let Self {
                conn, statements, ..
            } = self;
            let conn = conn.as_mut().ok_or(DriverError::Closed)?;
            let prepared = prepared_sql(statements, command, SqlShape::Rows);

            let columns = match prepared.columns.clone() {
                Some(columns) => columns,
                None => {
                    let types: Vec<PgTypeInfo> =
                        command.parameters().iter().map(parameter_type).collect();
                    (&mut **conn).prepare_with(&prepared.sql, &types).await?;
                    let described = (&mut **conn).describe(&prepared.sql).await?;
                    let columns: Arc<[ColumnMeta]> = described
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(ordinal, c)| {
                            let meta = ColumnMeta::new(c.name(), column_type(c.type_info().name()));
                            match described.nullable(ordinal) {
                                Some(nullable) => meta.nullable(nullable),
                                None => meta,
                            }
                        })
                        .collect();
                    debug!("Described {} columns for {}", columns.len(), prepared.sql);
                    prepared.columns = Some(columns.clone());
                    columns
                }
            };
            let prepared: &'c PreparedSql = prepared;

            let query = command
                .parameters()
                .iter()
                .fold(sqlx::query(&prepared.sql), bind_value);
            let rows = query.fetch(&mut **conn);
            Ok(PgCursor {
                columns,
                rows,
                current: None,
                single_row: behavior.single_row,
                yielded: false,
            })
        }
    }

    fn execute_non_query<'c>(
        &'c mut self,
        command: &'c Command,
    ) -> impl Future<Output = DriverResult<u64>> + Send + 'c {
        async move {
            let Self {
                conn, statements, ..
            } = self;
            let conn = conn.as_mut().ok_or(DriverError::Closed)?;
            let sql = &prepared_sql(statements, command, SqlShape::NonQuery).sql;
            let result = command
                .parameters()
                .iter()
                .fold(sqlx::query(sql), bind_value)
                .execute(&mut **conn)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

/// Forward-only cursor over a Postgres result.
pub struct PgCursor<'c> {
    columns: Arc<[ColumnMeta]>,
    rows: BoxStream<'c, Result<PgRow, sqlx::Error>>,
    current: Option<PgRow>,
    single_row: bool,
    yielded: bool,
}

impl PgCursor<'_> {
    fn row(&self) -> DriverResult<&PgRow> {
        self.current.as_ref().ok_or(DriverError::NoCurrentRow)
    }

    fn nullable<'r, T>(&'r self, ordinal: usize) -> DriverResult<Option<T>>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        Ok(self.row()?.try_get::<Option<T>, _>(ordinal)?)
    }
}

macro_rules! typed_getters {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            fn $name(&self, ordinal: usize) -> DriverResult<$ty> {
                Ok(self.row()?.try_get::<$ty, _>(ordinal)?)
            }
        )*
    };
}

impl Row for PgCursor<'_> {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn is_null(&self, ordinal: usize) -> DriverResult<bool> {
        Ok(self.row()?.try_get_raw(ordinal)?.is_null())
    }

    typed_getters! {
        get_bool => bool,
        get_i16 => i16,
        get_i32 => i32,
        get_i64 => i64,
        get_f32 => f32,
        get_f64 => f64,
        get_decimal => Decimal,
        get_str => &str,
        get_bytes => &[u8],
        get_uuid => Uuid,
        get_date => NaiveDate,
        get_time => NaiveTime,
        get_datetime => NaiveDateTime,
        get_json => serde_json::Value,
    }

    fn get_datetime_offset(&self, ordinal: usize) -> DriverResult<DateTime<FixedOffset>> {
        let utc: DateTime<Utc> = self.row()?.try_get(ordinal)?;
        Ok(utc.fixed_offset())
    }

    fn get_value(&self, ordinal: usize) -> DriverResult<Value> {
        let column_type = self
            .columns
            .get(ordinal)
            .map(|c| c.column_type)
            .ok_or(DriverError::ColumnOutOfRange {
                ordinal,
                count: self.columns.len(),
            })?;
        let value = match column_type {
            ColumnType::Bool => self.nullable::<bool>(ordinal)?.map(Value::Bool),
            ColumnType::I16 => self.nullable::<i16>(ordinal)?.map(Value::I16),
            ColumnType::I32 => self.nullable::<i32>(ordinal)?.map(Value::I32),
            ColumnType::I64 => self.nullable::<i64>(ordinal)?.map(Value::I64),
            ColumnType::F32 => self.nullable::<f32>(ordinal)?.map(Value::F32),
            ColumnType::F64 => self.nullable::<f64>(ordinal)?.map(Value::F64),
            ColumnType::Decimal => self.nullable::<Decimal>(ordinal)?.map(Value::Decimal),
            ColumnType::Text => self.nullable::<String>(ordinal)?.map(Value::Text),
            ColumnType::Bytes => self.nullable::<Vec<u8>>(ordinal)?.map(Value::Bytes),
            ColumnType::Uuid => self.nullable::<Uuid>(ordinal)?.map(Value::Uuid),
            ColumnType::Date => self.nullable::<NaiveDate>(ordinal)?.map(Value::Date),
            ColumnType::Time => self.nullable::<NaiveTime>(ordinal)?.map(Value::Time),
            ColumnType::DateTime => self.nullable::<NaiveDateTime>(ordinal)?.map(Value::DateTime),
            ColumnType::DateTimeOffset => self
                .nullable::<DateTime<Utc>>(ordinal)?
                .map(|v| Value::DateTimeOffset(v.fixed_offset())),
            ColumnType::Json => self.nullable::<serde_json::Value>(ordinal)?.map(Value::Json),
            ColumnType::Unknown => {
                let row = self.row()?;
                let type_name = row.columns()[ordinal].type_info().name().to_string();
                return Err(DriverError::Unsupported(format!(
                    "column {} has unsupported type {}",
                    ordinal, type_name
                )));
            }
        };
        Ok(value.unwrap_or(Value::Null))
    }
}

impl RowCursor for PgCursor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next(&mut self) -> impl Future<Output = DriverResult<bool>> + Send {
        async move {
            if self.single_row && self.yielded {
                self.current = None;
                return Ok(false);
            }
            match self.rows.next().await {
                Some(Ok(row)) => {
                    self.current = Some(row);
                    self.yielded = true;
                    Ok(true)
                }
                Some(Err(e)) => {
                    self.current = None;
                    Err(e.into())
                }
                None => {
                    self.current = None;
                    Ok(false)
                }
            }
        }
    }
}
