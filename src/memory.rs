//! In-memory scripted driver.
//!
//! A [`MemoryDatabase`] maps command texts to handlers that produce a
//! [`ResultSet`] from the bound parameters. Connections track how often they
//! were opened, closed and used, which makes the open/close policy observable.
//!
//! ```rust
//! use rowforge::memory::{MemoryDatabase, ResultSet};
//! use rowforge::prelude::*;
//!
//! let db = MemoryDatabase::new();
//! db.on_query("SELECT Id FROM Employees", |_| {
//!     Ok(ResultSet::new([ColumnMeta::new("Id", ColumnType::I32)])
//!         .row([Value::I32(1)])
//!         .row([Value::I32(2)]))
//! });
//! let conn = db.connect();
//! assert!(!conn.is_open());
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::driver::{
    Command, CommandKind, Connection, ConnectionId, ReadBehavior, RowCursor, impl_value_row,
};
use crate::error::{DriverError, DriverResult};
use crate::params::BoundParameter;
use crate::schema::ColumnMeta;
use crate::value::Value;

type Handler = Arc<dyn Fn(&[BoundParameter]) -> DriverResult<ResultSet> + Send + Sync>;

/// Rows (or an affected-row count) a handler returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[ColumnMeta]>,
    rows: Vec<Vec<Value>>,
    affected: u64,
    fail_after: Option<(usize, String)>,
}

impl ResultSet {
    pub fn new(columns: impl IntoIterator<Item = ColumnMeta>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: Vec::new(),
            affected: 0,
            fail_after: None,
        }
    }

    /// A result with no columns, for non-queries.
    pub fn empty() -> Self {
        Self::new([])
    }

    pub fn row(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.rows.push(values.into_iter().collect());
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Affected-row count reported by a non-query.
    pub fn affected(mut self, rows: u64) -> Self {
        self.affected = rows;
        self
    }

    /// Make the cursor fail after yielding `rows` rows.
    pub fn fail_after(mut self, rows: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((rows, message.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A scripted database shared by its connections.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    handlers: Arc<DashMap<(CommandKind, String), Handler>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the SQL text `text`.
    pub fn on_query<F>(&self, text: impl Into<String>, handler: F)
    where
        F: Fn(&[BoundParameter]) -> DriverResult<ResultSet> + Send + Sync + 'static,
    {
        self.handlers
            .insert((CommandKind::Text, text.into()), Arc::new(handler));
    }

    /// Answer the stored procedure `name`.
    pub fn on_procedure<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[BoundParameter]) -> DriverResult<ResultSet> + Send + Sync + 'static,
    {
        self.handlers
            .insert((CommandKind::StoredProcedure, name.into()), Arc::new(handler));
    }

    /// A new, closed connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            id: ConnectionId::next(),
            db: self.clone(),
            open: false,
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    fn run(&self, command: &Command) -> DriverResult<ResultSet> {
        let handler = self
            .handlers
            .get(&(command.kind(), command.text().to_owned()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DriverError::UnknownCommand(command.text().to_owned()))?;
        handler(command.parameters())
    }
}

/// Usage counters of one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    executions: AtomicUsize,
}

impl ConnectionStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }
}

pub struct MemoryConnection {
    id: ConnectionId,
    db: MemoryDatabase,
    open: bool,
    stats: Arc<ConnectionStats>,
}

impl MemoryConnection {
    /// Counters that stay readable after the connection moves into a session.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    fn execute(&mut self, command: &Command) -> DriverResult<ResultSet> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        self.stats.executions.fetch_add(1, Ordering::Relaxed);
        self.db.run(command)
    }
}

impl Connection for MemoryConnection {
    type Cursor<'c> = MemoryCursor;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> impl Future<Output = DriverResult<()>> + Send {
        async move {
            tokio::task::yield_now().await;
            self.open = true;
            self.stats.opens.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.stats.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn execute_reader<'c>(
        &'c mut self,
        command: &'c Command,
        behavior: ReadBehavior,
    ) -> impl Future<Output = DriverResult<MemoryCursor>> + Send + 'c {
        async move {
            tokio::task::yield_now().await;
            let result = self.execute(command)?;
            Ok(MemoryCursor::new(result, behavior))
        }
    }

    fn execute_non_query<'c>(
        &'c mut self,
        command: &'c Command,
    ) -> impl Future<Output = DriverResult<u64>> + Send + 'c {
        async move {
            tokio::task::yield_now().await;
            Ok(self.execute(command)?.affected)
        }
    }
}

/// Cursor over a scripted result set.
pub struct MemoryCursor {
    columns: Arc<[ColumnMeta]>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    yielded: usize,
    single_row: bool,
    fail_after: Option<(usize, String)>,
}

impl MemoryCursor {
    fn new(result: ResultSet, behavior: ReadBehavior) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows.into_iter(),
            current: None,
            yielded: 0,
            single_row: behavior.single_row,
            fail_after: result.fail_after,
        }
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    fn cell(&self, ordinal: usize) -> DriverResult<&Value> {
        let row = self.current.as_ref().ok_or(DriverError::NoCurrentRow)?;
        row.get(ordinal).ok_or(DriverError::ColumnOutOfRange {
            ordinal,
            count: row.len(),
        })
    }

    fn advance(&mut self) -> DriverResult<bool> {
        if let Some((after, message)) = &self.fail_after {
            if self.yielded == *after {
                self.current = None;
                return Err(DriverError::Query(message.clone()));
            }
        }
        if self.single_row && self.yielded > 0 {
            self.current = None;
            return Ok(false);
        }
        self.current = self.rows.next();
        if self.current.is_some() {
            self.yielded += 1;
        }
        Ok(self.current.is_some())
    }
}

impl_value_row!(MemoryCursor);

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next(&mut self) -> impl Future<Output = DriverResult<bool>> + Send {
        async move {
            tokio::task::yield_now().await;
            self.advance()
        }
    }
}
