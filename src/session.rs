//! Sessions and the convenience API.
//!
//! ```rust,ignore
//! let mut session = Session::new(PostgresConnection::connect(url).await?);
//!
//! let employees: Vec<Employee> = session
//!     .sql("SELECT Id, Name, DepartmentId FROM Employees WHERE DepartmentId = @DepartmentId")
//!     .bind("DepartmentId", 2)
//!     .list()
//!     .await?;
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::compiled::CompiledQuery;
use crate::config::EngineConfig;
use crate::driver::{Command, CommandKind, Connection, ConnectionId};
use crate::dynamic::DynamicRow;
use crate::entry_cache::{self, EntryLease};
use crate::error::MapResult;
use crate::exec::{self, RowStream};
use crate::params::Params;
use crate::record::Record;
use crate::value::Value;

/// A connection plus the engine configuration used with it.
///
/// Dropping the session evicts its convenience-cache entries.
pub struct Session<C: Connection> {
    conn: C,
    config: Arc<EngineConfig>,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, Arc::new(EngineConfig::default()))
    }

    pub fn with_config(conn: C, config: Arc<EngineConfig>) -> Self {
        Self { conn, config }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// A call running free-form SQL.
    pub fn sql(&mut self, text: impl Into<Arc<str>>) -> Call<'_, C> {
        Call::new(self, text.into(), CommandKind::Text)
    }

    /// A call running a stored procedure.
    pub fn procedure(&mut self, name: impl Into<Arc<str>>) -> Call<'_, C> {
        Call::new(self, name.into(), CommandKind::StoredProcedure)
    }

    /// A call whose kind is inferred from the text; see [`CommandKind::infer`].
    pub fn command(&mut self, text: impl Into<Arc<str>>) -> Call<'_, C> {
        let text = text.into();
        let kind = CommandKind::infer(&text);
        Call::new(self, text, kind)
    }

    pub fn compile_query<T: Record>(
        &self,
        text: impl Into<Arc<str>>,
        parameter_names: &[&str],
    ) -> CompiledQuery<T> {
        CompiledQuery::new(self, text, CommandKind::Text, parameter_names)
    }

    pub fn compile_procedure<T: Record>(
        &self,
        name: impl Into<Arc<str>>,
        parameter_names: &[&str],
    ) -> CompiledQuery<T> {
        CompiledQuery::new(self, name, CommandKind::StoredProcedure, parameter_names)
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        entry_cache::evict_connection(self.conn.id());
    }
}

/// One convenience-API execution being configured.
#[must_use = "a call does nothing until it is executed"]
pub struct Call<'s, C: Connection> {
    session: &'s mut Session<C>,
    text: Arc<str>,
    kind: CommandKind,
    params: Params,
    cancel: Option<CancellationToken>,
}

impl<'s, C: Connection> Call<'s, C> {
    fn new(session: &'s mut Session<C>, text: Arc<str>, kind: CommandKind) -> Self {
        Self {
            session,
            text,
            kind,
            params: Params::new(),
            cancel: None,
        }
    }

    /// Bind a named parameter (`@` prefix optional).
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push(name, value);
        self
    }

    /// Bind a whole parameter set.
    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Abandon the call when `token` is cancelled.
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    fn lease<T: Record>(&self) -> EntryLease<T> {
        EntryLease::acquire(
            self.session.id(),
            self.kind,
            &self.text,
            &self.params,
            self.session.config.entry_cache_capacity,
        )
    }

    /// Execute and map every row, reusing the cached command and factory.
    pub async fn list<T: Record>(self) -> MapResult<Vec<T>> {
        let mut lease = self.lease::<T>();
        let Call {
            session,
            params,
            cancel,
            ..
        } = self;
        let limits = session.config.size_limits();
        let capacity = session.config.default_list_capacity;
        lease.update_parameters(params, limits);
        lease
            .to_list(&mut session.conn, capacity, cancel.as_ref())
            .await
    }

    /// Execute with a single-row hint and map the first row.
    pub async fn first<T: Record>(self) -> MapResult<Option<T>> {
        let mut lease = self.lease::<T>();
        let Call {
            session,
            params,
            cancel,
            ..
        } = self;
        lease.update_parameters(params, session.config.size_limits());
        lease.first(&mut session.conn, cancel.as_ref()).await
    }

    /// Lazily map rows one at a time.
    pub fn stream<T: Record>(self) -> RowStream<'s, T> {
        let Call {
            session,
            text,
            kind,
            params,
            cancel,
        } = self;
        let command = Command::with_params(text, kind, params, session.config.size_limits());
        exec::stream(&mut session.conn, command, cancel)
    }

    /// Execute a command that returns no rows; yields the affected row count.
    pub async fn execute(self) -> MapResult<u64> {
        let Call {
            session,
            text,
            kind,
            params,
            cancel,
        } = self;
        let command = Command::with_params(text, kind, params, session.config.size_limits());
        exec::execute_non_query(&mut session.conn, &command, cancel.as_ref()).await
    }

    /// Execute and return untyped rows.
    pub async fn dynamic(self) -> MapResult<Vec<DynamicRow>> {
        let Call {
            session,
            text,
            kind,
            params,
            cancel,
        } = self;
        let command = Command::with_params(text, kind, params, session.config.size_limits());
        exec::read_dynamic(&mut session.conn, &command, cancel.as_ref()).await
    }
}
