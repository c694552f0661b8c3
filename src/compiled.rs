//! Compiled queries.
//!
//! A [`CompiledQuery`] pins one command, its positional parameter slots, the
//! row factory it resolved and the row count of its last run. Repeated calls
//! only rebind values, execute and map.
//!
//! ```rust,ignore
//! let mut by_department = session.compile_query::<Employee>(
//!     "SELECT Id, Name, DepartmentId FROM Employees WHERE DepartmentId = @DepartmentId",
//!     &["DepartmentId"],
//! );
//! for department in 1..=5 {
//!     by_department.set_parameter(0, department)?;
//!     let employees = by_department.to_list(&mut session).await?;
//! }
//! by_department.dispose();
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::{Command, CommandKind, Connection};
use crate::error::{MapError, MapResult};
use crate::exec;
use crate::factory::FactorySlot;
use crate::params::{Params, SizeLimits};
use crate::record::Record;
use crate::session::Session;
use crate::value::Value;

/// A command with its bound parameters, factory slot and last row count.
///
/// Owned by exactly one [`CompiledQuery`] or one convenience-cache slot.
pub(crate) struct CompiledEntry<T> {
    command: Command,
    slot: FactorySlot<T>,
    last_row_count: Option<usize>,
}

impl<T: Record> CompiledEntry<T> {
    pub(crate) fn new(command: Command) -> Self {
        Self {
            command,
            slot: FactorySlot::new(),
            last_row_count: None,
        }
    }

    pub(crate) fn command(&self) -> &Command {
        &self.command
    }

    pub(crate) fn last_row_count(&self) -> Option<usize> {
        self.last_row_count
    }

    pub(crate) fn set_parameter(
        &mut self,
        index: usize,
        value: Value,
        limits: SizeLimits,
    ) -> MapResult<()> {
        let count = self.command.parameters().len();
        let slot = self
            .command
            .parameters_mut()
            .get_mut(index)
            .ok_or(MapError::ParameterIndex { index, count })?;
        slot.assign(value, limits);
        Ok(())
    }

    /// Assign values by name. Names the command does not declare are ignored.
    pub(crate) fn update_parameters(&mut self, params: Params, limits: SizeLimits) {
        if params.is_empty() {
            return;
        }
        for (name, value) in params {
            if let Some(slot) = self.command.parameter_mut(&name) {
                slot.assign(value, limits);
            }
        }
    }

    pub(crate) async fn to_list<C: Connection>(
        &mut self,
        conn: &mut C,
        default_capacity: usize,
        cancel: Option<&CancellationToken>,
    ) -> MapResult<Vec<T>> {
        let capacity = self.last_row_count.unwrap_or(default_capacity);
        let rows = exec::read_list(conn, &self.command, &mut self.slot, capacity, cancel).await?;
        self.last_row_count = Some(rows.len());
        Ok(rows)
    }

    pub(crate) async fn first<C: Connection>(
        &mut self,
        conn: &mut C,
        cancel: Option<&CancellationToken>,
    ) -> MapResult<Option<T>> {
        exec::read_first(conn, &self.command, &mut self.slot, cancel).await
    }
}

/// A reusable, caller-owned query returning rows of `T`.
///
/// Not meant for concurrent use: keep one per task, or serialize access.
pub struct CompiledQuery<T> {
    entry: Option<CompiledEntry<T>>,
    limits: SizeLimits,
    default_capacity: usize,
}

impl<T: Record> CompiledQuery<T> {
    /// Compile `text` with one positional slot per name.
    pub fn new<C: Connection>(
        session: &Session<C>,
        text: impl Into<Arc<str>>,
        kind: CommandKind,
        parameter_names: &[&str],
    ) -> Self {
        let config = session.config();
        let command = Command::with_slots(text, kind, parameter_names.iter().copied());
        debug!(
            "Compiled {:?} query for {} with {} parameters",
            kind,
            std::any::type_name::<T>(),
            parameter_names.len()
        );
        Self {
            entry: Some(CompiledEntry::new(command)),
            limits: config.size_limits(),
            default_capacity: config.default_list_capacity,
        }
    }

    fn entry(&self) -> MapResult<&CompiledEntry<T>> {
        self.entry.as_ref().ok_or(MapError::Disposed)
    }

    fn entry_mut(&mut self) -> MapResult<&mut CompiledEntry<T>> {
        self.entry.as_mut().ok_or(MapError::Disposed)
    }

    pub fn parameter_count(&self) -> MapResult<usize> {
        Ok(self.entry()?.command().parameters().len())
    }

    /// The underlying command with its current bindings.
    pub fn command(&self) -> MapResult<&Command> {
        Ok(self.entry()?.command())
    }

    /// Row count of the previous execution.
    pub fn last_row_count(&self) -> MapResult<Option<usize>> {
        Ok(self.entry()?.last_row_count())
    }

    /// Bind `value` into the slot at `index`.
    pub fn set_parameter(&mut self, index: usize, value: impl Into<Value>) -> MapResult<()> {
        let limits = self.limits;
        self.entry_mut()?.set_parameter(index, value.into(), limits)
    }

    /// Execute and map every row.
    pub async fn to_list<C: Connection>(&mut self, session: &mut Session<C>) -> MapResult<Vec<T>> {
        let capacity = self.default_capacity;
        self.entry_mut()?
            .to_list(session.connection_mut(), capacity, None)
            .await
    }

    pub async fn to_list_cancellable<C: Connection>(
        &mut self,
        session: &mut Session<C>,
        cancel: &CancellationToken,
    ) -> MapResult<Vec<T>> {
        let capacity = self.default_capacity;
        self.entry_mut()?
            .to_list(session.connection_mut(), capacity, Some(cancel))
            .await
    }

    /// Execute with a single-row hint; `None` when the result is empty.
    pub async fn first_or_default<C: Connection>(
        &mut self,
        session: &mut Session<C>,
    ) -> MapResult<Option<T>> {
        self.entry_mut()?
            .first(session.connection_mut(), None)
            .await
    }

    pub async fn first_or_default_cancellable<C: Connection>(
        &mut self,
        session: &mut Session<C>,
        cancel: &CancellationToken,
    ) -> MapResult<Option<T>> {
        self.entry_mut()?
            .first(session.connection_mut(), Some(cancel))
            .await
    }

    /// Release the command. Every later call fails with [`MapError::Disposed`].
    pub fn dispose(&mut self) {
        if self.entry.take().is_some() {
            debug!("Disposed compiled query for {}", std::any::type_name::<T>());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.entry.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SizeBucket;

    crate::record! {
        #[derive(Debug, Default)]
        struct Only {
            id: i32 => "Id",
        }
    }

    fn entry() -> CompiledEntry<Only> {
        CompiledEntry::new(Command::with_slots(
            "SELECT Id FROM t WHERE Name = @Name AND Id > @Id",
            CommandKind::Text,
            ["@Name", "Id"],
        ))
    }

    #[test]
    fn test_set_parameter_by_index() {
        let mut e = entry();
        e.set_parameter(0, Value::from("abc"), SizeLimits::default()).unwrap();
        let slot = &e.command().parameters()[0];
        assert_eq!(slot.value(), &Value::from("abc"));
        assert_eq!(slot.size(), Some(SizeBucket::Bounded(4000)));
        assert!(matches!(
            e.set_parameter(2, Value::I32(1), SizeLimits::default()),
            Err(MapError::ParameterIndex { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_update_ignores_unknown_names() {
        let mut e = entry();
        let params = crate::params! { "id" => 3, "@Unknown" => 9, "Name" => "x" };
        e.update_parameters(params, SizeLimits::default());
        assert_eq!(e.command().parameters()[0].value(), &Value::from("x"));
        assert_eq!(e.command().parameters()[1].value(), &Value::I32(3));
    }

    #[test]
    fn test_empty_update_keeps_values() {
        let mut e = entry();
        e.set_parameter(1, Value::I32(4), SizeLimits::default()).unwrap();
        e.update_parameters(Params::new(), SizeLimits::default());
        assert_eq!(e.command().parameters()[1].value(), &Value::I32(4));
    }
}
