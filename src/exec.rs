//! Execution helpers shared by compiled queries and the convenience API.
//!
//! Every entry point opens the connection if it is closed and closes it again
//! only if it was the one that opened it, whatever the exit path (success,
//! error, cancellation or the future being dropped).

use std::future::Future;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{FutureExt, SinkExt, StreamExt, future, stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::{Command, Connection, ReadBehavior, Row, RowCursor, at_stage};
use crate::dynamic::DynamicRow;
use crate::error::{ExecStage, MapError, MapResult};
use crate::factory::{self, FactorySlot};
use crate::record::Record;
use crate::schema::ColumnMeta;

/// Lazily mapped rows of a single forward-only pass.
pub type RowStream<'c, T> = BoxStream<'c, MapResult<T>>;

/// Opens a closed connection for the lifetime of the guard.
pub(crate) struct OpenScope<'a, C: Connection> {
    conn: &'a mut C,
    opened: bool,
}

impl<'a, C: Connection> OpenScope<'a, C> {
    pub(crate) async fn enter(
        conn: &'a mut C,
        cancel: Option<&CancellationToken>,
    ) -> MapResult<Self> {
        let opened = if conn.is_open() {
            false
        } else {
            cancellable(cancel, conn.open())
                .await?
                .map_err(at_stage(ExecStage::Open))?;
            debug!("Opened connection {} for the call", conn.id());
            true
        };
        Ok(Self { conn, opened })
    }

    pub(crate) fn connection(&mut self) -> &mut C {
        self.conn
    }
}

impl<C: Connection> Drop for OpenScope<'_, C> {
    fn drop(&mut self) {
        if self.opened {
            self.conn.close();
            debug!("Closed connection {} opened by the call", self.conn.id());
        }
    }
}

/// Race `fut` against `cancel`.
pub(crate) async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> MapResult<F::Output> {
    match cancel {
        None => Ok(fut.await),
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(MapError::Cancelled),
                out = fut => Ok(out),
            }
        }
    }
}

/// Execute `command` and map every row.
pub(crate) async fn read_list<C, T>(
    conn: &mut C,
    command: &Command,
    slot: &mut FactorySlot<T>,
    capacity: usize,
    cancel: Option<&CancellationToken>,
) -> MapResult<Vec<T>>
where
    C: Connection,
    T: Record,
{
    let mut scope = OpenScope::enter(conn, cancel).await?;
    let mut cursor = cancellable(
        cancel,
        scope
            .connection()
            .execute_reader(command, ReadBehavior::DEFAULT),
    )
    .await?
    .map_err(at_stage(ExecStage::Headers))?;
    let factory = slot.resolve(command.shared_text(), cursor.columns())?;

    let mut rows = Vec::with_capacity(capacity);
    while cancellable(cancel, cursor.next())
        .await?
        .map_err(at_stage(ExecStage::Rows))?
    {
        rows.push(factory.map(&cursor)?);
    }
    Ok(rows)
}

/// Execute `command` with a single-row hint and map the first row, if any.
pub(crate) async fn read_first<C, T>(
    conn: &mut C,
    command: &Command,
    slot: &mut FactorySlot<T>,
    cancel: Option<&CancellationToken>,
) -> MapResult<Option<T>>
where
    C: Connection,
    T: Record,
{
    let mut scope = OpenScope::enter(conn, cancel).await?;
    let mut cursor = cancellable(
        cancel,
        scope
            .connection()
            .execute_reader(command, ReadBehavior::SINGLE_ROW),
    )
    .await?
    .map_err(at_stage(ExecStage::Headers))?;
    let factory = slot.resolve(command.shared_text(), cursor.columns())?;

    if cancellable(cancel, cursor.next())
        .await?
        .map_err(at_stage(ExecStage::Rows))?
    {
        Ok(Some(factory.map(&cursor)?))
    } else {
        Ok(None)
    }
}

/// Execute a command that returns no rows.
pub(crate) async fn execute_non_query<C: Connection>(
    conn: &mut C,
    command: &Command,
    cancel: Option<&CancellationToken>,
) -> MapResult<u64> {
    let mut scope = OpenScope::enter(conn, cancel).await?;
    cancellable(cancel, scope.connection().execute_non_query(command))
        .await?
        .map_err(at_stage(ExecStage::NonQuery))
}

/// Execute `command` and read every row as untyped values.
pub(crate) async fn read_dynamic<C: Connection>(
    conn: &mut C,
    command: &Command,
    cancel: Option<&CancellationToken>,
) -> MapResult<Vec<DynamicRow>> {
    let mut scope = OpenScope::enter(conn, cancel).await?;
    let mut cursor = cancellable(
        cancel,
        scope
            .connection()
            .execute_reader(command, ReadBehavior::SEQUENTIAL),
    )
    .await?
    .map_err(at_stage(ExecStage::Headers))?;
    let columns: Arc<[ColumnMeta]> = cursor.columns().into();

    let mut rows = Vec::new();
    while cancellable(cancel, cursor.next())
        .await?
        .map_err(at_stage(ExecStage::Rows))?
    {
        let values = (0..columns.len())
            .map(|ordinal| cursor.get_value(ordinal))
            .collect::<Result<Vec<_>, _>>()
            .map_err(at_stage(ExecStage::Rows))?;
        rows.push(DynamicRow::from_shared(columns.clone(), values));
    }
    Ok(rows)
}

/// Stream mapped rows without buffering.
///
/// The producer runs only while the consumer polls and hands over one row at a
/// time. Dropping the stream drops the cursor and closes the connection if the
/// stream opened it. A mapping or driver error is yielded once and ends the
/// stream.
pub(crate) fn stream<'c, C, T>(
    conn: &'c mut C,
    command: Command,
    cancel: Option<CancellationToken>,
) -> RowStream<'c, T>
where
    C: Connection + 'c,
    T: Record,
{
    let (mut tx, rx) = mpsc::channel::<MapResult<T>>(0);

    let producer = async move {
        let outcome: MapResult<()> = async {
            let cancel = cancel.as_ref();
            let mut scope = OpenScope::enter(conn, cancel).await?;
            let mut cursor = cancellable(
                cancel,
                scope
                    .connection()
                    .execute_reader(&command, ReadBehavior::SEQUENTIAL),
            )
            .await?
            .map_err(at_stage(ExecStage::Headers))?;
            let factory = factory::resolve::<T>(cursor.columns())?;

            while cancellable(cancel, cursor.next())
                .await?
                .map_err(at_stage(ExecStage::Rows))?
            {
                let item = factory.map(&cursor)?;
                if tx.send(Ok(item)).await.is_err() {
                    // consumer is gone
                    return Ok(());
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            let _ = tx.send(Err(err)).await;
        }
    };

    let driver = producer
        .into_stream()
        .filter_map(|()| future::ready(None::<MapResult<T>>));
    stream::select(driver, rx).boxed()
}
