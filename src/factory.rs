//! Row factories and their caches.
//!
//! A [`RowFactory<T>`] is built once per (record type, schema fingerprint) and
//! is a pure function from the current row to a `T`. Lookup goes through three
//! tiers, fastest first:
//!
//! 1. query identity: the owning [`FactorySlot`] saw this exact command text
//!    with this exact column layout last time, so no hashing at all;
//! 2. last used: the slot's (or the thread's) most recent fingerprint;
//! 3. shared: a process-wide concurrent map. Builds happen outside any lock and
//!    the first published factory wins.
//!
//! Every tier also matches the [`NotNullMask`]: a factory compiled for NOT NULL
//! columns skips their null checks and must not serve a schema where those
//! columns may be NULL.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::driver::Row;
use crate::error::{MapError, MapResult};
use crate::record::{Binder, PropertyMap, Record};
use crate::schema::{ColumnMeta, NotNullMask, SchemaFingerprint};
use crate::value::ColumnType;

struct ColumnBinding<T> {
    ordinal: usize,
    field: &'static str,
    apply: Binder<T>,
}

/// Compiled conversion from a row of one schema to a `T`.
pub struct RowFactory<T> {
    bindings: Box<[ColumnBinding<T>]>,
    fingerprint: SchemaFingerprint,
    not_null: NotNullMask,
    _target: PhantomData<fn() -> T>,
}

impl<T: Record> RowFactory<T> {
    /// Compile a factory for `columns`. Columns without a matching field are skipped.
    pub fn build(columns: &[ColumnMeta]) -> MapResult<Self> {
        Self::build_with(
            columns,
            SchemaFingerprint::compute(columns),
            NotNullMask::compute(columns),
        )
    }

    fn build_with(
        columns: &[ColumnMeta],
        fingerprint: SchemaFingerprint,
        not_null: NotNullMask,
    ) -> MapResult<Self> {
        let map = PropertyMap::<T>::shared()?;
        let bindings: Box<[ColumnBinding<T>]> = columns
            .iter()
            .enumerate()
            .filter_map(|(ordinal, column)| {
                map.find(&column.name).map(|field| ColumnBinding {
                    ordinal,
                    field: field.name(),
                    apply: field.bind(column),
                })
            })
            .collect();
        debug!(
            "Compiled row factory for {}: {} of {} columns bound",
            std::any::type_name::<T>(),
            bindings.len(),
            columns.len()
        );
        Ok(Self {
            bindings,
            fingerprint,
            not_null,
            _target: PhantomData,
        })
    }

    /// Map the current row.
    pub fn map(&self, row: &dyn Row) -> MapResult<T> {
        let mut target = T::default();
        for binding in self.bindings.iter() {
            (binding.apply)(&mut target, row, binding.ordinal).map_err(|source| {
                MapError::Conversion {
                    field: binding.field,
                    raw: raw_cell(row, binding.ordinal),
                    source,
                }
            })?;
        }
        Ok(target)
    }

    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }

    pub fn not_null(&self) -> &NotNullMask {
        &self.not_null
    }

    fn serves(&self, fingerprint: SchemaFingerprint, not_null: &NotNullMask) -> bool {
        self.fingerprint == fingerprint && self.not_null == *not_null
    }

    /// Number of columns assigned to a field.
    pub fn bound_columns(&self) -> usize {
        self.bindings.len()
    }
}

fn raw_cell(row: &dyn Row, ordinal: usize) -> String {
    row.get_value(ordinal)
        .map(|value| value.to_string())
        .unwrap_or_else(|_| String::from("<unreadable>"))
}

type FactoryKey = (TypeId, SchemaFingerprint, NotNullMask);
type AnyFactory = Arc<dyn Any + Send + Sync>;

static FACTORIES: LazyLock<DashMap<FactoryKey, AnyFactory>> = LazyLock::new(DashMap::new);
static SHARED_HITS: AtomicU64 = AtomicU64::new(0);
static SHARED_MISSES: AtomicU64 = AtomicU64::new(0);

/// Counters for the shared factory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub fn cache_stats() -> FactoryCacheStats {
    FactoryCacheStats {
        entries: FACTORIES.len(),
        hits: SHARED_HITS.load(Ordering::Relaxed),
        misses: SHARED_MISSES.load(Ordering::Relaxed),
    }
}

fn downcast<T: Record>(factory: AnyFactory) -> MapResult<Arc<RowFactory<T>>> {
    Arc::downcast::<RowFactory<T>>(factory)
        .map_err(|_| MapError::config("factory registry holds a foreign type"))
}

fn shared<T: Record>(
    columns: &[ColumnMeta],
    fingerprint: SchemaFingerprint,
    not_null: NotNullMask,
) -> MapResult<Arc<RowFactory<T>>> {
    let key = (TypeId::of::<T>(), fingerprint, not_null);
    if let Some(found) = FACTORIES.get(&key) {
        SHARED_HITS.fetch_add(1, Ordering::Relaxed);
        return downcast(found.value().clone());
    }
    SHARED_MISSES.fetch_add(1, Ordering::Relaxed);

    let built: AnyFactory = Arc::new(RowFactory::<T>::build_with(
        columns,
        fingerprint,
        key.2.clone(),
    )?);
    // a concurrent builder may have published first; keep theirs
    let winner = FACTORIES.entry(key).or_insert(built).value().clone();
    downcast(winner)
}

/// Shared-tier lookup, building on miss.
pub fn get_or_build<T: Record>(columns: &[ColumnMeta]) -> MapResult<Arc<RowFactory<T>>> {
    shared(
        columns,
        SchemaFingerprint::compute(columns),
        NotNullMask::compute(columns),
    )
}

thread_local! {
    static LAST_USED: RefCell<HashMap<TypeId, AnyFactory>> = RefCell::new(HashMap::new());
}

/// Resolve a factory for a call site without a [`FactorySlot`] of its own.
///
/// Uses the calling thread's last-used entry for `T`, then the shared tier.
pub fn resolve<T: Record>(columns: &[ColumnMeta]) -> MapResult<Arc<RowFactory<T>>> {
    let fingerprint = SchemaFingerprint::compute(columns);
    let not_null = NotNullMask::compute(columns);
    let type_id = TypeId::of::<T>();

    let last = LAST_USED.with(|last| last.borrow().get(&type_id).cloned());
    if let Some(last) = last {
        let last = downcast::<T>(last)?;
        if last.serves(fingerprint, &not_null) {
            trace!("Row factory last-used hit for {}", std::any::type_name::<T>());
            return Ok(last);
        }
    }

    let factory = shared::<T>(columns, fingerprint, not_null)?;
    let erased: AnyFactory = factory.clone();
    LAST_USED.with(|last| {
        last.borrow_mut().insert(type_id, erased);
    });
    Ok(factory)
}

struct QueryIdentity {
    text: Arc<str>,
    /// Column type and NOT NULL flag per ordinal.
    layout: Box<[(ColumnType, bool)]>,
}

fn layout_of(column: &ColumnMeta) -> (ColumnType, bool) {
    (column.column_type, column.nullable == Some(false))
}

impl QueryIdentity {
    fn matches(&self, text: &Arc<str>, columns: &[ColumnMeta]) -> bool {
        (Arc::ptr_eq(&self.text, text) || *self.text == **text)
            && self.layout.len() == columns.len()
            && self
                .layout
                .iter()
                .zip(columns)
                .all(|(seen, column)| *seen == layout_of(column))
    }
}

/// Call-site factory cache owned by one compiled command.
pub struct FactorySlot<T> {
    identity: Option<QueryIdentity>,
    last: Option<Arc<RowFactory<T>>>,
}

impl<T> Default for FactorySlot<T> {
    fn default() -> Self {
        Self {
            identity: None,
            last: None,
        }
    }
}

impl<T: Record> FactorySlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for `columns` produced by command `text`.
    pub fn resolve(
        &mut self,
        text: &Arc<str>,
        columns: &[ColumnMeta],
    ) -> MapResult<Arc<RowFactory<T>>> {
        if let (Some(identity), Some(factory)) = (&self.identity, &self.last) {
            if identity.matches(text, columns) {
                trace!("Row factory identity hit for {}", text);
                return Ok(factory.clone());
            }
        }

        let fingerprint = SchemaFingerprint::compute(columns);
        let not_null = NotNullMask::compute(columns);
        let factory = match &self.last {
            Some(last) if last.serves(fingerprint, &not_null) => last.clone(),
            _ => shared::<T>(columns, fingerprint, not_null)?,
        };

        self.identity = Some(QueryIdentity {
            text: text.clone(),
            layout: columns.iter().map(layout_of).collect(),
        });
        self.last = Some(factory.clone());
        Ok(factory)
    }
}
