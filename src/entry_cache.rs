//! Convenience-API execution cache.
//!
//! Keyed by (connection, command kind, record type, command text). The first
//! call for a key creates a [`CompiledEntry`]; later calls check it out, update
//! parameter values and run it with its cached factory. An entry is checked
//! out for the duration of a call, so concurrent calls with the same key never
//! share one; the loser of such a race builds a private entry that is dropped
//! if the winner has already been returned.
//!
//! With a configured capacity, parking an entry on a connection that already
//! holds that many evicts one of that connection's other entries.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tracing::debug;

use crate::compiled::CompiledEntry;
use crate::driver::{Command, CommandKind, ConnectionId};
use crate::params::Params;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EntryKey {
    connection: ConnectionId,
    kind: CommandKind,
    target: TypeId,
    text_hash: u64,
}

impl EntryKey {
    fn new<T: 'static>(connection: ConnectionId, kind: CommandKind, text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            connection,
            kind,
            target: TypeId::of::<T>(),
            text_hash: hasher.finish(),
        }
    }
}

struct CachedEntry {
    text: Arc<str>,
    entry: Box<dyn Any + Send + Sync>,
}

static ENTRIES: LazyLock<DashMap<EntryKey, CachedEntry>> = LazyLock::new(DashMap::new);
static HITS: AtomicU64 = AtomicU64::new(0);
static MISSES: AtomicU64 = AtomicU64::new(0);

/// Counters for the convenience-API cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCacheStats {
    /// Entries currently parked (not checked out).
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub fn stats() -> EntryCacheStats {
    EntryCacheStats {
        entries: ENTRIES.len(),
        hits: HITS.load(Ordering::Relaxed),
        misses: MISSES.load(Ordering::Relaxed),
    }
}

/// Number of parked entries belonging to `connection`.
pub fn entries_for(connection: ConnectionId) -> usize {
    ENTRIES
        .iter()
        .filter(|item| item.key().connection == connection)
        .count()
}

/// Drop every entry belonging to `connection`.
pub fn evict_connection(connection: ConnectionId) {
    let before = ENTRIES.len();
    ENTRIES.retain(|key, _| key.connection != connection);
    let evicted = before.saturating_sub(ENTRIES.len());
    if evicted > 0 {
        debug!("Evicted {} cached entries for {}", evicted, connection);
    }
}

fn checkout<T: Record>(key: &EntryKey, text: &str) -> Option<CompiledEntry<T>> {
    let (key, cached) = ENTRIES.remove(key)?;
    if &*cached.text != text {
        // hash collision: leave the other query's entry in place
        ENTRIES.entry(key).or_insert(cached);
        return None;
    }
    cached
        .entry
        .downcast::<CompiledEntry<T>>()
        .ok()
        .map(|entry| *entry)
}

fn check_in<T: Record>(key: EntryKey, entry: CompiledEntry<T>, capacity: Option<usize>) {
    let connection = key.connection;
    if let Some(capacity) = capacity {
        if !ENTRIES.contains_key(&key) && entries_for(connection) >= capacity {
            let victim = ENTRIES
                .iter()
                .find(|item| item.key().connection == connection)
                .map(|item| *item.key());
            if let Some(victim) = victim {
                ENTRIES.remove(&victim);
                debug!(
                    "Entry cache for {} full ({}), evicted one entry",
                    connection, capacity
                );
            }
        }
    }
    let text = entry.command().shared_text().clone();
    ENTRIES.entry(key).or_insert(CachedEntry {
        text,
        entry: Box::new(entry),
    });
}

/// A checked-out entry; returned to the cache on drop.
pub(crate) struct EntryLease<T: Record> {
    key: EntryKey,
    entry: Option<CompiledEntry<T>>,
    capacity: Option<usize>,
}

impl<T: Record> EntryLease<T> {
    /// Check out the entry for this call, creating it on first use.
    pub(crate) fn acquire(
        connection: ConnectionId,
        kind: CommandKind,
        text: &Arc<str>,
        params: &Params,
        capacity: Option<usize>,
    ) -> Self {
        let key = EntryKey::new::<T>(connection, kind, text);
        let entry = match checkout::<T>(&key, text) {
            Some(entry) => {
                HITS.fetch_add(1, Ordering::Relaxed);
                entry
            }
            None => {
                MISSES.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Entry cache miss for {} on {}: {}",
                    std::any::type_name::<T>(),
                    connection,
                    text
                );
                CompiledEntry::new(Command::with_slots(text.clone(), kind, params.names()))
            }
        };
        Self {
            key,
            entry: Some(entry),
            capacity,
        }
    }
}

impl<T: Record> Deref for EntryLease<T> {
    type Target = CompiledEntry<T>;

    fn deref(&self) -> &Self::Target {
        // only emptied by drop
        self.entry.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Record> DerefMut for EntryLease<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.entry.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Record> Drop for EntryLease<T> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            check_in(self.key, entry, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SizeLimits;
    use crate::value::Value;

    crate::record! {
        #[derive(Debug, Default)]
        struct Cached {
            id: i32 => "Id",
        }
    }

    #[test]
    fn test_lease_round_trip() {
        let conn = ConnectionId::next();
        let text: Arc<str> = Arc::from("SELECT Id FROM cached WHERE Id = @Id");
        let params = crate::params! { "Id" => 1 };
        {
            let mut lease =
                EntryLease::<Cached>::acquire(conn, CommandKind::Text, &text, &params, None);
            lease.update_parameters(params, SizeLimits::default());
            assert_eq!(lease.command().parameters()[0].value(), &Value::I32(1));
            assert_eq!(entries_for(conn), 0);
        }
        assert_eq!(entries_for(conn), 1);

        let hits = stats().hits;
        let lease =
            EntryLease::<Cached>::acquire(conn, CommandKind::Text, &text, &Params::new(), None);
        assert!(stats().hits > hits);
        // reused entry keeps its previous binding
        assert_eq!(lease.command().parameters()[0].value(), &Value::I32(1));
        drop(lease);

        evict_connection(conn);
        assert_eq!(entries_for(conn), 0);
    }

    #[test]
    fn test_capacity_bounds_one_connection() {
        let conn = ConnectionId::next();
        let bystander = ConnectionId::next();
        let texts: Vec<Arc<str>> = (0..3)
            .map(|i| Arc::from(format!("SELECT Id FROM cached_{i}")))
            .collect();
        drop(EntryLease::<Cached>::acquire(
            bystander,
            CommandKind::Text,
            &texts[0],
            &Params::new(),
            None,
        ));

        let before = stats();
        for text in &texts {
            drop(EntryLease::<Cached>::acquire(
                conn,
                CommandKind::Text,
                text,
                &Params::new(),
                Some(2),
            ));
        }
        assert_eq!(entries_for(conn), 2);
        assert_eq!(entries_for(bystander), 1);
        assert!(stats().misses >= before.misses + 3);

        evict_connection(conn);
        evict_connection(bystander);
    }

    #[test]
    fn test_kind_is_part_of_the_key() {
        let conn = ConnectionId::next();
        let text: Arc<str> = Arc::from("cached_proc");
        for kind in [CommandKind::Text, CommandKind::StoredProcedure] {
            drop(EntryLease::<Cached>::acquire(
                conn,
                kind,
                &text,
                &Params::new(),
                None,
            ));
        }
        assert_eq!(entries_for(conn), 2);
        evict_connection(conn);
    }
}
