//! The per-cluster prepared statement cache.
//!
//! Maps statement text to the server-issued prepared id plus bind and
//! result metadata. Shared by every connection of a cluster. Concurrent
//! misses on the same text are single-flighted: the first caller runs
//! the PREPARE, the rest await its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::oneshot;

use stele_cql::frame::response::result::{PreparedMetadata, ResultMetadata};

use crate::errors::DriverError;

/// A successfully prepared statement as the server described it.
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    pub id: Bytes,
    pub bind_metadata: PreparedMetadata,
    pub result_metadata: ResultMetadata,
}

impl PreparedEntry {
    fn references(&self, keyspace: &str, table: Option<&str>) -> bool {
        self.bind_metadata
            .col_specs
            .iter()
            .chain(self.result_metadata.col_specs.iter())
            .any(|spec| {
                spec.table_spec.ks_name == keyspace
                    && table.map_or(true, |t| spec.table_spec.table_name == t)
            })
    }
}

enum Slot {
    Ready(Arc<PreparedEntry>),
    /// A PREPARE is in flight; these waiters get its outcome.
    Pending(Vec<oneshot::Sender<Result<Arc<PreparedEntry>, DriverError>>>),
}

#[derive(Default)]
pub(crate) struct PreparedCache {
    entries: Mutex<HashMap<String, Slot>>,
}

impl PreparedCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, text: &str) -> Option<Arc<PreparedEntry>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(text) {
            Some(Slot::Ready(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Returns the cached entry for `text`, running `prepare` if there
    /// is none. At most one `prepare` per text is in flight at a time;
    /// concurrent callers await the outcome of the running one.
    pub(crate) async fn get_or_prepare<F, Fut>(
        &self,
        text: &str,
        prepare: F,
    ) -> Result<Arc<PreparedEntry>, DriverError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<PreparedEntry, DriverError>>,
    {
        loop {
            let rx = {
                let mut entries = self.entries.lock().unwrap();
                match entries.get_mut(text) {
                    Some(Slot::Ready(entry)) => return Ok(entry.clone()),
                    Some(Slot::Pending(waiters)) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Some(rx)
                    }
                    None => {
                        entries.insert(text.to_owned(), Slot::Pending(Vec::new()));
                        None
                    }
                }
            };

            match rx {
                Some(rx) => match rx.await {
                    Ok(result) => return result,
                    // The flight was abandoned (e.g. its caller timed
                    // out); take another turn, possibly as the new
                    // leader.
                    Err(_) => continue,
                },
                None => {
                    // We are the flight leader. The guard cleans the
                    // pending slot up if we get cancelled mid-flight,
                    // so waiters are not stranded.
                    let mut guard = FlightGuard {
                        cache: self,
                        text,
                        armed: true,
                    };
                    let result = prepare().await;
                    guard.armed = false;
                    return self.finish_flight(text, result);
                }
            }
        }
    }

    fn finish_flight(
        &self,
        text: &str,
        result: Result<PreparedEntry, DriverError>,
    ) -> Result<Arc<PreparedEntry>, DriverError> {
        let mut entries = self.entries.lock().unwrap();

        let waiters = match entries.remove(text) {
            Some(Slot::Pending(waiters)) => waiters,
            // The slot was invalidated while we were flying; nobody is
            // waiting on it anymore.
            _ => Vec::new(),
        };

        let shared = result.map(Arc::new);
        if let Ok(entry) = &shared {
            entries.insert(text.to_owned(), Slot::Ready(entry.clone()));
        }

        for tx in waiters {
            let _ = tx.send(shared.clone());
        }
        shared
    }

    /// Replaces the entry for `text`, used after a re-prepare triggered
    /// by an `unprepared` server error. A concurrent in-flight PREPARE
    /// supersedes this entry, so it is not stomped on.
    pub(crate) fn replace(&self, text: &str, entry: Arc<PreparedEntry>) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(text) {
            Some(Slot::Pending(_)) => {}
            _ => {
                entries.insert(text.to_owned(), Slot::Ready(entry));
            }
        }
    }

    /// Drops the cached entry for `text`. In-flight prepares are left
    /// alone.
    pub(crate) fn invalidate(&self, text: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(Slot::Ready(_)) = entries.get(text) {
            entries.remove(text);
        }
    }

    /// Drops every ready entry whose bind or result metadata references
    /// the given keyspace (and table, when one is named). Called on
    /// SCHEMA_CHANGE events.
    pub(crate) fn invalidate_keyspace(&self, keyspace: &str, table: Option<&str>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, slot| match slot {
            Slot::Ready(entry) => !entry.references(keyspace, table),
            Slot::Pending(_) => true,
        });
    }

    #[cfg(test)]
    fn ready_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}

struct FlightGuard<'a> {
    cache: &'a PreparedCache,
    text: &'a str,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self.cache.entries.lock().unwrap();
        if let Some(Slot::Pending(_)) = entries.get(self.text) {
            // Dropping the waiters' senders makes them retry.
            entries.remove(self.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stele_cql::frame::response::result::{ColumnSpec, ColumnType, TableSpec};

    fn entry_for(keyspace: &str, table: &str) -> PreparedEntry {
        PreparedEntry {
            id: Bytes::from_static(&[1, 2, 3]),
            bind_metadata: PreparedMetadata {
                flags: 0,
                col_count: 1,
                pk_indexes: vec![],
                col_specs: vec![ColumnSpec {
                    table_spec: TableSpec {
                        ks_name: keyspace.to_owned(),
                        table_name: table.to_owned(),
                    },
                    name: "code".to_owned(),
                    typ: ColumnType::Int,
                }],
            },
            result_metadata: ResultMetadata::default(),
        }
    }

    #[tokio::test]
    async fn concurrent_callers_observe_one_prepare() {
        let cache = Arc::new(PreparedCache::new());
        let flights = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let flights = flights.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_prepare("SELECT * FROM users", || {
                        let flights = flights.clone();
                        async move {
                            flights.fetch_add(1, Ordering::SeqCst);
                            // Let the other callers pile up on the slot.
                            tokio::task::yield_now().await;
                            Ok(entry_for("ks", "users"))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id.clone());
        }

        assert_eq!(flights.load(Ordering::SeqCst), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn failed_flight_propagates_to_waiters() {
        let cache = PreparedCache::new();
        let result = cache
            .get_or_prepare("SELECT 1", || async {
                Err(DriverError::InvalidArguments("nope".into()))
            })
            .await;
        assert!(result.is_err());
        // Nothing was cached.
        assert!(cache.lookup("SELECT 1").is_none());
    }

    #[tokio::test]
    async fn replace_swaps_the_entry() {
        let cache = PreparedCache::new();
        cache
            .get_or_prepare("q", || async { Ok(entry_for("ks", "users")) })
            .await
            .unwrap();

        let mut newer = entry_for("ks", "users");
        newer.id = Bytes::from_static(&[9, 9]);
        cache.replace("q", Arc::new(newer));

        assert_eq!(cache.lookup("q").unwrap().id, Bytes::from_static(&[9, 9]));
    }

    #[tokio::test]
    async fn keyspace_invalidation_is_scoped() {
        let cache = PreparedCache::new();
        cache
            .get_or_prepare("q1", || async { Ok(entry_for("ks1", "users")) })
            .await
            .unwrap();
        cache
            .get_or_prepare("q2", || async { Ok(entry_for("ks2", "users")) })
            .await
            .unwrap();
        cache
            .get_or_prepare("q3", || async { Ok(entry_for("ks1", "orders")) })
            .await
            .unwrap();

        cache.invalidate_keyspace("ks1", Some("users"));
        assert!(cache.lookup("q1").is_none());
        assert!(cache.lookup("q2").is_some());
        assert!(cache.lookup("q3").is_some());

        cache.invalidate_keyspace("ks1", None);
        assert!(cache.lookup("q3").is_none());
        assert_eq!(cache.ready_count(), 1);
    }
}
