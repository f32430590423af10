//! Fan-in aggregator: the one piece of shared mutable state in a run.
//!
//! Holds the latest record per `(kind, uid)`. Writers go through
//! [`Aggregator::apply`]; [`Aggregator::drain`] copies the live map out
//! under the lock, so a drain never observes a half-applied record.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use cluster_source::{Operation, ResourceKind};

use crate::domain::{NormalizedRecord, SnapshotEntry};

type Key = (ResourceKind, String);

/// What `apply` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    /// Incoming version was older than the stored one
    Stale,
    Removed,
    /// Delete for a uid that was not present
    Absent,
}

/// Last-write-wins map keyed by `(kind, uid)`.
#[derive(Debug, Default)]
pub struct Aggregator {
    entries: Mutex<HashMap<Key, NormalizedRecord>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, NormalizedRecord>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold one record into the map.
    ///
    /// Added/Modified overwrite unless the stored version is strictly newer.
    /// Deleted removes the uid regardless of version.
    pub fn apply(&self, record: NormalizedRecord) -> Applied {
        let key = (record.kind, record.uid.clone());
        let mut entries = self.lock();
        match record.operation {
            Operation::Deleted => match entries.remove(&key) {
                Some(_) => Applied::Removed,
                None => Applied::Absent,
            },
            Operation::Added | Operation::Modified => match entries.get(&key) {
                Some(current) if current.resource_version > record.resource_version => {
                    Applied::Stale
                }
                Some(_) => {
                    entries.insert(key, record);
                    Applied::Replaced
                }
                None => {
                    entries.insert(key, record);
                    Applied::Inserted
                }
            },
        }
    }

    /// Point-in-time copy ordered by kind, namespace, name (uid breaks ties).
    pub fn drain(&self) -> Vec<SnapshotEntry> {
        let mut records: Vec<NormalizedRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.kind
                .name()
                .cmp(b.kind.name())
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.uid.cmp(&b.uid))
        });
        records.into_iter().map(SnapshotEntry::from).collect()
    }

    pub fn get(&self, kind: ResourceKind, uid: &str) -> Option<NormalizedRecord> {
        self.lock().get(&(kind, uid.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceVersion;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(op: Operation, uid: &str, rv: &str) -> NormalizedRecord {
        record_of(ResourceKind::Pod, op, Some("default"), uid, uid, rv)
    }

    fn record_of(
        kind: ResourceKind,
        op: Operation,
        namespace: Option<&str>,
        name: &str,
        uid: &str,
        rv: &str,
    ) -> NormalizedRecord {
        NormalizedRecord {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            uid: uid.to_string(),
            resource_version: ResourceVersion::new(rv),
            operation: op,
            payload: json!({ "rv": rv }),
        }
    }

    #[test]
    fn added_modified_deleted_leaves_nothing() {
        let agg = Aggregator::new();
        assert_eq!(agg.apply(record(Operation::Added, "p1", "1")), Applied::Inserted);
        assert_eq!(agg.apply(record(Operation::Modified, "p1", "2")), Applied::Replaced);
        assert_eq!(agg.apply(record(Operation::Deleted, "p1", "3")), Applied::Removed);
        assert!(agg.is_empty());
        assert!(agg.drain().is_empty());
    }

    #[test]
    fn stale_version_does_not_regress() {
        let agg = Aggregator::new();
        agg.apply(record(Operation::Modified, "p2", "5"));
        assert_eq!(agg.apply(record(Operation::Modified, "p2", "3")), Applied::Stale);
        let kept = agg.get(ResourceKind::Pod, "p2").unwrap();
        assert_eq!(kept.resource_version.as_str(), "5");
    }

    #[test]
    fn equal_version_newest_arrival_wins() {
        let agg = Aggregator::new();
        agg.apply(record(Operation::Added, "p3", "7"));
        let mut again = record(Operation::Modified, "p3", "7");
        again.payload = json!({ "second": true });
        assert_eq!(agg.apply(again), Applied::Replaced);
        assert_eq!(
            agg.get(ResourceKind::Pod, "p3").unwrap().payload,
            json!({ "second": true })
        );
    }

    #[test]
    fn deleting_absent_uid_is_noop() {
        let agg = Aggregator::new();
        assert_eq!(agg.apply(record(Operation::Deleted, "ghost", "1")), Applied::Absent);
        assert_eq!(agg.apply(record(Operation::Deleted, "ghost", "2")), Applied::Absent);
        assert!(agg.is_empty());
    }

    #[test]
    fn same_uid_different_kinds_are_distinct() {
        let agg = Aggregator::new();
        agg.apply(record_of(ResourceKind::Pod, Operation::Added, Some("a"), "x", "u", "1"));
        agg.apply(record_of(ResourceKind::Service, Operation::Added, Some("a"), "x", "u", "1"));
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn drain_orders_by_kind_namespace_name() {
        let agg = Aggregator::new();
        agg.apply(record_of(ResourceKind::Service, Operation::Added, Some("b"), "s", "u1", "1"));
        agg.apply(record_of(ResourceKind::Pod, Operation::Added, Some("b"), "a", "u2", "1"));
        agg.apply(record_of(ResourceKind::Pod, Operation::Added, Some("a"), "z", "u3", "1"));
        agg.apply(record_of(ResourceKind::Pod, Operation::Added, Some("a"), "m", "u4", "1"));

        let uids: Vec<String> = agg.drain().into_iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec!["u4", "u3", "u2", "u1"]);
    }

    #[test]
    fn drain_is_idempotent() {
        let agg = Aggregator::new();
        agg.apply(record(Operation::Added, "p1", "1"));
        agg.apply(record(Operation::Added, "p2", "4"));
        assert_eq!(agg.drain(), agg.drain());
        assert_eq!(agg.len(), 2);
    }

    fn op() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Added),
            Just(Operation::Modified),
            Just(Operation::Deleted),
        ]
    }

    /// Per-uid histories with strictly increasing versions.
    fn histories() -> impl Strategy<Value = Vec<Vec<NormalizedRecord>>> {
        prop::collection::vec(prop::collection::vec(op(), 1..6), 1..5).prop_map(|uids| {
            uids.into_iter()
                .enumerate()
                .map(|(u, ops)| {
                    ops.into_iter()
                        .enumerate()
                        .map(|(v, op)| record(op, &format!("uid-{u}"), &(v + 1).to_string()))
                        .collect()
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn final_entry_is_last_non_deleted(histories in histories()) {
            let agg = Aggregator::new();
            for history in &histories {
                for r in history {
                    agg.apply(r.clone());
                }
            }
            for history in &histories {
                let last = history.last().unwrap();
                let stored = agg.get(ResourceKind::Pod, &last.uid);
                if last.operation == Operation::Deleted {
                    prop_assert!(stored.is_none());
                } else {
                    prop_assert_eq!(stored.as_ref(), Some(last));
                }
            }
        }

        #[test]
        fn interleaving_across_uids_does_not_matter(
            histories in histories(),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
        ) {
            let sequential = Aggregator::new();
            for history in &histories {
                for r in history {
                    sequential.apply(r.clone());
                }
            }

            // Round-robin by random picks while keeping each uid's own order.
            let interleaved = Aggregator::new();
            let mut cursors: Vec<std::collections::VecDeque<NormalizedRecord>> =
                histories.iter().map(|h| h.iter().cloned().collect()).collect();
            for pick in picks {
                let live: Vec<usize> =
                    (0..cursors.len()).filter(|&i| !cursors[i].is_empty()).collect();
                if live.is_empty() {
                    break;
                }
                let i = live[pick.index(live.len())];
                if let Some(r) = cursors[i].pop_front() {
                    interleaved.apply(r);
                }
            }
            for queue in &mut cursors {
                while let Some(r) = queue.pop_front() {
                    interleaved.apply(r);
                }
            }

            prop_assert_eq!(sequential.drain(), interleaved.drain());
        }
    }
}
