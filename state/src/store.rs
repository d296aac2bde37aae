//! Record layout and write policy shared by the reference backends
//!
//! Backends read through a `RecordSource`, stage writes into a `WriteSet`
//! and then apply the set in one step. Staged writes are visible to later
//! items of the same request, so two writes to one key inside a bulk call
//! or transaction see each other.

use cloudrt_core::{
    BackendFault, BulkMode, DeleteStateItem, ETag, ItemOutcome, Metadata, OperationType,
    SetStateItem, StateItem, StateOperation, StateOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A record as held by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: Vec<u8>,
    /// Store-wide sequence number of the write that produced this record
    pub version: u64,
    pub metadata: Metadata,
}

impl StoredRecord {
    pub fn etag(&self) -> ETag {
        ETag::new(self.version.to_string())
    }

    pub fn to_item(&self, key: &str) -> StateItem {
        StateItem {
            key: key.to_string(),
            value: self.value.clone(),
            etag: Some(self.etag()),
            metadata: self.metadata.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BackendFault> {
        bincode::serialize(self)
            .map_err(|e| BackendFault::unavailable(format!("record encoding failed: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackendFault> {
        bincode::deserialize(bytes)
            .map_err(|e| BackendFault::unavailable(format!("record decoding failed: {}", e)))
    }
}

/// Read access to the committed records of one store
pub trait RecordSource {
    fn read(&self, key: &str) -> Result<Option<StoredRecord>, BackendFault>;

    /// Allocate the version for a new write. Never reused within a store.
    fn next_version(&self) -> Result<u64, BackendFault>;
}

/// Check a conditional write or delete against the current record
///
/// Only `FirstWrite` is conditional. A supplied etag must equal the current
/// one; without an etag the key must not exist yet.
pub fn check_condition(
    key: &str,
    options: &StateOptions,
    supplied: Option<&ETag>,
    current: Option<&StoredRecord>,
) -> Result<(), BackendFault> {
    if !options.concurrency.checks_etag() {
        return Ok(());
    }

    let current_etag = current.map(StoredRecord::etag);
    match (supplied, current_etag.as_ref()) {
        (Some(expected), Some(actual)) if expected == actual => Ok(()),
        (None, None) => Ok(()),
        _ => {
            warn!(key = %key, expected = ?supplied, current = ?current_etag, "Conditional check failed");
            Err(BackendFault::EtagMismatch {
                key: key.to_string(),
                expected: supplied.map(|e| e.as_str().to_string()),
                current: current_etag.map(ETag::into_inner),
            })
        }
    }
}

/// Writes staged by one request; `None` marks a removal
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    entries: BTreeMap<String, Option<StoredRecord>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: String, record: StoredRecord) {
        self.entries.insert(key, Some(record));
    }

    pub fn remove(&mut self, key: String) {
        self.entries.insert(key, None);
    }

    fn staged(&self, key: &str) -> Option<&Option<StoredRecord>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, Option<StoredRecord>)> {
        self.entries.into_iter()
    }
}

/// Conditional staging on top of a `RecordSource`
pub struct Staging<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    writes: WriteSet,
}

impl<'a, S: RecordSource + ?Sized> Staging<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            writes: WriteSet::new(),
        }
    }

    fn current(&self, key: &str) -> Result<Option<StoredRecord>, BackendFault> {
        match self.writes.staged(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.source.read(key),
        }
    }

    pub fn save(&mut self, item: &SetStateItem) -> Result<(), BackendFault> {
        let current = self.current(&item.key)?;
        check_condition(&item.key, &item.options, item.etag.as_ref(), current.as_ref())?;

        let record = StoredRecord {
            value: item.value.clone(),
            version: self.source.next_version()?,
            metadata: item.metadata.clone(),
        };
        self.writes.put(item.key.clone(), record);
        Ok(())
    }

    pub fn delete(
        &mut self,
        key: &str,
        etag: Option<&ETag>,
        options: &StateOptions,
    ) -> Result<(), BackendFault> {
        let current = self.current(key)?;
        check_condition(key, options, etag, current.as_ref())?;

        if current.is_some() {
            self.writes.remove(key.to_string());
        }
        Ok(())
    }

    pub fn operation(&mut self, op: &StateOperation) -> Result<(), BackendFault> {
        match op.op_type {
            OperationType::Upsert => self.save(&op.item),
            OperationType::Delete => self.delete(&op.item.key, op.item.etag.as_ref(), &op.item.options),
        }
    }

    pub fn finish(self) -> WriteSet {
        self.writes
    }
}

fn stage_bulk<S, T, K, F>(
    source: &S,
    items: &[T],
    mode: BulkMode,
    key_of: K,
    mut stage: F,
) -> Result<(Vec<ItemOutcome>, WriteSet), BackendFault>
where
    S: RecordSource + ?Sized,
    K: Fn(&T) -> &str,
    F: FnMut(&mut Staging<'_, S>, &T) -> Result<(), BackendFault>,
{
    let mut staging = Staging::new(source);
    let mut outcomes = Vec::with_capacity(items.len());

    for item in items {
        let key = key_of(item);
        match stage(&mut staging, item) {
            Ok(()) => outcomes.push(ItemOutcome::ok(key)),
            Err(fault) => match mode {
                BulkMode::Atomic => {
                    return Err(BackendFault::TransactionAborted(fault.to_string()));
                }
                BulkMode::FailFast => {
                    outcomes.push(ItemOutcome::failed(key, fault));
                    break;
                }
                BulkMode::Independent => outcomes.push(ItemOutcome::failed(key, fault)),
            },
        }
    }

    Ok((outcomes, staging.finish()))
}

/// Stage a multi-item save under the given mode
pub fn stage_saves<S: RecordSource + ?Sized>(
    source: &S,
    items: &[SetStateItem],
    mode: BulkMode,
) -> Result<(Vec<ItemOutcome>, WriteSet), BackendFault> {
    stage_bulk(source, items, mode, |item| item.key.as_str(), |staging, item| {
        staging.save(item)
    })
}

/// Stage a multi-item delete under the given mode
pub fn stage_deletes<S: RecordSource + ?Sized>(
    source: &S,
    items: &[DeleteStateItem],
    mode: BulkMode,
) -> Result<(Vec<ItemOutcome>, WriteSet), BackendFault> {
    stage_bulk(source, items, mode, |item| item.key.as_str(), |staging, item| {
        staging.delete(&item.key, item.etag.as_ref(), &item.options)
    })
}

/// Stage a transaction; any failing step aborts the whole set
pub fn stage_transaction<S: RecordSource + ?Sized>(
    source: &S,
    operations: &[StateOperation],
) -> Result<WriteSet, BackendFault> {
    let (_, writes) = stage_bulk(
        source,
        operations,
        BulkMode::Atomic,
        |op| op.key(),
        |staging, op| staging.operation(op),
    )?;
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudrt_core::{StateConcurrency, StateOption};
    use std::cell::Cell;
    use std::collections::HashMap;

    struct TestSource {
        records: HashMap<String, StoredRecord>,
        sequence: Cell<u64>,
    }

    impl TestSource {
        fn with(entries: &[(&str, &str, u64)]) -> Self {
            let records = entries
                .iter()
                .map(|(k, v, version)| {
                    (
                        k.to_string(),
                        StoredRecord {
                            value: v.as_bytes().to_vec(),
                            version: *version,
                            metadata: Metadata::new(),
                        },
                    )
                })
                .collect();
            Self {
                records,
                sequence: Cell::new(100),
            }
        }
    }

    impl RecordSource for TestSource {
        fn read(&self, key: &str) -> Result<Option<StoredRecord>, BackendFault> {
            Ok(self.records.get(key).cloned())
        }

        fn next_version(&self) -> Result<u64, BackendFault> {
            let next = self.sequence.get() + 1;
            self.sequence.set(next);
            Ok(next)
        }
    }

    fn first_write() -> StateOptions {
        StateOptions::from_modifiers([StateOption::first_write()])
    }

    #[test]
    fn test_record_roundtrip() {
        let record = StoredRecord {
            value: b"value".to_vec(),
            version: 7,
            metadata: Metadata::from([("ttl".to_string(), "60".to_string())]),
        };
        let restored = StoredRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(record, restored);
        assert_eq!(restored.etag().as_str(), "7");
    }

    #[test]
    fn test_last_write_ignores_etag() {
        let source = TestSource::with(&[("k", "v", 3)]);
        let current = source.read("k").unwrap();
        let stale = ETag::new("1");
        assert!(check_condition("k", &StateOptions::default(), Some(&stale), current.as_ref()).is_ok());
    }

    #[test]
    fn test_first_write_conditions() {
        let source = TestSource::with(&[("k", "v", 3)]);
        let current = source.read("k").unwrap();
        let opts = first_write();

        assert!(check_condition("k", &opts, Some(&ETag::new("3")), current.as_ref()).is_ok());
        assert!(check_condition("k", &opts, Some(&ETag::new("2")), current.as_ref()).is_err());
        // create-only without an etag
        assert!(check_condition("k", &opts, None, current.as_ref()).is_err());
        assert!(check_condition("new", &opts, None, None).is_ok());
        // expected a version but the key is gone
        assert!(matches!(
            check_condition("new", &opts, Some(&ETag::new("3")), None),
            Err(BackendFault::EtagMismatch { current: None, .. })
        ));
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let source = TestSource::with(&[("b", "old", 5)]);
        let items = vec![
            SetStateItem::new("a", b"1".to_vec()),
            SetStateItem::new("b", b"2".to_vec())
                .with_etag("4")
                .with_options(first_write()),
            SetStateItem::new("c", b"3".to_vec()),
        ];

        let (outcomes, writes) = stage_saves(&source, &items, BulkMode::FailFast).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].fault.is_none());
        assert!(matches!(outcomes[1].fault, Some(BackendFault::EtagMismatch { .. })));
        assert_eq!(writes.len(), 1);
    }

    #[test]
    fn test_independent_attempts_every_item() {
        let source = TestSource::with(&[("b", "old", 5)]);
        let items = vec![
            SetStateItem::new("a", b"1".to_vec()),
            SetStateItem::new("b", b"2".to_vec())
                .with_etag("4")
                .with_options(first_write()),
            SetStateItem::new("c", b"3".to_vec()),
        ];

        let (outcomes, writes) = stage_saves(&source, &items, BulkMode::Independent).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[1].fault.is_some());
        assert!(outcomes[2].fault.is_none());
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn test_atomic_aborts_everything() {
        let source = TestSource::with(&[("b", "old", 5)]);
        let items = vec![
            SetStateItem::new("a", b"1".to_vec()),
            SetStateItem::new("b", b"2".to_vec())
                .with_etag("4")
                .with_options(first_write()),
        ];

        let result = stage_saves(&source, &items, BulkMode::Atomic);
        assert!(matches!(result, Err(BackendFault::TransactionAborted(_))));
    }

    #[test]
    fn test_transaction_sees_its_own_writes() {
        let source = TestSource::with(&[]);
        let opts = StateOptions::default().with_concurrency(StateConcurrency::FirstWrite);
        let ops = vec![
            StateOperation::upsert(SetStateItem::new("k", b"1".to_vec()).with_options(opts)),
            // the first step allocated version 101
            StateOperation::upsert(
                SetStateItem::new("k", b"2".to_vec())
                    .with_etag("101")
                    .with_options(opts),
            ),
            StateOperation::delete(cloudrt_core::DeleteStateItem::new("k").with_etag("102").with_options(opts)),
        ];

        let writes = stage_transaction(&source, &ops).unwrap();
        let entries: Vec<_> = writes.into_entries().collect();
        assert_eq!(entries, vec![("k".to_string(), None)]);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let source = TestSource::with(&[]);
        let mut staging = Staging::new(&source);
        staging.delete("missing", None, &StateOptions::default()).unwrap();
        assert!(staging.finish().is_empty());
    }
}
