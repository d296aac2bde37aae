//! In-memory state transport for testing and local development

use async_trait::async_trait;
use cloudrt_core::{
    BackendFault, CallHeaders, StateConsistency, StateRequest, StateResponse, StateTransport,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::store::{stage_deletes, stage_saves, stage_transaction, RecordSource, StoredRecord, WriteSet};

/// Records of one named store
#[derive(Default)]
struct MemoryTable {
    records: RwLock<HashMap<String, StoredRecord>>,
    sequence: AtomicU64,
}

/// Read view over a locked table
struct LockedView<'a> {
    records: &'a HashMap<String, StoredRecord>,
    sequence: &'a AtomicU64,
}

impl RecordSource for LockedView<'_> {
    fn read(&self, key: &str) -> Result<Option<StoredRecord>, BackendFault> {
        Ok(self.records.get(key).cloned())
    }

    fn next_version(&self) -> Result<u64, BackendFault> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn apply(records: &mut HashMap<String, StoredRecord>, writes: WriteSet) {
    for (key, record) in writes.into_entries() {
        match record {
            Some(record) => {
                records.insert(key, record);
            }
            None => {
                records.remove(&key);
            }
        }
    }
}

/// In-memory state transport
///
/// Holds any number of named stores. Every write request runs under the
/// store's write lock, so conditional checks and the writes they guard
/// are applied as one step.
pub struct MemoryTransport {
    stores: DashMap<String, Arc<MemoryTable>>,
    supports_strong: bool,
    faults: DashMap<String, BackendFault>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
            supports_strong: true,
            faults: DashMap::new(),
        }
    }

    /// A backend that only serves eventually consistent reads
    pub fn eventual_only() -> Self {
        Self {
            supports_strong: false,
            ..Self::new()
        }
    }

    /// Register a named store
    pub fn with_store(self, name: &str) -> Self {
        self.add_store(name);
        self
    }

    pub fn add_store(&self, name: &str) {
        self.stores.entry(name.to_string()).or_default();
    }

    /// Make every request touching `key` fail with `fault`
    ///
    /// A failing write or transaction applies none of its items.
    pub fn inject_fault(&self, key: &str, fault: BackendFault) {
        self.faults.insert(key.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of records in a store
    pub fn len(&self, store_name: &str) -> usize {
        self.stores
            .get(store_name)
            .map(|table| table.records.read().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, store_name: &str) -> bool {
        self.len(store_name) == 0
    }

    fn table(&self, store_name: &str) -> Result<Arc<MemoryTable>, BackendFault> {
        self.stores
            .get(store_name)
            .map(|table| table.value().clone())
            .ok_or_else(|| BackendFault::StoreNotConfigured(store_name.to_string()))
    }

    fn injected(&self, request: &StateRequest) -> Result<(), BackendFault> {
        if self.faults.is_empty() {
            return Ok(());
        }
        let keys: Vec<&str> = match request {
            StateRequest::Get { key, .. } => vec![key.as_str()],
            StateRequest::Save { items, .. } => items.iter().map(|i| i.key.as_str()).collect(),
            StateRequest::Delete { items, .. } => items.iter().map(|i| i.key.as_str()).collect(),
            StateRequest::Transaction { operations, .. } => {
                operations.iter().map(|op| op.key()).collect()
            }
        };
        match keys.into_iter().find_map(|key| self.faults.get(key)) {
            Some(fault) => Err(fault.value().clone()),
            None => Ok(()),
        }
    }

    fn handle(&self, store_name: &str, request: StateRequest) -> Result<StateResponse, BackendFault> {
        let table = self.table(store_name)?;
        self.injected(&request)?;

        match request {
            StateRequest::Get {
                key, consistency, ..
            } => {
                if consistency.effective() == StateConsistency::Strong && !self.supports_strong {
                    return Err(BackendFault::ConsistencyUnsupported(StateConsistency::Strong));
                }
                let records = table.records.read();
                Ok(StateResponse::Item(records.get(&key).map(|r| r.to_item(&key))))
            }
            StateRequest::Save { items, mode } => {
                let mut records = table.records.write();
                let view = LockedView {
                    records: &records,
                    sequence: &table.sequence,
                };
                let (outcomes, writes) = stage_saves(&view, &items, mode)?;
                debug!(store = %store_name, count = writes.len(), "Applying saves");
                apply(&mut records, writes);
                Ok(StateResponse::Writes(outcomes))
            }
            StateRequest::Delete { items, mode } => {
                let mut records = table.records.write();
                let view = LockedView {
                    records: &records,
                    sequence: &table.sequence,
                };
                let (outcomes, writes) = stage_deletes(&view, &items, mode)?;
                debug!(store = %store_name, count = writes.len(), "Applying deletes");
                apply(&mut records, writes);
                Ok(StateResponse::Writes(outcomes))
            }
            StateRequest::Transaction { operations, .. } => {
                let mut records = table.records.write();
                let view = LockedView {
                    records: &records,
                    sequence: &table.sequence,
                };
                let writes = stage_transaction(&view, &operations)?;
                debug!(store = %store_name, count = writes.len(), "Committing transaction");
                apply(&mut records, writes);
                Ok(StateResponse::Committed)
            }
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateTransport for MemoryTransport {
    async fn send(
        &self,
        store_name: &str,
        request: StateRequest,
        _headers: &CallHeaders,
    ) -> Result<StateResponse, BackendFault> {
        self.handle(store_name, request)
    }
}

/// Thread-safe memory transport wrapper
pub type SharedMemoryTransport = Arc<MemoryTransport>;

/// Create a shared memory transport with the given stores registered
pub fn create_memory_transport(stores: &[&str]) -> SharedMemoryTransport {
    let transport = MemoryTransport::new();
    for name in stores {
        transport.add_store(name);
    }
    Arc::new(transport)
}
