//! Persistent state transport using sled database

use async_trait::async_trait;
use cloudrt_core::{
    BackendFault, CallHeaders, CloudRuntimesError, RuntimesResult, StateRequest, StateResponse,
    StateTransport,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{
    stage_deletes, stage_saves, stage_transaction, RecordSource, StoredRecord, WriteSet,
};

const STORE_TREE_PREFIX: &str = "store:";

fn storage_fault(err: sled::Error) -> BackendFault {
    BackendFault::unavailable(format!("storage error: {}", err))
}

/// One store, kept in its own sled tree
struct SledTable {
    tree: Tree,
    /// Serializes check-and-write sequences on this store
    write_gate: Mutex<()>,
}

struct TreeView<'a> {
    db: &'a Db,
    tree: &'a Tree,
}

impl RecordSource for TreeView<'_> {
    fn read(&self, key: &str) -> Result<Option<StoredRecord>, BackendFault> {
        match self.tree.get(key.as_bytes()).map_err(storage_fault)? {
            Some(bytes) => Ok(Some(StoredRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_version(&self) -> Result<u64, BackendFault> {
        // generate_id stays monotonic across restarts
        Ok(self.db.generate_id().map_err(storage_fault)? + 1)
    }
}

/// Persistent state transport backed by sled database
pub struct SledTransport {
    db: Db,
    stores: DashMap<String, Arc<SledTable>>,
}

impl SledTransport {
    /// Open the database and every store already present in it
    pub fn open<P: AsRef<Path>>(path: P) -> RuntimesResult<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| CloudRuntimesError::StoreUnavailable(e.to_string()))?;

        let transport = Self {
            db,
            stores: DashMap::new(),
        };

        for name in transport.db.tree_names() {
            if let Some(store) = name.strip_prefix(STORE_TREE_PREFIX.as_bytes()) {
                let store = String::from_utf8_lossy(store).to_string();
                transport.open_store(&store)?;
            }
        }

        info!(path = %path.as_ref().display(), stores = transport.stores.len(), "Opened sled state backend");
        Ok(transport)
    }

    /// Create the store if needed and start serving it
    ///
    /// Opening a store that is already served keeps its table.
    pub fn open_store(&self, name: &str) -> RuntimesResult<()> {
        let tree = self
            .db
            .open_tree(format!("{}{}", STORE_TREE_PREFIX, name))
            .map_err(|e| CloudRuntimesError::StoreUnavailable(e.to_string()))?;
        self.stores.entry(name.to_string()).or_insert_with(|| {
            Arc::new(SledTable {
                tree,
                write_gate: Mutex::new(()),
            })
        });
        Ok(())
    }

    pub fn with_store(self, name: &str) -> RuntimesResult<Self> {
        self.open_store(name)?;
        Ok(self)
    }

    /// Names of the stores being served
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of records in a store
    pub fn len(&self, store_name: &str) -> usize {
        self.stores
            .get(store_name)
            .map(|table| table.tree.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, store_name: &str) -> bool {
        self.len(store_name) == 0
    }

    pub fn flush(&self) -> RuntimesResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| CloudRuntimesError::StoreUnavailable(e.to_string()))
    }

    fn table(&self, store_name: &str) -> Result<Arc<SledTable>, BackendFault> {
        self.stores
            .get(store_name)
            .map(|table| table.value().clone())
            .ok_or_else(|| BackendFault::StoreNotConfigured(store_name.to_string()))
    }
}

fn apply(db: &Db, tree: &Tree, writes: WriteSet) -> Result<(), BackendFault> {
    if writes.is_empty() {
        return Ok(());
    }

    let mut batch = sled::Batch::default();
    for (key, record) in writes.into_entries() {
        match record {
            Some(record) => batch.insert(key.as_bytes(), record.to_bytes()?),
            None => batch.remove(key.as_bytes()),
        }
    }

    tree.apply_batch(batch).map_err(storage_fault)?;
    db.flush().map_err(storage_fault)?;
    Ok(())
}

fn handle(
    db: &Db,
    table: &SledTable,
    store_name: &str,
    request: StateRequest,
) -> Result<StateResponse, BackendFault> {
    let view = TreeView {
        db,
        tree: &table.tree,
    };

    match request {
        // single node, so every read is strongly consistent
        StateRequest::Get { key, .. } => {
            Ok(StateResponse::Item(view.read(&key)?.map(|r| r.to_item(&key))))
        }
        StateRequest::Save { items, mode } => {
            let _gate = table.write_gate.lock();
            let (outcomes, writes) = stage_saves(&view, &items, mode)?;
            debug!(store = %store_name, count = writes.len(), "Applying saves");
            apply(db, &table.tree, writes)?;
            Ok(StateResponse::Writes(outcomes))
        }
        StateRequest::Delete { items, mode } => {
            let _gate = table.write_gate.lock();
            let (outcomes, writes) = stage_deletes(&view, &items, mode)?;
            debug!(store = %store_name, count = writes.len(), "Applying deletes");
            apply(db, &table.tree, writes)?;
            Ok(StateResponse::Writes(outcomes))
        }
        StateRequest::Transaction { operations, .. } => {
            let _gate = table.write_gate.lock();
            let writes = stage_transaction(&view, &operations)?;
            debug!(store = %store_name, count = writes.len(), "Committing transaction");
            apply(db, &table.tree, writes)?;
            Ok(StateResponse::Committed)
        }
    }
}

#[async_trait]
impl StateTransport for SledTransport {
    async fn send(
        &self,
        store_name: &str,
        request: StateRequest,
        _headers: &CallHeaders,
    ) -> Result<StateResponse, BackendFault> {
        let table = self.table(store_name)?;
        let db = self.db.clone();
        let store_name = store_name.to_string();

        tokio::task::spawn_blocking(move || handle(&db, &table, &store_name, request))
            .await
            .map_err(|e| BackendFault::unavailable(format!("storage task failed: {}", e)))?
    }
}

/// Thread-safe persistent transport wrapper
pub type SharedSledTransport = Arc<SledTransport>;

/// Create a shared persistent transport serving the given stores
pub fn create_sled_transport<P: AsRef<Path>>(
    path: P,
    stores: &[&str],
) -> RuntimesResult<SharedSledTransport> {
    let transport = SledTransport::open(path)?;
    for name in stores {
        transport.open_store(name)?;
    }
    Ok(Arc::new(transport))
}
