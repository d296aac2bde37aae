//! Request construction and local validation
//!
//! Everything here runs before a transport is touched. Malformed input is
//! rejected with `InvalidArgument`, and empty bulk input yields no request
//! at all.

use cloudrt_core::{
    BulkMode, CloudRuntimesError, DeleteStateItem, ETag, Metadata, RuntimesResult, SetStateItem,
    StateConsistency, StateOperation, StateRequest, DEFAULT_MAX_BULK_PARALLELISM,
};

/// Requests of one bulk read, one per input key and in input order
#[derive(Debug, Clone)]
pub struct BulkGetPlan {
    pub requests: Vec<(String, StateRequest)>,
    /// Concurrent transport calls allowed, at least 1
    pub parallelism: usize,
}

impl BulkGetPlan {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Builds validated `StateRequest`s
#[derive(Debug, Clone, Copy)]
pub struct OperationBuilder {
    max_parallelism: usize,
}

impl Default for OperationBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BULK_PARALLELISM)
    }
}

fn invalid(message: impl Into<String>) -> CloudRuntimesError {
    CloudRuntimesError::InvalidArgument(message.into())
}

impl OperationBuilder {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Coerce a requested fan-out width into `1..=max_parallelism`
    pub fn parallelism(&self, requested: i32) -> usize {
        if requested <= 0 {
            return 1;
        }
        (requested as usize).min(self.max_parallelism)
    }

    pub fn validate_store(&self, store_name: &str) -> RuntimesResult<()> {
        if store_name.is_empty() {
            return Err(invalid("store name is empty"));
        }
        Ok(())
    }

    pub fn validate_key(&self, key: &str) -> RuntimesResult<()> {
        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        Ok(())
    }

    /// A supplied etag must carry a value
    fn validate_etag(&self, key: &str, etag: Option<&ETag>) -> RuntimesResult<()> {
        match etag {
            Some(etag) if etag.is_empty() => Err(invalid(format!("empty etag for key {}", key))),
            _ => Ok(()),
        }
    }

    pub fn get(
        &self,
        store_name: &str,
        key: &str,
        metadata: Metadata,
        consistency: StateConsistency,
    ) -> RuntimesResult<StateRequest> {
        self.validate_store(store_name)?;
        self.validate_key(key)?;
        Ok(StateRequest::Get {
            key: key.to_string(),
            metadata,
            consistency,
        })
    }

    pub fn bulk_get(
        &self,
        store_name: &str,
        keys: &[String],
        metadata: &Metadata,
        consistency: StateConsistency,
        parallelism: i32,
    ) -> RuntimesResult<BulkGetPlan> {
        self.validate_store(store_name)?;

        let requests = keys
            .iter()
            .map(|key| {
                let request = self.get(store_name, key, metadata.clone(), consistency)?;
                Ok((key.clone(), request))
            })
            .collect::<RuntimesResult<Vec<_>>>()?;

        Ok(BulkGetPlan {
            requests,
            parallelism: self.parallelism(parallelism),
        })
    }

    /// `None` when there is nothing to save
    pub fn save(
        &self,
        store_name: &str,
        items: Vec<SetStateItem>,
        mode: BulkMode,
    ) -> RuntimesResult<Option<StateRequest>> {
        self.validate_store(store_name)?;
        for item in &items {
            self.validate_key(&item.key)?;
            self.validate_etag(&item.key, item.etag.as_ref())?;
        }

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(StateRequest::Save { items, mode }))
    }

    /// `None` when there is nothing to delete
    pub fn delete(
        &self,
        store_name: &str,
        items: Vec<DeleteStateItem>,
        mode: BulkMode,
    ) -> RuntimesResult<Option<StateRequest>> {
        self.validate_store(store_name)?;
        for item in &items {
            self.validate_key(&item.key)?;
            self.validate_etag(&item.key, item.etag.as_ref())?;
        }

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(StateRequest::Delete { items, mode }))
    }

    /// Conditional single delete; the etag is required
    pub fn delete_with_etag(
        &self,
        store_name: &str,
        item: DeleteStateItem,
    ) -> RuntimesResult<StateRequest> {
        if item.etag.is_none() {
            return Err(invalid(format!("missing etag for key {}", item.key)));
        }
        self.delete(store_name, vec![item], BulkMode::FailFast)?
            .ok_or_else(|| invalid("nothing to delete"))
    }

    /// `None` for an empty transaction
    pub fn transaction(
        &self,
        store_name: &str,
        metadata: Metadata,
        operations: Vec<StateOperation>,
    ) -> RuntimesResult<Option<StateRequest>> {
        self.validate_store(store_name)?;
        for op in &operations {
            self.validate_key(op.key())?;
            self.validate_etag(op.key(), op.item.etag.as_ref())?;
        }

        if operations.is_empty() {
            return Ok(None);
        }
        Ok(Some(StateRequest::Transaction {
            operations,
            metadata,
        }))
    }
}
