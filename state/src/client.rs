//! State client
//!
//! Orchestrates get/save/delete/transaction calls against a named store
//! through a `StateTransport`, applying the concurrency and consistency
//! policy and mapping backend faults to `CloudRuntimesError`.

use cloudrt_core::{
    BackendFault, BulkMode, BulkStateItem, BulkWriteResult, CallHeaders, CloudRuntimesError,
    DeleteStateItem, ETag, ItemOutcome, Metadata, RuntimesResult, SetStateItem, StateConcurrency,
    StateConfig, StateConsistency, StateItem, StateOperation, StateOption, StateOptions,
    StateRequest, StateResponse, StateTransport,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::builder::OperationBuilder;
use crate::context::CallContext;

/// Map a backend fault outside of a transaction
pub fn fault_to_error(fault: BackendFault) -> CloudRuntimesError {
    match fault {
        BackendFault::EtagMismatch { ref key, .. } => CloudRuntimesError::ConcurrencyConflict {
            key: key.clone(),
            reason: fault.to_string(),
        },
        BackendFault::ConsistencyUnsupported(level) => {
            CloudRuntimesError::UnsupportedConsistency(level)
        }
        BackendFault::TransactionAborted(reason) => CloudRuntimesError::TransactionAborted(reason),
        BackendFault::StoreNotConfigured(store) => {
            CloudRuntimesError::InvalidArgument(format!("state store {} is not configured", store))
        }
        BackendFault::InvalidRequest(reason) => CloudRuntimesError::InvalidArgument(reason),
        BackendFault::Unavailable(reason) => CloudRuntimesError::StoreUnavailable(reason),
    }
}

/// Map a backend fault of a transaction; a failed check aborts it
fn transaction_fault_to_error(fault: BackendFault) -> CloudRuntimesError {
    match fault {
        BackendFault::EtagMismatch { .. } => CloudRuntimesError::TransactionAborted(fault.to_string()),
        other => fault_to_error(other),
    }
}

fn unexpected(kind: &str, response: &StateResponse) -> CloudRuntimesError {
    CloudRuntimesError::Internal(format!("unexpected response to {}: {:?}", kind, response))
}

/// Client for the state API
pub struct StateClient {
    transport: Arc<dyn StateTransport>,
    builder: OperationBuilder,
    default_consistency: StateConsistency,
    request_timeout: Option<Duration>,
    auth_token: RwLock<Option<String>>,
}

impl StateClient {
    pub fn new(transport: Arc<dyn StateTransport>) -> Self {
        Self::with_config(transport, &StateConfig::default())
    }

    pub fn with_config(transport: Arc<dyn StateTransport>, config: &StateConfig) -> Self {
        Self {
            transport,
            builder: OperationBuilder::new(config.max_bulk_parallelism),
            default_consistency: config.default_consistency,
            request_timeout: None,
            auth_token: RwLock::new(None),
        }
    }

    /// Deadline applied to calls whose context carries none
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Token attached to every request whose context carries none
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    pub fn builder(&self) -> &OperationBuilder {
        &self.builder
    }

    fn prepare(&self, ctx: &CallContext) -> (CallContext, CallHeaders) {
        let ctx = ctx.clone().or_timeout(self.request_timeout);
        let mut headers = ctx.headers().clone();
        if headers.auth_token.is_none() {
            headers.auth_token = self.auth_token.read().clone();
        }
        (ctx, headers)
    }

    /// Send one request, bounded by the context
    async fn dispatch(
        &self,
        ctx: &CallContext,
        store_name: &str,
        request: StateRequest,
    ) -> RuntimesResult<Result<StateResponse, BackendFault>> {
        let (ctx, headers) = self.prepare(ctx);
        debug!(store = %store_name, kind = %request.kind(), count = request.len(), "Dispatching state request");
        ctx.run(async {
            Ok::<_, CloudRuntimesError>(self.transport.send(store_name, request, &headers).await)
        })
        .await
    }

    // ============ Reads ============

    /// Read one key with the configured default consistency
    ///
    /// A missing key yields an empty item, not an error.
    pub async fn get_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
    ) -> RuntimesResult<StateItem> {
        self.get_state_with_consistency(ctx, store_name, key, Metadata::new(), self.default_consistency)
            .await
    }

    pub async fn get_state_with_consistency(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
        metadata: Metadata,
        consistency: StateConsistency,
    ) -> RuntimesResult<StateItem> {
        let request = self.builder.get(store_name, key, metadata, consistency)?;

        match self.dispatch(ctx, store_name, request).await? {
            Ok(StateResponse::Item(Some(item))) => Ok(item),
            Ok(StateResponse::Item(None)) => Ok(StateItem::empty(key)),
            Ok(other) => Err(unexpected("get", &other)),
            Err(fault) => {
                warn!(store = %store_name, key = %key, error = %fault, "Get failed");
                Err(fault_to_error(fault))
            }
        }
    }

    /// Read many keys with up to `parallelism` concurrent transport calls
    ///
    /// The result has one entry per input key, in input order. Each entry
    /// fails on its own; only cancellation or the deadline fail the call.
    pub async fn get_bulk_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        keys: &[String],
        metadata: Metadata,
        parallelism: i32,
    ) -> RuntimesResult<Vec<BulkStateItem>> {
        let plan = self
            .builder
            .bulk_get(store_name, keys, &metadata, self.default_consistency, parallelism)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let (ctx, headers) = self.prepare(ctx);
        let count = plan.requests.len();
        debug!(store = %store_name, count, parallelism = plan.parallelism, "Fanning out bulk get");

        let transport = &self.transport;
        let headers = &headers;
        let fetches = plan
            .requests
            .into_iter()
            .enumerate()
            .map(move |(index, (key, request))| async move {
                let item = match transport.send(store_name, request, headers).await {
                    Ok(StateResponse::Item(Some(item))) => BulkStateItem::from(item),
                    Ok(StateResponse::Item(None)) => BulkStateItem::from(StateItem::empty(key)),
                    Ok(other) => BulkStateItem::failed(key, unexpected("get", &other).to_string()),
                    Err(fault) => {
                        let error = fault_to_error(fault);
                        warn!(store = %store_name, key = %key, error = %error, "Bulk get item failed");
                        BulkStateItem::failed(key, error.to_string())
                    }
                };
                (index, item)
            });

        // dropping the stream on cancellation drops every in-flight fetch
        let mut results: Vec<(usize, BulkStateItem)> = ctx
            .run(async {
                Ok::<_, CloudRuntimesError>(
                    stream::iter(fetches)
                        .buffer_unordered(plan.parallelism)
                        .collect::<Vec<_>>()
                        .await,
                )
            })
            .await
            .map_err(|e| {
                warn!(store = %store_name, count, error = %e, "Bulk get interrupted");
                e
            })?;

        results.sort_by_key(|(index, _)| *index);
        let items: Vec<BulkStateItem> = results.into_iter().map(|(_, item)| item).collect();

        let failed = items.iter().filter(|item| !item.is_ok()).count();
        info!(store = %store_name, count, failed, "Bulk get complete");
        Ok(items)
    }

    // ============ Writes ============

    /// Send a save or delete and interpret the per-item outcomes
    async fn write(
        &self,
        ctx: &CallContext,
        store_name: &str,
        request: StateRequest,
    ) -> RuntimesResult<Vec<ItemOutcome>> {
        match self.dispatch(ctx, store_name, request).await? {
            Ok(StateResponse::Writes(outcomes)) => Ok(outcomes),
            Ok(other) => Err(unexpected("write", &other)),
            Err(fault) => {
                warn!(store = %store_name, error = %fault, "Write rejected");
                Err(fault_to_error(fault))
            }
        }
    }

    /// Fail with the first failed item, if any
    fn first_failure(store_name: &str, outcomes: Vec<ItemOutcome>) -> RuntimesResult<()> {
        match outcomes.into_iter().find_map(|outcome| outcome.fault) {
            Some(fault) => {
                let error = fault_to_error(fault);
                if error.is_conflict() {
                    warn!(store = %store_name, error = %error, "Conditional write lost the race");
                }
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn item_results(outcomes: Vec<ItemOutcome>) -> Vec<BulkWriteResult> {
        outcomes
            .into_iter()
            .map(|outcome| BulkWriteResult {
                key: outcome.key,
                error: outcome.fault.map(|fault| fault_to_error(fault).to_string()),
            })
            .collect()
    }

    async fn write_fail_fast(
        &self,
        ctx: &CallContext,
        store_name: &str,
        request: Option<StateRequest>,
    ) -> RuntimesResult<()> {
        let Some(request) = request else {
            return Ok(());
        };
        let outcomes = self.write(ctx, store_name, request).await?;
        Self::first_failure(store_name, outcomes)
    }

    async fn write_independent(
        &self,
        ctx: &CallContext,
        store_name: &str,
        request: Option<StateRequest>,
    ) -> RuntimesResult<Vec<BulkWriteResult>> {
        let Some(request) = request else {
            return Ok(Vec::new());
        };
        let results = Self::item_results(self.write(ctx, store_name, request).await?);
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(store = %store_name, count = results.len(), failed, "Independent bulk write complete");
        Ok(results)
    }

    async fn write_atomic(
        &self,
        ctx: &CallContext,
        store_name: &str,
        request: Option<StateRequest>,
    ) -> RuntimesResult<()> {
        let Some(request) = request else {
            return Ok(());
        };
        let count = request.len();
        let outcomes = self.write(ctx, store_name, request).await?;
        // an atomic write either aborts above or applies every item
        Self::first_failure(store_name, outcomes)?;
        info!(store = %store_name, count, "Atomic bulk write applied");
        Ok(())
    }

    /// Save one value; `options` are folded over the defaults in order
    pub async fn save_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
        data: Vec<u8>,
        options: &[StateOption],
    ) -> RuntimesResult<()> {
        let item = SetStateItem::new(key, data)
            .with_options(StateOptions::from_modifiers(options.iter().copied()));
        self.save_bulk_state(ctx, store_name, vec![item]).await
    }

    /// Save items in order, stopping at the first failure
    ///
    /// Items before the failing one stay applied.
    pub async fn save_bulk_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<SetStateItem>,
    ) -> RuntimesResult<()> {
        let request = self.builder.save(store_name, items, BulkMode::FailFast)?;
        self.write_fail_fast(ctx, store_name, request).await
    }

    /// Attempt every item and report each outcome in input order
    pub async fn save_bulk_state_independent(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<SetStateItem>,
    ) -> RuntimesResult<Vec<BulkWriteResult>> {
        let request = self.builder.save(store_name, items, BulkMode::Independent)?;
        self.write_independent(ctx, store_name, request).await
    }

    /// Save every item or none of them
    pub async fn save_bulk_state_atomic(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<SetStateItem>,
    ) -> RuntimesResult<()> {
        let request = self.builder.save(store_name, items, BulkMode::Atomic)?;
        self.write_atomic(ctx, store_name, request).await
    }

    // ============ Deletes ============

    /// Unconditional delete; a missing key is not an error
    pub async fn delete_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
    ) -> RuntimesResult<()> {
        self.delete_bulk_state_items(ctx, store_name, vec![DeleteStateItem::new(key)])
            .await
    }

    /// Delete only if `etag` matches the current version
    ///
    /// Without options, or with `Unspecified` concurrency, the delete is
    /// `FirstWrite`. Only explicit `LastWrite` options make it unconditional.
    pub async fn delete_state_with_etag(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
        etag: ETag,
        metadata: Metadata,
        options: Option<StateOptions>,
    ) -> RuntimesResult<()> {
        let mut options = options.unwrap_or_else(|| {
            StateOptions::default().with_concurrency(StateConcurrency::FirstWrite)
        });
        if options.concurrency == StateConcurrency::Unspecified {
            options.concurrency = StateConcurrency::FirstWrite;
        }
        let item = DeleteStateItem::new(key)
            .with_etag(etag)
            .with_metadata(metadata)
            .with_options(options);

        let request = self.builder.delete_with_etag(store_name, item)?;
        self.write_fail_fast(ctx, store_name, Some(request)).await
    }

    /// Unconditionally delete keys in order, stopping at the first failure
    pub async fn delete_bulk_state(
        &self,
        ctx: &CallContext,
        store_name: &str,
        keys: &[String],
    ) -> RuntimesResult<()> {
        let items = keys.iter().map(DeleteStateItem::new).collect();
        self.delete_bulk_state_items(ctx, store_name, items).await
    }

    /// Delete items in order, stopping at the first failure
    pub async fn delete_bulk_state_items(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<DeleteStateItem>,
    ) -> RuntimesResult<()> {
        let request = self.builder.delete(store_name, items, BulkMode::FailFast)?;
        self.write_fail_fast(ctx, store_name, request).await
    }

    pub async fn delete_bulk_state_items_independent(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<DeleteStateItem>,
    ) -> RuntimesResult<Vec<BulkWriteResult>> {
        let request = self.builder.delete(store_name, items, BulkMode::Independent)?;
        self.write_independent(ctx, store_name, request).await
    }

    pub async fn delete_bulk_state_items_atomic(
        &self,
        ctx: &CallContext,
        store_name: &str,
        items: Vec<DeleteStateItem>,
    ) -> RuntimesResult<()> {
        let request = self.builder.delete(store_name, items, BulkMode::Atomic)?;
        self.write_atomic(ctx, store_name, request).await
    }

    // ============ Transactions ============

    /// Apply all operations atomically
    ///
    /// A failed concurrency check aborts the whole set with
    /// `TransactionAborted` and leaves the store untouched.
    pub async fn execute_state_transaction(
        &self,
        ctx: &CallContext,
        store_name: &str,
        metadata: Metadata,
        operations: Vec<StateOperation>,
    ) -> RuntimesResult<()> {
        let Some(request) = self.builder.transaction(store_name, metadata, operations)? else {
            return Ok(());
        };
        let count = request.len();

        match self.dispatch(ctx, store_name, request).await? {
            Ok(StateResponse::Committed) => {
                info!(store = %store_name, count, "Transaction committed");
                Ok(())
            }
            Ok(other) => Err(unexpected("transaction", &other)),
            Err(fault) => {
                warn!(store = %store_name, count, error = %fault, "Transaction aborted");
                Err(transaction_fault_to_error(fault))
            }
        }
    }
}
