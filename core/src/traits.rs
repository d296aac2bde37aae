//! Transport traits and the requests that cross them
//!
//! The clients own all request shaping and result interpretation. A
//! transport only moves a request to the sidecar and hands back its raw
//! outcome, so alternative backends can be swapped in behind these traits.

use crate::error::BackendFault;
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Result type for cloud-runtimes operations
pub type RuntimesResult<T> = Result<T, crate::error::CloudRuntimesError>;

/// Out-of-band values attached to every outgoing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallHeaders {
    pub trace_id: Option<String>,
    pub auth_token: Option<String>,
}

/// Kind of a state request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Get,
    Save,
    Delete,
    Transaction,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Get => "get",
            RequestKind::Save => "save",
            RequestKind::Delete => "delete",
            RequestKind::Transaction => "transaction",
        };
        write!(f, "{}", name)
    }
}

/// How a backend applies a multi-item write or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkMode {
    /// Apply in order, stop at the first failing item
    FailFast,
    /// Check every item first, then apply all or nothing
    Atomic,
    /// Attempt every item and report each outcome
    Independent,
}

/// A fully validated request for one store
#[derive(Debug, Clone, PartialEq)]
pub enum StateRequest {
    Get {
        key: String,
        metadata: Metadata,
        consistency: StateConsistency,
    },
    Save {
        items: Vec<SetStateItem>,
        mode: BulkMode,
    },
    Delete {
        items: Vec<DeleteStateItem>,
        mode: BulkMode,
    },
    Transaction {
        operations: Vec<StateOperation>,
        metadata: Metadata,
    },
}

impl StateRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            StateRequest::Get { .. } => RequestKind::Get,
            StateRequest::Save { .. } => RequestKind::Save,
            StateRequest::Delete { .. } => RequestKind::Delete,
            StateRequest::Transaction { .. } => RequestKind::Transaction,
        }
    }

    /// Number of items the request touches
    pub fn len(&self) -> usize {
        match self {
            StateRequest::Get { .. } => 1,
            StateRequest::Save { items, .. } => items.len(),
            StateRequest::Delete { items, .. } => items.len(),
            StateRequest::Transaction { operations, .. } => operations.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one item of a save or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub key: String,
    pub fault: Option<BackendFault>,
}

impl ItemOutcome {
    pub fn ok(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fault: None,
        }
    }

    pub fn failed(key: impl Into<String>, fault: BackendFault) -> Self {
        Self {
            key: key.into(),
            fault: Some(fault),
        }
    }
}

/// Raw result of a state request
#[derive(Debug, Clone, PartialEq)]
pub enum StateResponse {
    /// A read; `None` when the key is absent
    Item(Option<StateItem>),
    /// Per-item outcomes of a save or delete, in request order
    Writes(Vec<ItemOutcome>),
    /// A transaction committed
    Committed,
}

/// State store transport
///
/// Implementations are shared across concurrent calls and must be safe
/// for concurrent use.
#[async_trait]
pub trait StateTransport: Send + Sync {
    /// Send one request to the named store
    async fn send(
        &self,
        store_name: &str,
        request: StateRequest,
        headers: &CallHeaders,
    ) -> Result<StateResponse, BackendFault>;
}

// -------------------------- runtime passthroughs

/// Service invocation content
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataContent {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Binding invocation request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvokeBindingRequest {
    /// Name of the binding component
    pub name: String,
    /// Operation the binding should perform
    pub operation: String,
    pub data: Vec<u8>,
    pub metadata: Metadata,
}

/// Data returned from a binding
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BindingEvent {
    pub data: Vec<u8>,
    pub metadata: Metadata,
}

/// Opaque call to the sidecar outside the state API
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeRequest {
    InvokeMethod {
        app_id: String,
        method: String,
        verb: String,
        content: Option<DataContent>,
    },
    InvokeBinding {
        request: InvokeBindingRequest,
        expect_reply: bool,
    },
    PublishEvent {
        pubsub_name: String,
        topic: String,
        data: Vec<u8>,
        content_type: Option<String>,
    },
    GetSecret {
        store_name: String,
        key: String,
        metadata: Metadata,
    },
    GetBulkSecret {
        store_name: String,
        metadata: Metadata,
    },
    Shutdown,
}

/// Raw reply to a `RuntimeRequest`
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeReply {
    Data(Vec<u8>),
    Binding(BindingEvent),
    Secret(HashMap<String, String>),
    BulkSecret(HashMap<String, HashMap<String, String>>),
    Empty,
}

/// Transport for the non-state sidecar APIs
#[async_trait]
pub trait RuntimeTransport: Send + Sync {
    async fn call(
        &self,
        request: RuntimeRequest,
        headers: &CallHeaders,
    ) -> Result<RuntimeReply, BackendFault>;
}
