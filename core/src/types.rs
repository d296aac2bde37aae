//! State data model for cloud-runtimes
//!
//! Value envelopes returned by reads, write/delete intents, and the
//! concurrency and consistency policy attached to them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Opaque backend-specific hints passed through with every request
pub type Metadata = HashMap<String, String>;

/// Version token produced by the backend on write
///
/// Compared by exact string equality. "No known version" is expressed as
/// `Option<ETag>::None`, never as an empty token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(String);

impl ETag {
    pub fn new(value: impl Into<String>) -> Self {
        ETag(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        ETag(value.to_string())
    }
}

impl From<String> for ETag {
    fn from(value: String) -> Self {
        ETag(value)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ETag({:?})", self.0)
    }
}

/// Write concurrency policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateConcurrency {
    #[default]
    Unspecified,
    /// The supplied etag must match the current version
    FirstWrite,
    /// Always overwrite
    LastWrite,
}

impl StateConcurrency {
    /// Resolve `Unspecified` to the policy a backend applies
    pub fn effective(self) -> Self {
        match self {
            StateConcurrency::Unspecified => StateConcurrency::LastWrite,
            other => other,
        }
    }

    /// Whether writes under this policy are conditional on the etag
    pub fn checks_etag(self) -> bool {
        self.effective() == StateConcurrency::FirstWrite
    }
}

/// Read consistency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateConsistency {
    #[default]
    Unspecified,
    /// A replica read that may lag behind the latest write
    Eventual,
    /// The most recent committed value, or a failure
    Strong,
}

impl StateConsistency {
    /// Resolve `Unspecified` to the level a backend applies
    pub fn effective(self) -> Self {
        match self {
            StateConsistency::Unspecified => StateConsistency::Eventual,
            other => other,
        }
    }
}

impl fmt::Display for StateConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateConsistency::Unspecified => "unspecified",
            StateConsistency::Eventual => "eventual",
            StateConsistency::Strong => "strong",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for StateConsistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" | "" => Ok(StateConsistency::Unspecified),
            "eventual" => Ok(StateConsistency::Eventual),
            "strong" => Ok(StateConsistency::Strong),
            other => Err(format!("unknown consistency level: {}", other)),
        }
    }
}

/// Persistence policy attached to a read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOptions {
    pub concurrency: StateConcurrency,
    pub consistency: StateConsistency,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            concurrency: StateConcurrency::LastWrite,
            consistency: StateConsistency::Eventual,
        }
    }
}

impl StateOptions {
    pub fn new(concurrency: StateConcurrency, consistency: StateConsistency) -> Self {
        Self {
            concurrency,
            consistency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: StateConcurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_consistency(mut self, consistency: StateConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Apply a single modifier, returning the modified copy
    pub fn apply(self, option: StateOption) -> Self {
        match option {
            StateOption::Concurrency(c) => self.with_concurrency(c),
            StateOption::Consistency(c) => self.with_consistency(c),
        }
    }

    /// Fold modifiers over the default baseline. Last applied wins per field.
    pub fn from_modifiers<I>(options: I) -> Self
    where
        I: IntoIterator<Item = StateOption>,
    {
        options
            .into_iter()
            .fold(StateOptions::default(), StateOptions::apply)
    }
}

/// A single option modifier for `StateOptions`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOption {
    Concurrency(StateConcurrency),
    Consistency(StateConsistency),
}

impl StateOption {
    pub fn first_write() -> Self {
        StateOption::Concurrency(StateConcurrency::FirstWrite)
    }

    pub fn last_write() -> Self {
        StateOption::Concurrency(StateConcurrency::LastWrite)
    }

    pub fn strong() -> Self {
        StateOption::Consistency(StateConsistency::Strong)
    }

    pub fn eventual() -> Self {
        StateOption::Consistency(StateConsistency::Eventual)
    }
}

/// A stored record as returned by a read
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateItem {
    pub key: String,
    pub value: Vec<u8>,
    pub etag: Option<ETag>,
    pub metadata: Metadata,
}

impl StateItem {
    /// The item returned for a key the store does not hold
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.etag.is_none()
    }
}

/// A bulk read result; each key succeeds or fails on its own
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkStateItem {
    pub key: String,
    pub value: Vec<u8>,
    pub etag: Option<ETag>,
    pub metadata: Metadata,
    pub error: Option<String>,
}

impl BulkStateItem {
    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<StateItem> for BulkStateItem {
    fn from(item: StateItem) -> Self {
        Self {
            key: item.key,
            value: item.value,
            etag: item.etag,
            metadata: item.metadata,
            error: None,
        }
    }
}

/// A write intent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetStateItem {
    pub key: String,
    pub value: Vec<u8>,
    pub etag: Option<ETag>,
    pub metadata: Metadata,
    pub options: StateOptions,
}

impl SetStateItem {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_etag(mut self, etag: impl Into<ETag>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_options(mut self, options: StateOptions) -> Self {
        self.options = options;
        self
    }
}

/// A delete intent, conditional when `etag` is set under `FirstWrite`
///
/// Unlike `SetStateItem` it has no `value`; a delete step of a transaction
/// is sent with an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteStateItem {
    pub key: String,
    pub etag: Option<ETag>,
    pub metadata: Metadata,
    pub options: StateOptions,
}

impl DeleteStateItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_etag(mut self, etag: impl Into<ETag>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_options(mut self, options: StateOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<SetStateItem> for DeleteStateItem {
    fn from(item: SetStateItem) -> Self {
        Self {
            key: item.key,
            etag: item.etag,
            metadata: item.metadata,
            options: item.options,
        }
    }
}

/// Kind of a transaction step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Upsert,
    Delete,
}

/// One step of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOperation {
    pub op_type: OperationType,
    pub item: SetStateItem,
}

impl StateOperation {
    pub fn upsert(item: SetStateItem) -> Self {
        Self {
            op_type: OperationType::Upsert,
            item,
        }
    }

    pub fn delete(item: impl Into<SetStateItem>) -> Self {
        Self {
            op_type: OperationType::Delete,
            item: item.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.item.key
    }
}

impl From<DeleteStateItem> for SetStateItem {
    fn from(item: DeleteStateItem) -> Self {
        Self {
            key: item.key,
            value: Vec::new(),
            etag: item.etag,
            metadata: item.metadata,
            options: item.options,
        }
    }
}

/// Per-item outcome of an independent bulk write or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteResult {
    pub key: String,
    pub error: Option<String>,
}

impl BulkWriteResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_item_has_no_value() {
        let item = DeleteStateItem::new("k").with_etag("3");
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("value").is_none());

        let op = StateOperation::delete(item);
        assert_eq!(op.op_type, OperationType::Delete);
        assert!(op.item.value.is_empty());
        assert_eq!(op.item.etag, Some(ETag::from("3")));
    }

    #[test]
    fn test_default_options() {
        let opts = StateOptions::default();
        assert_eq!(opts.concurrency, StateConcurrency::LastWrite);
        assert_eq!(opts.consistency, StateConsistency::Eventual);
    }

    #[test]
    fn test_modifiers_last_applied_wins() {
        let opts = StateOptions::from_modifiers([
            StateOption::first_write(),
            StateOption::strong(),
            StateOption::last_write(),
        ]);
        assert_eq!(opts.concurrency, StateConcurrency::LastWrite);
        assert_eq!(opts.consistency, StateConsistency::Strong);

        assert_eq!(StateOptions::from_modifiers([]), StateOptions::default());
    }

    #[test]
    fn test_unspecified_resolution() {
        assert_eq!(StateConcurrency::Unspecified.effective(), StateConcurrency::LastWrite);
        assert!(!StateConcurrency::Unspecified.checks_etag());
        assert!(StateConcurrency::FirstWrite.checks_etag());
        assert_eq!(StateConsistency::Unspecified.effective(), StateConsistency::Eventual);
    }

    #[test]
    fn test_consistency_parse() {
        assert_eq!("Strong".parse::<StateConsistency>(), Ok(StateConsistency::Strong));
        assert_eq!("eventual".parse::<StateConsistency>(), Ok(StateConsistency::Eventual));
        assert!("linearizable".parse::<StateConsistency>().is_err());
    }

    #[test]
    fn test_empty_item() {
        let item = StateItem::empty("missing");
        assert_eq!(item.key, "missing");
        assert!(item.is_empty());

        let stored = StateItem {
            key: "k".into(),
            value: b"v".to_vec(),
            etag: Some(ETag::new("1")),
            metadata: Metadata::new(),
        };
        assert!(!stored.is_empty());
    }

    #[test]
    fn test_delete_op_keeps_etag() {
        let op = StateOperation::delete(DeleteStateItem::new("k").with_etag("7"));
        assert_eq!(op.op_type, OperationType::Delete);
        assert_eq!(op.key(), "k");
        assert_eq!(op.item.etag, Some(ETag::new("7")));
        assert!(op.item.value.is_empty());
    }
}
