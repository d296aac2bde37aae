//! CLI commands

use anyhow::{bail, Context};
use cloudrt_core::{
    BulkStateItem, DeleteStateItem, ETag, Metadata, SetStateItem, StateConcurrency,
    StateConsistency, StateItem, StateOperation, StateOptions,
};
use cloudrt_state::{CallContext, StateClient};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A read result as printed on stdout
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ItemView {
    pub key: String,
    pub value: String,
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StateItem> for ItemView {
    fn from(item: StateItem) -> Self {
        Self {
            key: item.key,
            value: String::from_utf8_lossy(&item.value).into_owned(),
            etag: item.etag.map(ETag::into_inner),
            error: None,
        }
    }
}

impl From<BulkStateItem> for ItemView {
    fn from(item: BulkStateItem) -> Self {
        Self {
            key: item.key,
            value: String::from_utf8_lossy(&item.value).into_owned(),
            etag: item.etag.map(ETag::into_inner),
            error: item.error,
        }
    }
}

/// Outcome of a write command
#[derive(Debug, Serialize)]
pub struct WriteView {
    pub ok: bool,
    pub key: Option<String>,
    pub operations: Option<usize>,
}

/// One entry of a transaction file
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Upsert,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct OpSpec {
    pub op: OpKind,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
}

/// Options for a write: conditional when an etag is given or forced
fn write_options(etag: Option<&String>, first_write: bool) -> StateOptions {
    if first_write || etag.is_some() {
        StateOptions::default().with_concurrency(StateConcurrency::FirstWrite)
    } else {
        StateOptions::default()
    }
}

impl OpSpec {
    pub fn into_operation(self) -> anyhow::Result<StateOperation> {
        let options = write_options(self.etag.as_ref(), false);
        match self.op {
            OpKind::Upsert => {
                let Some(value) = self.value else {
                    bail!("upsert of {} has no value", self.key);
                };
                let mut item = SetStateItem::new(self.key, value.into_bytes()).with_options(options);
                item.etag = self.etag.map(ETag::from);
                Ok(StateOperation::upsert(item))
            }
            OpKind::Delete => {
                let mut item = DeleteStateItem::new(self.key).with_options(options);
                item.etag = self.etag.map(ETag::from);
                Ok(StateOperation::delete(item))
            }
        }
    }
}

/// Parse a JSON list of operations
pub fn parse_operations(json: &str) -> anyhow::Result<Vec<StateOperation>> {
    let specs: Vec<OpSpec> = serde_json::from_str(json).context("invalid transaction file")?;
    specs.into_iter().map(OpSpec::into_operation).collect()
}

pub fn load_operations(path: &Path) -> anyhow::Result<Vec<StateOperation>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_operations(&content)
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn get(
    client: &StateClient,
    ctx: &CallContext,
    store: &str,
    key: &str,
    consistency: Option<StateConsistency>,
) -> anyhow::Result<ItemView> {
    let item = match consistency {
        Some(consistency) => {
            client
                .get_state_with_consistency(ctx, store, key, Metadata::new(), consistency)
                .await?
        }
        None => client.get_state(ctx, store, key).await?,
    };
    Ok(item.into())
}

pub async fn save(
    client: &StateClient,
    ctx: &CallContext,
    store: &str,
    key: &str,
    value: String,
    etag: Option<String>,
    first_write: bool,
) -> anyhow::Result<WriteView> {
    let mut item = SetStateItem::new(key, value.into_bytes())
        .with_options(write_options(etag.as_ref(), first_write));
    item.etag = etag.map(ETag::from);

    client.save_bulk_state(ctx, store, vec![item]).await?;
    Ok(WriteView {
        ok: true,
        key: Some(key.to_string()),
        operations: None,
    })
}

pub async fn delete(
    client: &StateClient,
    ctx: &CallContext,
    store: &str,
    key: &str,
    etag: Option<String>,
) -> anyhow::Result<WriteView> {
    match etag {
        Some(etag) => {
            client
                .delete_state_with_etag(ctx, store, key, ETag::from(etag), Metadata::new(), None)
                .await?
        }
        None => client.delete_state(ctx, store, key).await?,
    }
    Ok(WriteView {
        ok: true,
        key: Some(key.to_string()),
        operations: None,
    })
}

pub async fn bulk_get(
    client: &StateClient,
    ctx: &CallContext,
    store: &str,
    keys: &[String],
    parallelism: i32,
) -> anyhow::Result<Vec<ItemView>> {
    let items = client
        .get_bulk_state(ctx, store, keys, Metadata::new(), parallelism)
        .await?;
    Ok(items.into_iter().map(ItemView::from).collect())
}

pub async fn transact(
    client: &StateClient,
    ctx: &CallContext,
    store: &str,
    path: &Path,
) -> anyhow::Result<WriteView> {
    let operations = load_operations(path)?;
    let count = operations.len();
    client
        .execute_state_transaction(ctx, store, Metadata::new(), operations)
        .await?;
    Ok(WriteView {
        ok: true,
        key: None,
        operations: Some(count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudrt_core::OperationType;
    use cloudrt_state::MemoryTransport;
    use std::sync::Arc;

    #[test]
    fn test_parse_operations() {
        let ops = parse_operations(
            r#"[
                {"op": "upsert", "key": "a", "value": "1"},
                {"op": "delete", "key": "b", "etag": "7"}
            ]"#,
        )
        .unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op_type, OperationType::Upsert);
        assert_eq!(ops[0].item.value, b"1");
        assert_eq!(ops[0].item.options.concurrency, StateConcurrency::LastWrite);
        assert_eq!(ops[1].op_type, OperationType::Delete);
        assert_eq!(ops[1].item.etag, Some(ETag::from("7")));
        assert_eq!(ops[1].item.options.concurrency, StateConcurrency::FirstWrite);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_operations(r#"[{"op": "upsert", "key": "a"}]"#).is_err());
        assert!(parse_operations(r#"[{"op": "merge", "key": "a"}]"#).is_err());
        assert!(parse_operations("not json").is_err());
    }

    #[tokio::test]
    async fn test_commands_against_memory_store() {
        let client = StateClient::new(Arc::new(MemoryTransport::new().with_store("s")));
        let ctx = CallContext::background();

        save(&client, &ctx, "s", "k", "hello".into(), None, true).await.unwrap();
        let view = get(&client, &ctx, "s", "k", None).await.unwrap();
        assert_eq!(view.value, "hello");

        // create-only write of an existing key
        assert!(save(&client, &ctx, "s", "k", "again".into(), None, true).await.is_err());

        let etag = view.etag.unwrap();
        assert!(delete(&client, &ctx, "s", "k", Some("stale".into())).await.is_err());
        delete(&client, &ctx, "s", "k", Some(etag)).await.unwrap();

        let views = bulk_get(&client, &ctx, "s", &["k".to_string()], 2).await.unwrap();
        assert_eq!(views[0].value, "");
        assert!(views[0].etag.is_none());
    }
}
