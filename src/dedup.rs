//! The table of event uuids we have already claimed.
//!
//! Each row is written with a conditional put, so at most one writer can ever
//! claim a given uuid. The loser learns about it through
//! [`InsertOutcome::AlreadyExists`] rather than through an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Partition key attribute of the dedup table.
pub const KEY_ATTRIBUTE: &str = "event_uuid";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DedupRecord {
    pub event_uuid: String,

    /// RFC 3339 time at which the row was written. Rows written by older
    /// deployments carry only the key, so this may be empty.
    #[serde(default)]
    pub processed_at: String,

    /// Primary-path key the row guards; empty on older rows.
    #[serde(default)]
    pub object_key: String,
}

impl DedupRecord {
    pub fn new<U: Into<String>, K: Into<String>>(event_uuid: U, object_key: K) -> Self {
        DedupRecord {
            event_uuid: event_uuid.into(),
            processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            object_key: object_key.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[async_trait]
pub trait DedupTable: Send + Sync {
    async fn get_item(&self, event_uuid: &str) -> Result<Option<DedupRecord>>;

    /// Insert `record` unless a row with the same uuid exists, atomically.
    async fn put_item_if_absent(&self, record: &DedupRecord) -> Result<InsertOutcome>;
}

#[derive(Clone, Debug)]
pub struct DynamoDedupTable {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoDedupTable {
    pub fn new<S: Into<String>>(client: aws_sdk_dynamodb::Client, table_name: S) -> Self {
        DynamoDedupTable {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl DedupTable for DynamoDedupTable {
    async fn get_item(&self, event_uuid: &str) -> Result<Option<DedupRecord>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(KEY_ATTRIBUTE, AttributeValue::S(event_uuid.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .with_context(|| format!("DynamoDB GetItem `{event_uuid}` in {}", self.table_name))?;

        match result.item {
            Some(item) => Ok(Some(serde_dynamo::from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn put_item_if_absent(&self, record: &DedupRecord) -> Result<InsertOutcome> {
        let item = serde_dynamo::to_item(record)?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#k)")
            .expression_attribute_names("#k", KEY_ATTRIBUTE)
            .send()
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),

            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Ok(InsertOutcome::AlreadyExists)
            }

            Err(e) => Err(e).with_context(|| {
                format!(
                    "DynamoDB conditional PutItem `{}` in {}",
                    record.event_uuid, self.table_name
                )
            }),
        }
    }
}
