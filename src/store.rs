//! The object store where enriched events land.
//!
//! The handler only talks to the [`ObjectStore`] trait so that tests can swap
//! in an in-memory store. [`S3ObjectStore`] is the real thing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{error::ProvideErrorMetadata, primitives::ByteStream};

use crate::dedup::InsertOutcome;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `key`, replacing anything already there.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Store `body` at `key` only if nothing is there yet, atomically.
    async fn put_if_absent(&self, bucket: &str, key: &str, body: Vec<u8>)
        -> Result<InsertOutcome>;

    /// Is there an object at exactly `key`?
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        S3ObjectStore { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("S3 PutObject s3://{bucket}/{key}"))?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<InsertOutcome> {
        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),

            // 412: an object already sits at this key.
            Err(e)
                if e.raw_response().is_some_and(|r| r.status().as_u16() == 412)
                    || e.as_service_error().and_then(|se| se.code())
                        == Some("PreconditionFailed") =>
            {
                Ok(InsertOutcome::AlreadyExists)
            }

            Err(e) => {
                Err(e).with_context(|| format!("S3 conditional PutObject s3://{bucket}/{key}"))
            }
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),

            // HeadObject has no body, so a 404 comes back as a bare NotFound.
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),

            Err(e) => Err(e).with_context(|| format!("S3 HeadObject s3://{bucket}/{key}")),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();

        while let Some(page) = pages.next().await {
            let page =
                page.with_context(|| format!("S3 ListObjectsV2 s3://{bucket}/{prefix}"))?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_owned)));
        }

        Ok(keys)
    }
}
