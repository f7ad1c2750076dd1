//! Runtime settings, read from the Lambda environment once per process.

use anyhow::{anyhow, bail, Result};
use std::str::FromStr;

pub const BUCKET_VAR: &str = "INGEST_BUCKET";
pub const POLICY_VAR: &str = "INGEST_DEDUP_POLICY";
pub const KEY_PREFIX_VAR: &str = "INGEST_KEY_PREFIX";
pub const DUPLICATE_FOLDER_VAR: &str = "INGEST_DUPLICATE_FOLDER";
pub const TABLE_VAR: &str = "INGEST_DEDUP_TABLE";
pub const ENCODING_VAR: &str = "INGEST_PAYLOAD_ENCODING";

/// How the handler decides whether an event already has a primary object.
///
/// Only `ConditionalInsert` guarantees a single primary write per uuid when
/// invocations overlap. The other variants reproduce older check-then-write
/// deployments and share their race window.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DedupPolicy {
    #[default]
    ConditionalInsert,
    TableLookup,
    ExistenceProbe,
    PrefixListing,
}

impl FromStr for DedupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "conditional-insert" => Ok(DedupPolicy::ConditionalInsert),
            "table-lookup" => Ok(DedupPolicy::TableLookup),
            "existence-probe" => Ok(DedupPolicy::ExistenceProbe),
            "prefix-listing" => Ok(DedupPolicy::PrefixListing),
            other => Err(anyhow!(
                "unknown dedup policy `{other}` (expected conditional-insert, table-lookup, \
                 existence-probe or prefix-listing)"
            )),
        }
    }
}

/// How `kinesis.data` is encoded in the incoming records.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PayloadEncoding {
    /// Base64 text wrapping JSON; what Kinesis actually delivers.
    #[default]
    Base64,

    /// JSON text or an inline JSON object; used for hand-built test events.
    Json,
}

impl FromStr for PayloadEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "base64" => Ok(PayloadEncoding::Base64),
            "json" => Ok(PayloadEncoding::Json),
            other => Err(anyhow!(
                "unknown payload encoding `{other}` (expected base64 or json)"
            )),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    pub bucket: String,
    pub policy: DedupPolicy,
    pub key_prefix: String,
    pub duplicate_folder: String,
    pub table_name: String,
    pub encoding: PayloadEncoding,
}

impl Settings {
    /// Settings with defaults for everything but the bucket.
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Settings {
            bucket: bucket.into(),
            policy: DedupPolicy::default(),
            key_prefix: "prefix".to_owned(),
            duplicate_folder: "duplicated".to_owned(),
            table_name: "processed_events".to_owned(),
            encoding: PayloadEncoding::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bucket = get(BUCKET_VAR)
            .ok_or_else(|| anyhow!("environment variable {BUCKET_VAR} must be set"))?;
        let mut settings = Settings::new(bucket.trim());

        if let Some(v) = get(POLICY_VAR) {
            settings.policy = v.trim().parse()?;
        }

        if let Some(v) = get(KEY_PREFIX_VAR) {
            settings.key_prefix = path_segment(KEY_PREFIX_VAR, &v)?;
        }

        if let Some(v) = get(DUPLICATE_FOLDER_VAR) {
            settings.duplicate_folder = path_segment(DUPLICATE_FOLDER_VAR, &v)?;
        }

        if let Some(v) = get(TABLE_VAR) {
            settings.table_name = v.trim().to_owned();
        }

        if let Some(v) = get(ENCODING_VAR) {
            settings.encoding = v.trim().parse()?;
        }

        Ok(settings)
    }
}

fn path_segment(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim().trim_matches('/');

    if trimmed.is_empty() {
        bail!("{name} must name a non-empty key prefix, got `{value}`");
    }

    Ok(trimmed.to_owned())
}
