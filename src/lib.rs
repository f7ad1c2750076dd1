//! Kinesis → S3 event ingestion Lambda.
//!
//! Each invocation receives a batch of Kinesis records whose payloads are
//! base64-encoded JSON events. Every event gets three derived fields
//! (`created_datetime`, `event_type`, `event_subtype`) and is stored in S3 at
//! `<prefix>/<type>/<subtype>/<uuid>.json`. If the uuid has been seen before,
//! it goes to `duplicated/<uuid>.json` instead and the original object is left
//! alone.
//!
//! This library is compiled into two executables: the Lambda function itself
//! (`event-ingest-lambda`) and `event-ingest-lambda-oneshot`, which processes
//! one batch given on the command line and is handy for local testing.
//!
//! Bad records never fail the invocation. A failed invocation makes Kinesis
//! redeliver the whole batch, which would just fail again on the same record,
//! so we log and move on.

use lambda_runtime::{tracing, Error};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use envelope::KinesisBatch;
pub use handler::{BatchReport, IngestHandler};

pub struct Services {
    handler: IngestHandler,
}

impl Services {
    /// Set up logging, read the settings and construct the AWS clients.
    pub async fn init() -> Result<Self, Error> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false) // don't print the module name
            .without_time() // don't print time (CloudWatch has it)
            .init();

        let settings = Settings::from_env()?;
        tracing::info!(
            bucket = %settings.bucket,
            policy = ?settings.policy,
            encoding = ?settings.encoding,
            "ingest settings loaded"
        );

        let config = aws_config::load_from_env().await;
        let s3c = aws_sdk_s3::Client::new(&config);
        let dc = aws_sdk_dynamodb::Client::new(&config);
        let table_name = settings.table_name.clone();

        Ok(Services {
            handler: IngestHandler::new(
                settings,
                Arc::new(store::S3ObjectStore::new(s3c)),
                Arc::new(dedup::DynamoDedupTable::new(dc, table_name)),
            ),
        })
    }

    /// Build services around an already-constructed handler.
    pub fn with_handler(handler: IngestHandler) -> Self {
        Services { handler }
    }

    /// Handle one Kinesis invocation.
    pub async fn dispatch(&self, batch: KinesisBatch) -> BatchReport {
        if batch.records.is_empty() {
            tracing::warn!("no records in Kinesis event");
        }

        self.handler.process_batch(&batch).await
    }
}
