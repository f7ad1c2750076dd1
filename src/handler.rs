//! The ingestion handler: decode, enrich, dedup, write.
//!
//! Records in a batch are handled one after another. Every failure stays local
//! to its record; it is logged, noted in the [`BatchReport`], and the batch
//! carries on. Nothing is retried here and nothing is dead-lettered.
//!
//! Overlapping invocations can see the same `event_uuid` at the same time
//! (Kinesis delivers at least once). With [`DedupPolicy::ConditionalInsert`]
//! the uuid is claimed in the dedup table before anything is written, so only
//! one of them ever writes the primary object; the others go to the duplicate
//! folder. The remaining policies check first and write second, and can let
//! two primary writes through if they race.

use lambda_runtime::tracing;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    config::{DedupPolicy, Settings},
    dedup::{DedupRecord, DedupTable, InsertOutcome},
    envelope::{KinesisBatch, KinesisRecord},
    error::ProcessingError,
    event::{EnrichedEvent, StorageKey},
    store::ObjectStore,
};

/// Which folder a record ended up in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Primary,
    Duplicate,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Placement {
    pub destination: Destination,
    pub key: StorageKey,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecordFailure {
    pub index: usize,
    pub record_id: Option<String>,
    pub event_uuid: Option<String>,
    pub kind: &'static str,
    pub message: String,
}

/// Summary of one invocation, returned to the caller.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub primary: usize,
    pub duplicates: usize,
    pub failures: Vec<RecordFailure>,
}

pub struct IngestHandler {
    settings: Settings,
    store: Arc<dyn ObjectStore>,
    table: Arc<dyn DedupTable>,
}

impl IngestHandler {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ObjectStore>,
        table: Arc<dyn DedupTable>,
    ) -> Self {
        IngestHandler {
            settings,
            store,
            table,
        }
    }

    /// Process every record in delivery order. Never fails: per-record errors
    /// are logged and collected into the report.
    pub async fn process_batch(&self, batch: &KinesisBatch) -> BatchReport {
        let mut report = BatchReport {
            received: batch.records.len(),
            ..Default::default()
        };

        for (index, record) in batch.records.iter().enumerate() {
            match self.process_one(record).await {
                Ok(placement) => match placement.destination {
                    Destination::Primary => report.primary += 1,
                    Destination::Duplicate => report.duplicates += 1,
                },

                Err(e) => {
                    tracing::error!(
                        index,
                        record_id = record.record_id().unwrap_or("-"),
                        event_uuid = e.event_uuid().unwrap_or("-"),
                        error_kind = e.kind(),
                        "failed to process record: {e}"
                    );

                    report.failures.push(RecordFailure {
                        index,
                        record_id: record.record_id().map(str::to_owned),
                        event_uuid: e.event_uuid().map(str::to_owned),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            received = report.received,
            primary = report.primary,
            duplicates = report.duplicates,
            failed = report.failures.len(),
            "batch done"
        );

        report
    }

    pub async fn process_one(
        &self,
        record: &KinesisRecord,
    ) -> Result<Placement, ProcessingError> {
        let raw = record.decode(self.settings.encoding)?;
        let event = raw.enrich()?;
        let uuid = event.event_uuid();

        let body = event
            .to_json_bytes()
            .map_err(|e| ProcessingError::storage(uuid, e.into()))?;
        let primary = event.primary_key(&self.settings.key_prefix);

        let placement = match self.settings.policy {
            DedupPolicy::ConditionalInsert => self.write_claimed(&event, primary, body).await?,

            DedupPolicy::TableLookup => {
                let seen = self
                    .table
                    .get_item(uuid)
                    .await
                    .map_err(|e| ProcessingError::storage(uuid, e))?;

                if seen.is_some() {
                    self.write_duplicate(&event, body).await?
                } else {
                    let placement = self.write(uuid, Destination::Primary, primary, body).await?;

                    // Another writer may have recorded it meanwhile; the object
                    // is already written, so the outcome doesn't change anything.
                    let recorded = self
                        .table
                        .put_item_if_absent(&DedupRecord::new(uuid, placement.key.as_str()))
                        .await;

                    if let Err(e) = recorded {
                        tracing::warn!(
                            event_uuid = uuid,
                            key = placement.key.as_str(),
                            "event stored but not recorded in dedup table: {e:#}"
                        );
                    }

                    placement
                }
            }

            DedupPolicy::ExistenceProbe => {
                let exists = self
                    .store
                    .exists(&self.settings.bucket, primary.as_str())
                    .await
                    .map_err(|e| ProcessingError::storage(uuid, e))?;

                if exists {
                    self.write_duplicate(&event, body).await?
                } else {
                    self.write(uuid, Destination::Primary, primary, body).await?
                }
            }

            DedupPolicy::PrefixListing => {
                let keys = self
                    .store
                    .list(
                        &self.settings.bucket,
                        &event.primary_listing_prefix(&self.settings.key_prefix),
                    )
                    .await
                    .map_err(|e| ProcessingError::storage(uuid, e))?;

                if keys.iter().any(|k| k == primary.as_str()) {
                    self.write_duplicate(&event, body).await?
                } else {
                    self.write(uuid, Destination::Primary, primary, body).await?
                }
            }
        };

        Ok(placement)
    }

    /// Claim the uuid, then write to whichever folder the claim tells us to.
    ///
    /// Primary writes on this path are themselves conditional, so the primary
    /// object is written at most once even when a claim has to be resumed.
    async fn write_claimed(
        &self,
        event: &EnrichedEvent,
        primary: StorageKey,
        body: Vec<u8>,
    ) -> Result<Placement, ProcessingError> {
        let uuid = event.event_uuid();
        let claim = DedupRecord::new(uuid, primary.as_str());

        let outcome = self
            .table
            .put_item_if_absent(&claim)
            .await
            .map_err(|e| ProcessingError::storage(uuid, e))?;

        match outcome {
            InsertOutcome::Inserted => self.write_primary_once(event, primary, body).await,

            InsertOutcome::AlreadyExists => {
                if self.claim_left_unwritten(uuid, &primary).await? {
                    tracing::info!(
                        event_uuid = uuid,
                        key = primary.as_str(),
                        "resuming claimed but unwritten primary object"
                    );
                    self.write_primary_once(event, primary, body).await
                } else {
                    tracing::debug!(event_uuid = uuid, "uuid already claimed");
                    self.write_duplicate(event, body).await
                }
            }
        }
    }

    /// Did an earlier claim for this exact primary key fail before its object
    /// landed? Rows from older deployments name no key and count as written.
    async fn claim_left_unwritten(
        &self,
        uuid: &str,
        primary: &StorageKey,
    ) -> Result<bool, ProcessingError> {
        let row = self
            .table
            .get_item(uuid)
            .await
            .map_err(|e| ProcessingError::storage(uuid, e))?;

        match row {
            Some(row) if row.object_key == primary.as_str() => {
                let exists = self
                    .store
                    .exists(&self.settings.bucket, primary.as_str())
                    .await
                    .map_err(|e| ProcessingError::storage(uuid, e))?;
                Ok(!exists)
            }

            _ => Ok(false),
        }
    }

    /// Create the primary object unless one exists; if it does, this copy is a
    /// duplicate.
    async fn write_primary_once(
        &self,
        event: &EnrichedEvent,
        primary: StorageKey,
        body: Vec<u8>,
    ) -> Result<Placement, ProcessingError> {
        let uuid = event.event_uuid();

        let outcome = self
            .store
            .put_if_absent(&self.settings.bucket, primary.as_str(), body.clone())
            .await
            .map_err(|e| ProcessingError::storage(uuid, e))?;

        match outcome {
            InsertOutcome::Inserted => {
                tracing::info!(
                    event_uuid = uuid,
                    key = primary.as_str(),
                    destination = ?Destination::Primary,
                    "event stored"
                );
                Ok(Placement {
                    destination: Destination::Primary,
                    key: primary,
                })
            }

            InsertOutcome::AlreadyExists => self.write_duplicate(event, body).await,
        }
    }

    async fn write_duplicate(
        &self,
        event: &EnrichedEvent,
        body: Vec<u8>,
    ) -> Result<Placement, ProcessingError> {
        let key = event.duplicate_key(&self.settings.duplicate_folder);
        self.write(event.event_uuid(), Destination::Duplicate, key, body)
            .await
    }

    async fn write(
        &self,
        uuid: &str,
        destination: Destination,
        key: StorageKey,
        body: Vec<u8>,
    ) -> Result<Placement, ProcessingError> {
        self.store
            .put(&self.settings.bucket, key.as_str(), body)
            .await
            .map_err(|e| ProcessingError::storage(uuid, e))?;

        tracing::info!(
            event_uuid = uuid,
            key = key.as_str(),
            destination = ?destination,
            "event stored"
        );

        Ok(Placement { destination, key })
    }
}
