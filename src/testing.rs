//! In-memory stand-ins for S3 and DynamoDB.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use crate::{
    dedup::{DedupRecord, DedupTable, InsertOutcome},
    store::ObjectStore,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    puts: Mutex<Vec<(String, String)>>,
    fail_puts: AtomicBool,
    lose_response: AtomicBool,
}

impl MemoryStore {
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// How many successful puts targeted this key.
    pub fn puts_to(&self, bucket: &str, key: &str) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, k)| b == bucket && k == key)
            .count()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make the next write land but report failure, like a timed-out response.
    pub fn lose_next_response(&self) {
        self.lose_response.store(true, Ordering::SeqCst);
    }

    fn store_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), key.to_owned()), body);
        self.record_put(bucket, key)
    }

    fn record_put(&self, bucket: &str, key: &str) -> Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((bucket.to_owned(), key.to_owned()));

        if self.lose_response.swap(false, Ordering::SeqCst) {
            bail!("simulated PutObject response timeout");
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        // let other tasks interleave, like a real round trip would
        tokio::task::yield_now().await;

        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("simulated PutObject failure");
        }

        self.store_object(bucket, key, body)
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<InsertOutcome> {
        tokio::task::yield_now().await;

        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("simulated PutObject failure");
        }

        {
            let mut objects = self.objects.lock().unwrap();
            let slot = (bucket.to_owned(), key.to_owned());

            if objects.contains_key(&slot) {
                return Ok(InsertOutcome::AlreadyExists);
            }

            objects.insert(slot, body);
        }

        self.record_put(bucket, key)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.get(bucket, key).is_some())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        tokio::task::yield_now().await;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<HashMap<String, DedupRecord>>,
    fail_inserts: AtomicBool,
}

impl MemoryTable {
    pub fn row(&self, event_uuid: &str) -> Option<DedupRecord> {
        self.rows.lock().unwrap().get(event_uuid).cloned()
    }

    /// A row as older deployments wrote them: the uuid and nothing else.
    pub fn insert_key_only(&self, event_uuid: &str) {
        self.rows.lock().unwrap().insert(
            event_uuid.to_owned(),
            DedupRecord {
                event_uuid: event_uuid.to_owned(),
                processed_at: String::new(),
                object_key: String::new(),
            },
        );
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DedupTable for MemoryTable {
    async fn get_item(&self, event_uuid: &str) -> Result<Option<DedupRecord>> {
        tokio::task::yield_now().await;
        Ok(self.row(event_uuid))
    }

    async fn put_item_if_absent(&self, record: &DedupRecord) -> Result<InsertOutcome> {
        tokio::task::yield_now().await;

        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("simulated PutItem failure");
        }

        let mut rows = self.rows.lock().unwrap();

        if rows.contains_key(&record.event_uuid) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        rows.insert(record.event_uuid.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }
}
