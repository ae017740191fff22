// src/kyc/store.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};
use tracing::{debug, instrument};
use url::Url;

use super::types::{KycRecord, KycResult};

/// Downstream owner of KYC records.
///
/// `insert` receives the full deduplicated batch of a run. Re-submitting
/// records that are already stored must be safe.
#[async_trait]
pub trait KycStore: Send + Sync {
    async fn insert(&self, records: HashSet<KycRecord>) -> Result<()>;

    /// Answer a lookup for one address, if this store can.
    async fn result_for(&self, _address: &str) -> Option<KycResult> {
        None
    }
}

/// Store that POSTs each batch as a JSON array.
pub struct HttpKycStore {
    client: Client,
    endpoint: Url,
}

impl HttpKycStore {
    pub fn new(client: Client, endpoint: &str) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("parsing KYC store URL {}", endpoint))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl KycStore for HttpKycStore {
    #[instrument(level = "debug", skip_all, fields(records = records.len()))]
    async fn insert(&self, records: HashSet<KycRecord>) -> Result<()> {
        let body: Vec<KycRecord> = records.into_iter().collect();
        self.client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("KYC store rejected batch at {}", self.endpoint))?;
        debug!("batch accepted");
        Ok(())
    }
}

/// In-process store keyed by address; the latest submission wins.
///
/// Within one batch, records sharing an address resolve to the greatest
/// `(status, referred_by)` pair. Records without an address are not stored.
#[derive(Default)]
pub struct MemoryKycStore {
    records: Mutex<HashMap<String, KycRecord>>,
    unaddressed: AtomicU64,
}

fn batch_rank(record: &KycRecord) -> (Option<&str>, Option<&str>) {
    (record.status.as_deref(), record.referred_by.as_deref())
}

impl MemoryKycStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, address: &str) -> Option<KycRecord> {
        let records = self.records.lock().ok()?;
        records.get(address).cloned()
    }

    /// Records dropped so far for lacking an address.
    pub fn unaddressed(&self) -> u64 {
        self.unaddressed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KycStore for MemoryKycStore {
    async fn insert(&self, records: HashSet<KycRecord>) -> Result<()> {
        let mut batch: HashMap<String, KycRecord> = HashMap::with_capacity(records.len());
        let mut unaddressed = 0u64;
        for record in records {
            let Some(address) = record.address.clone() else {
                unaddressed += 1;
                continue;
            };
            let replace = batch
                .get(&address)
                .map_or(true, |kept| batch_rank(kept) < batch_rank(&record));
            if replace {
                batch.insert(address, record);
            }
        }
        if unaddressed > 0 {
            debug!(unaddressed, "skipping records without an address");
            self.unaddressed.fetch_add(unaddressed, Ordering::Relaxed);
        }

        let mut stored = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        stored.extend(batch);
        Ok(())
    }

    async fn result_for(&self, address: &str) -> Option<KycResult> {
        let stored = self.records.lock().ok()?;
        let record = stored.get(address)?;
        let referral_count = stored
            .values()
            .filter(|r| r.referred_by.as_deref() == Some(address))
            .count() as u64;
        Some(KycResult::from_record(address, record, referral_count))
    }
}
