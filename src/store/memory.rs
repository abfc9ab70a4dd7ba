//! In-process `RowStore` with failure injection, for exercising the
//! pipelines without a database.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{Rows, RowStore, SampleQuery, StoreError};
use crate::db::models::{DigestMessageRecord, OccupancySample};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    samples: Vec<OccupancySample>,
    digests: Vec<DigestMessageRecord>,
    /// Fail a write once this many rows of it have been staged.
    fail_write_after: Option<usize>,
    /// Fail this many upcoming `latest_digest_record` calls.
    failing_lookups: u32,
    lookups: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(samples: Vec<OccupancySample>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().samples = samples;
        store
    }

    pub fn fail_write_after(&self, rows: usize) {
        self.inner.lock().unwrap().fail_write_after = Some(rows);
    }

    pub fn fail_lookups(&self, times: u32) {
        self.inner.lock().unwrap().failing_lookups = times;
    }

    pub fn push_digest(&self, record: DigestMessageRecord) {
        self.inner.lock().unwrap().digests.push(record);
    }

    pub fn samples(&self) -> Vec<OccupancySample> {
        self.inner.lock().unwrap().samples.clone()
    }

    pub fn digests(&self) -> Vec<DigestMessageRecord> {
        self.inner.lock().unwrap().digests.clone()
    }

    pub fn lookups(&self) -> u32 {
        self.inner.lock().unwrap().lookups
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn read_samples(&self, query: &SampleQuery) -> Result<Vec<OccupancySample>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .samples
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.ts);
        if let SampleQuery::Latest { .. } = query {
            rows = rows.pop().into_iter().collect();
        }
        Ok(rows)
    }

    async fn latest_digest_record(&self) -> Result<Option<DigestMessageRecord>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookups += 1;
        if inner.failing_lookups > 0 {
            inner.failing_lookups -= 1;
            return Err(StoreError::Injected("lookup".into()));
        }
        Ok(inner.digests.iter().max_by_key(|r| r.datetime).cloned())
    }

    async fn write_batch(&self, rows: Rows<'_>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let limit = inner.fail_write_after;

        // Stage first; only a fully staged batch becomes visible.
        let mut staged_samples = Vec::new();
        let mut staged_digests = Vec::new();
        for i in 0..rows.len() {
            if limit == Some(i) {
                return Err(StoreError::Injected(format!("write failed at row {i}")));
            }
            match rows {
                Rows::Samples(r) => staged_samples.push(r[i].clone()),
                Rows::Digests(r) => staged_digests.push(r[i].clone()),
            }
        }

        inner.samples.extend(staged_samples);
        inner.digests.extend(staged_digests);
        Ok(rows.len() as u64)
    }
}
