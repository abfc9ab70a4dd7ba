pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::db::{
    copy::{encode_rows, CopyRow},
    models::{DigestMessageRecord, OccupancySample, Table},
};

pub use postgres::PgRowStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt chat_message_id in digest record: {0}")]
    Decode(#[from] serde_json::Error),

    #[cfg(test)]
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Which samples a read returns. Every variant is scoped to one gym and
/// results come back ordered by `ts` ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleQuery {
    /// `ts >= since`.
    Since { gym: String, since: NaiveDateTime },
    /// `ts < before OR ts >= since`.
    BeforeOrSince {
        gym: String,
        before: NaiveDateTime,
        since: NaiveDateTime,
    },
    /// The single most recent sample.
    Latest { gym: String },
}

impl SampleQuery {
    pub fn gym(&self) -> &str {
        match self {
            SampleQuery::Since { gym, .. }
            | SampleQuery::BeforeOrSince { gym, .. }
            | SampleQuery::Latest { gym } => gym,
        }
    }

    /// Row predicate for the range variants; `Latest` matches every row of
    /// the gym and is narrowed by the store.
    pub fn matches(&self, s: &OccupancySample) -> bool {
        if s.gym_name != self.gym() {
            return false;
        }
        match self {
            SampleQuery::Since { since, .. } => s.ts >= *since,
            SampleQuery::BeforeOrSince { before, since, .. } => s.ts < *before || s.ts >= *since,
            SampleQuery::Latest { .. } => true,
        }
    }
}

/// A batch destined for one table.
#[derive(Debug, Clone, Copy)]
pub enum Rows<'a> {
    Samples(&'a [OccupancySample]),
    Digests(&'a [DigestMessageRecord]),
}

impl Rows<'_> {
    pub fn table(&self) -> Table {
        match self {
            Rows::Samples(_) => OccupancySample::TABLE,
            Rows::Digests(_) => DigestMessageRecord::TABLE,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Rows::Samples(r) => r.len(),
            Rows::Digests(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// COPY text payload for the whole batch.
    pub fn encode(&self) -> String {
        match self {
            Rows::Samples(r) => encode_rows(r),
            Rows::Digests(r) => encode_rows(r),
        }
    }
}

/// The relational store both pipelines share.
///
/// Reads are single statements; `write_batch` is all-or-nothing.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn read_samples(&self, query: &SampleQuery) -> Result<Vec<OccupancySample>, StoreError>;

    /// Most recent digest record by `datetime`, if any.
    async fn latest_digest_record(&self) -> Result<Option<DigestMessageRecord>, StoreError>;

    /// Appends every row or none; returns the number of rows written.
    async fn write_batch(&self, rows: Rows<'_>) -> Result<u64, StoreError>;
}
