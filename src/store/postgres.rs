use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{Rows, RowStore, SampleQuery, StoreError};
use crate::db::{
    copy::copy_statement,
    models::{DigestMessageRecord, DigestMessageRow, OccupancySample},
};

#[derive(Debug, Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    /// `pool` must already be scoped to the layer via `search_path`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn read_samples(&self, query: &SampleQuery) -> Result<Vec<OccupancySample>, StoreError> {
        debug!(query = ?query, "Reading occupancy samples");

        let rows = match query {
            SampleQuery::Since { gym, since } => {
                sqlx::query_as::<_, OccupancySample>(
                    r#"
                    SELECT ts, online, gym_name
                    FROM occupancy_sample
                    WHERE gym_name = $1
                      AND ts >= $2
                    ORDER BY ts ASC
                    "#,
                )
                .bind(gym)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }

            SampleQuery::BeforeOrSince { gym, before, since } => {
                sqlx::query_as::<_, OccupancySample>(
                    r#"
                    SELECT ts, online, gym_name
                    FROM occupancy_sample
                    WHERE gym_name = $1
                      AND (ts < $2 OR ts >= $3)
                    ORDER BY ts ASC
                    "#,
                )
                .bind(gym)
                .bind(before)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }

            SampleQuery::Latest { gym } => {
                sqlx::query_as::<_, OccupancySample>(
                    r#"
                    SELECT ts, online, gym_name
                    FROM occupancy_sample
                    WHERE gym_name = $1
                    ORDER BY ts DESC
                    LIMIT 1
                    "#,
                )
                .bind(gym)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    async fn latest_digest_record(&self) -> Result<Option<DigestMessageRecord>, StoreError> {
        let row = sqlx::query_as::<_, DigestMessageRow>(
            r#"
            SELECT datetime, chat_message_id::text AS chat_message_id, message
            FROM digest_message_record
            ORDER BY datetime DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DigestMessageRecord::try_from).transpose()?)
    }

    async fn write_batch(&self, rows: Rows<'_>) -> Result<u64, StoreError> {
        let table = rows.table();
        let payload = rows.encode();

        let mut tx = self.pool.begin().await?;

        let copied = async {
            let mut copy = tx.copy_in_raw(&copy_statement(table)).await?;
            copy.send(payload.as_bytes()).await?;
            copy.finish().await
        }
        .await;

        match copied {
            Ok(n) => {
                tx.commit().await?;
                Ok(n)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(table = %table, error = %rollback, "Rollback failed; connection dropped");
                }
                Err(e.into())
            }
        }
    }
}
