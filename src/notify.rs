use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::{
    db::models::{DigestMessageRecord, MessageRef, OccupancySample},
    loader::{LoadOutcome, Loader},
    store::{RowStore, Rows, StoreError},
    telegram::TelegramError,
};

/// Lookup-and-delete rounds before the previous digest is given up on.
pub const CLEANUP_ATTEMPTS: u32 = 6;

/// Outbound side of the channel.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TelegramError>;

    /// Sends images as one group; refs come back in send order.
    async fn send_photo_group(
        &self,
        chat_id: i64,
        photos: Vec<(Vec<u8>, Option<String>)>,
    ) -> Result<Vec<MessageRef>, TelegramError>;

    async fn delete_message(&self, target: MessageRef) -> Result<(), TelegramError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No earlier digest on record.
    NothingToClean,
    Deleted { attempts: u32 },
    Abandoned { attempts: u32, last_error: String },
}

#[derive(Debug, thiserror::Error)]
enum CleanupError {
    #[error("could not look up the previous digest: {0}")]
    Lookup(#[from] StoreError),

    #[error("could not delete message {target}: {source}")]
    Delete {
        target: MessageRef,
        #[source]
        source: TelegramError,
    },
}

/// What one notify cycle did.
#[derive(Debug)]
pub struct NotifyReport {
    pub cleanup: CleanupOutcome,
    pub record: DigestMessageRecord,
    pub persisted: LoadOutcome,
}

/// Header line of a digest for the focal gym's most recent sample.
pub fn compose_text(latest: Option<&OccupancySample>) -> String {
    match latest {
        Some(s) => {
            let count = s.online.map_or_else(|| "-".to_owned(), |v| v.to_string());
            format!("{} Онлайн gym [{count}]:", s.ts.format("%Y-%m-%d %H:%M"))
        }
        None => "нет данных Онлайн gym [нет данных]:".to_owned(),
    }
}

pub struct Notifier {
    store: Arc<dyn RowStore>,
    messenger: Arc<dyn Messenger>,
    loader: Loader,
    chat_id: i64,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn RowStore>,
        messenger: Arc<dyn Messenger>,
        loader: Loader,
        chat_id: i64,
    ) -> Self {
        Self { store, messenger, loader, chat_id }
    }

    /// Replaces the previous digest with a new one: clean up, send the text
    /// and the images, then record what was sent.
    ///
    /// Cleanup problems never stop the cycle. A send failure aborts it
    /// before anything is recorded.
    pub async fn notify(
        &self,
        latest: Option<&OccupancySample>,
        photos: Vec<(Vec<u8>, Option<String>)>,
        now: NaiveDateTime,
    ) -> Result<NotifyReport, TelegramError> {
        let cleanup = self.cleanup_previous().await;

        let text = compose_text(latest);
        let text_ref = self.messenger.send_text(self.chat_id, &text).await?;
        info!(message = %text_ref, "Digest text sent");

        let photo_refs = self.messenger.send_photo_group(self.chat_id, photos).await?;
        info!(photos = photo_refs.len(), "Digest images sent");

        let mut refs = Vec::with_capacity(1 + photo_refs.len());
        refs.push(text_ref);
        refs.extend(photo_refs);

        let record = DigestMessageRecord {
            datetime: now,
            chat_message_id: refs,
            message: text,
        };
        let persisted = self.loader.load(Rows::Digests(std::slice::from_ref(&record))).await;

        Ok(NotifyReport { cleanup, record, persisted })
    }

    /// Deletes every message of the latest recorded digest, retrying the
    /// lookup and the remaining deletions up to [`CLEANUP_ATTEMPTS`] times.
    pub async fn cleanup_previous(&self) -> CleanupOutcome {
        let mut deleted = HashSet::new();
        let mut last_error = String::new();

        for attempt in 1..=CLEANUP_ATTEMPTS {
            match self.try_cleanup(&mut deleted).await {
                Ok(false) => {
                    info!("No previous digest to clean up");
                    return CleanupOutcome::NothingToClean;
                }
                Ok(true) => {
                    info!(attempts = attempt, deleted = deleted.len(), "Previous digest deleted");
                    return CleanupOutcome::Deleted { attempts: attempt };
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Cleanup attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        error!(
            attempts = CLEANUP_ATTEMPTS,
            last_error = %last_error,
            "Giving up on deleting the previous digest"
        );
        CleanupOutcome::Abandoned { attempts: CLEANUP_ATTEMPTS, last_error }
    }

    /// `Ok(false)` when there is nothing to delete.
    async fn try_cleanup(&self, deleted: &mut HashSet<MessageRef>) -> Result<bool, CleanupError> {
        let Some(record) = self.store.latest_digest_record().await? else {
            return Ok(false);
        };
        if record.chat_message_id.is_empty() {
            return Ok(false);
        }

        for target in record.chat_message_id {
            if deleted.contains(&target) {
                continue;
            }
            self.messenger
                .delete_message(target)
                .await
                .map_err(|source| CleanupError::Delete { target, source })?;
            deleted.insert(target);
        }
        Ok(true)
    }
}
