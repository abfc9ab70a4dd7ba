use std::sync::Arc;

use tracing::{debug, error, info};

use crate::store::{RowStore, Rows};

/// Result of one bulk append. A rollback is reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Committed { rows: u64 },
    RolledBack { error: String },
}

impl LoadOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, LoadOutcome::Committed { .. })
    }
}

/// Writes batches into the row store under one transaction per call.
#[derive(Clone)]
pub struct Loader {
    store: Arc<dyn RowStore>,
    layer: String,
}

impl Loader {
    pub fn new(store: Arc<dyn RowStore>, layer: impl Into<String>) -> Self {
        Self { store, layer: layer.into() }
    }

    pub async fn load(&self, rows: Rows<'_>) -> LoadOutcome {
        let table = rows.table();
        if rows.is_empty() {
            debug!(layer = %self.layer, table = %table, "Empty batch; nothing to load");
            return LoadOutcome::Committed { rows: 0 };
        }
        match self.store.write_batch(rows).await {
            Ok(n) => {
                info!(layer = %self.layer, table = %table, rows = n, "Batch loaded");
                LoadOutcome::Committed { rows: n }
            }
            Err(e) => {
                error!(
                    layer = %self.layer,
                    table = %table,
                    rows = rows.len(),
                    error = %e,
                    "Batch rolled back; nothing was loaded"
                );
                LoadOutcome::RolledBack { error: e.to_string() }
            }
        }
    }
}
