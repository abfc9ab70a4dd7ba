use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::{aggregate, render_heatmap, DigestView};
use crate::{
    config::DigestConfig,
    notify::{Notifier, NotifyReport},
    store::{RowStore, SampleQuery},
};

/// Shape of one rendered view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSummary {
    pub title: String,
    pub samples: usize,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug)]
pub struct DigestReport {
    pub views: Vec<ViewSummary>,
    pub notify: NotifyReport,
}

pub struct DigestService {
    store: Arc<dyn RowStore>,
    notifier: Notifier,
    focal_gym: String,
    views: Vec<DigestView>,
}

impl DigestService {
    pub fn new(store: Arc<dyn RowStore>, notifier: Notifier, config: &DigestConfig) -> Self {
        Self {
            store,
            notifier,
            focal_gym: config.focal_gym.clone(),
            views: DigestView::configured(config),
        }
    }

    /// One digest cycle at local time `now`: aggregate and render every view
    /// for the focal gym, then hand text and images to the notifier.
    pub async fn run_once(&self, now: NaiveDateTime) -> Result<DigestReport> {
        let gym = self.focal_gym.as_str();
        let mut photos = Vec::with_capacity(self.views.len());
        let mut views = Vec::with_capacity(self.views.len());

        for view in &self.views {
            let samples = self
                .store
                .read_samples(&view.window.query(gym, now))
                .await
                .with_context(|| format!("failed to read samples for {:?}", view.title))?;

            let map = aggregate(&samples, gym, view.reducer, view.hours);
            if map.is_empty() {
                warn!(gym = %gym, view = %view.title, "No samples in window; sending an empty heatmap");
            }

            let png = render_heatmap(&map, now)
                .with_context(|| format!("failed to render {:?}", view.title))?;

            info!(
                gym = %gym,
                view = %view.title,
                samples = samples.len(),
                rows = map.rows.len(),
                columns = map.columns.len(),
                bytes = png.len(),
                "Heatmap rendered"
            );
            views.push(ViewSummary {
                title: view.title.clone(),
                samples: samples.len(),
                rows: map.rows.len(),
                columns: map.columns.len(),
            });
            photos.push((png, Some(view.title.clone())));
        }

        let latest = self
            .store
            .read_samples(&SampleQuery::Latest { gym: gym.to_owned() })
            .await
            .context("failed to read the latest sample")?
            .pop();

        let notify = self
            .notifier
            .notify(latest.as_ref(), photos, now)
            .await
            .context("failed to deliver digest")?;

        Ok(DigestReport { views, notify })
    }
}
