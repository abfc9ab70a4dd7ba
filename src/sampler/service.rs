use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime, Utc};
use tokio::time;
use tracing::{info, warn};

use super::{extract_online, PageSession, SampleError, Target};
use crate::{
    config::{LocationSpec, ScrapeConfig},
    db::models::OccupancySample,
    loader::{LoadOutcome, Loader},
    store::Rows,
};

/// Fixed pauses and waits of a scrape run.
#[derive(Debug, Clone)]
pub struct SampleTimings {
    /// After the page is opened, before the first read.
    pub settle: Duration,
    /// After a read, before touching the dropdown.
    pub between: Duration,
    /// Upper bound for an element to become clickable.
    pub wait_timeout: Duration,
    /// Between an element becoming clickable and the click.
    pub before_click: Duration,
    /// After picking the option, before the read.
    pub after_select: Duration,
}

impl Default for SampleTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            between: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(10),
            before_click: Duration::from_secs(5),
            after_select: Duration::from_secs(10),
        }
    }
}

pub struct Sampler {
    page_url: String,
    locations: Vec<LocationSpec>,
    timings: SampleTimings,
    offset: FixedOffset,
}

impl Sampler {
    pub fn new(scrape: &ScrapeConfig, offset: FixedOffset) -> Self {
        Self {
            page_url: scrape.page_url.clone(),
            locations: scrape.locations.clone(),
            timings: SampleTimings::default(),
            offset,
        }
    }

    pub fn with_timings(mut self, timings: SampleTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Reads one sample per configured location, in order.
    ///
    /// The session is closed before returning, whether or not the run
    /// succeeded. A missing counter is recorded as `online = None`; an
    /// interaction timeout aborts the run.
    pub async fn run(&self, session: &mut dyn PageSession) -> Result<Vec<OccupancySample>, SampleError> {
        let result = self.collect(session).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close browser session");
        }

        result
    }

    async fn collect(&self, session: &mut dyn PageSession) -> Result<Vec<OccupancySample>, SampleError> {
        info!(url = %self.page_url, "Opening schedule page");
        session.goto(&self.page_url).await?;
        time::sleep(self.timings.settle).await;

        let mut samples: Vec<OccupancySample> = Vec::with_capacity(self.locations.len());

        for location in &self.locations {
            if let Some(step) = &location.select {
                time::sleep(self.timings.between).await;
                self.click_after_pause(session, &Target::Css(step.dropdown_css.clone()))
                    .await?;
                self.click_after_pause(session, &Target::XPath(step.option_xpath()))
                    .await?;
                time::sleep(self.timings.after_select).await;
            }

            let html = session.page_source().await?;
            let online = extract_online(&html);
            if online.is_none() {
                warn!(gym = %location.name, "Online counter not found on page; recording a missing value");
            }

            let ts = next_ts(samples.last().map(|prev| prev.ts), self.local_now());

            info!(gym = %location.name, online = ?online, ts = %ts, "Sampled occupancy");
            samples.push(OccupancySample {
                ts,
                online,
                gym_name: location.name.clone(),
            });
        }

        Ok(samples)
    }

    async fn click_after_pause(
        &self,
        session: &mut dyn PageSession,
        target: &Target,
    ) -> Result<(), SampleError> {
        session.wait_clickable(target, self.timings.wait_timeout).await?;
        time::sleep(self.timings.before_click).await;
        session.click(target).await
    }

    fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Timestamp of the next sample in a run: the clock reading, but never
/// earlier than the previous sample.
fn next_ts(prev: Option<NaiveDateTime>, now: NaiveDateTime) -> NaiveDateTime {
    prev.map_or(now, |p| p.max(now))
}

/// The scrape pipeline: sample every location, then append the batch.
///
/// A storage failure is reported in the returned outcome; only browser
/// failures are errors.
pub async fn sample_and_load(
    sampler: &Sampler,
    session: &mut dyn PageSession,
    loader: &Loader,
) -> Result<LoadOutcome, SampleError> {
    let samples = sampler.run(session).await?;
    Ok(loader.load(Rows::Samples(&samples)).await)
}
