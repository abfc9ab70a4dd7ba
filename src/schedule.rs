//! In-process triggering for `serve` mode.
//!
//! A [`JobSchedule`] fires at minutes `offset, offset + every, ...` of every
//! UTC hour in `start_hour..=end_hour`, the same shape as a
//! `5-59/2 4-20 * * *` cron line. Each run is bounded by the job timeout and
//! retried after a fixed delay. Runs of one job never overlap.

use std::future::Future;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::time;
use tracing::{error, info, warn};

use crate::config::JobSchedule;

/// First trigger strictly after `after`, or `None` for an empty window.
pub fn next_run(job: &JobSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let every = usize::try_from(job.every_minutes).ok().filter(|&n| n > 0)?;

    for day in 0..=1 {
        let date = after.date_naive() + Duration::days(day);
        for hour in job.start_hour..=job.end_hour {
            for minute in (job.offset_minutes..60).step_by(every) {
                let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                    continue;
                };
                let candidate = date.and_time(time).and_utc();
                if candidate > after {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Runs `task` once, then up to `job.retries` more times if it fails or
/// exceeds `job.timeout()`.
pub async fn run_with_retries<F, Fut>(name: &str, job: &JobSchedule, mut task: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = job.retries + 1;
    let mut last_error = anyhow!("{name} never ran");

    for attempt in 1..=attempts {
        match time::timeout(job.timeout(), task()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => {
                warn!(job = %name, attempt, error = %format!("{e:#}"), "Run failed");
                last_error = e;
            }
            Err(_) => {
                warn!(job = %name, attempt, timeout_secs = job.timeout_secs, "Run timed out");
                last_error = anyhow!("{name} timed out after {}s", job.timeout_secs);
            }
        }

        if attempt < attempts {
            time::sleep(job.retry_delay()).await;
        }
    }

    Err(last_error.context(format!("{name} failed after {attempts} attempts")))
}

/// Waits for each trigger of `job` and runs `task`, forever.
pub async fn run_forever<F, Fut>(name: &'static str, job: JobSchedule, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!(
        job = name,
        every_minutes = job.every_minutes,
        offset_minutes = job.offset_minutes,
        start_hour = job.start_hour,
        end_hour = job.end_hour,
        "Schedule loop started"
    );

    loop {
        let now = Utc::now();
        let Some(next) = next_run(&job, now) else {
            error!(job = name, "Schedule has no trigger times; stopping loop");
            return;
        };
        info!(job = name, next_run = %next, "Waiting for next run");
        time::sleep((next - now).to_std().unwrap_or_default()).await;

        if let Err(e) = run_with_retries(name, &job, &mut task).await {
            error!(job = name, error = %format!("{e:#}"), "Giving up on this run");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use chrono::NaiveDate;

    use super::*;

    fn digest_job() -> JobSchedule {
        JobSchedule {
            every_minutes: 2,
            offset_minutes: 5,
            start_hour: 4,
            end_hour: 20,
            timeout_secs: 20 * 60,
            retries: 2,
            retry_delay_secs: 60,
        }
    }

    fn utc(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 9, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn next_run_follows_offset_and_step() {
        let job = digest_job();
        assert_eq!(next_run(&job, utc(16, 4, 5, 30)), Some(utc(16, 4, 7, 0)));
        assert_eq!(next_run(&job, utc(16, 12, 0, 0)), Some(utc(16, 12, 5, 0)));
        assert_eq!(next_run(&job, utc(16, 12, 59, 0)), Some(utc(16, 13, 5, 0)));
    }

    #[test]
    fn next_run_is_strictly_later() {
        assert_eq!(next_run(&digest_job(), utc(16, 4, 5, 0)), Some(utc(16, 4, 7, 0)));
    }

    #[test]
    fn next_run_waits_for_the_window() {
        let job = digest_job();
        assert_eq!(next_run(&job, utc(16, 1, 0, 0)), Some(utc(16, 4, 5, 0)));
        assert_eq!(next_run(&job, utc(16, 20, 59, 0)), Some(utc(17, 4, 5, 0)));
    }

    #[test]
    fn scrape_schedule_fires_every_five_minutes() {
        let job = JobSchedule { every_minutes: 5, offset_minutes: 0, ..digest_job() };
        assert_eq!(next_run(&job, utc(16, 9, 58, 0)), Some(utc(16, 10, 0, 0)));
        assert_eq!(next_run(&job, utc(16, 10, 0, 0)), Some(utc(16, 10, 5, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = run_with_retries("digest", &digest_job(), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("boom"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = run_with_retries("scrape", &digest_job(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("webdriver unreachable"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let text = format!("{err:#}");
        assert!(text.contains("after 3 attempts"));
        assert!(text.contains("webdriver unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_run_times_out() {
        let job = JobSchedule { retries: 0, timeout_secs: 5, ..digest_job() };

        let err = run_with_retries("digest", &job, || std::future::pending::<Result<()>>())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("timed out"));
    }
}
