use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use serde::Deserialize;

use crate::digest::aggregate::DayWindow;

/// Default location of the JSON config document.
pub const DEFAULT_CONFIG_PATH: &str = "main_config.json";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Everything a pipeline run needs, loaded once at process start and passed
/// down explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub telegram: TelegramConfig,
    /// Postgres schema holding both tables; applied as `search_path`.
    #[serde(default = "default_layer")]
    pub layer: String,
    /// Fixed offset of the wall clock used for stored timestamps and the
    /// "you are here" marker.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Destination chat for the digest.
    #[serde(alias = "chat_id")]
    pub notification_tables: i64,
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_page_url")]
    pub page_url: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_locations")]
    pub locations: Vec<LocationSpec>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            webdriver_url: default_webdriver_url(),
            locations: default_locations(),
        }
    }
}

/// One gym on the schedule page. The first location is whatever the page
/// shows on load; later ones are reached through a dropdown selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationSpec {
    pub name: String,
    #[serde(default)]
    pub select: Option<SelectStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectStep {
    /// CSS selector of the dropdown control.
    pub dropdown_css: String,
    /// Exact text of the `<li>` option to pick.
    pub option_text: String,
}

impl SelectStep {
    /// XPath matching the option `<li>` by its exact text.
    pub fn option_xpath(&self) -> String {
        format!("//li[text()='{}']", self.option_text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_focal_gym")]
    pub focal_gym: String,
    /// Samples before this date stay in the baseline view.
    #[serde(default = "default_cutover")]
    pub cutover: NaiveDate,
    #[serde(default = "default_trailing_days")]
    pub trailing_days: i64,
    /// Time-of-day range of samples that enter the heatmaps.
    #[serde(default)]
    pub day_window: DayWindow,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            focal_gym: default_focal_gym(),
            cutover: default_cutover(),
            trailing_days: default_trailing_days(),
            day_window: DayWindow::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "JobSchedule::scrape_default")]
    pub scrape: JobSchedule,
    #[serde(default = "JobSchedule::digest_default")]
    pub digest: JobSchedule,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scrape: JobSchedule::scrape_default(),
            digest: JobSchedule::digest_default(),
        }
    }
}

/// Cron-like trigger for one pipeline in `serve` mode. Hours are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobSchedule {
    pub every_minutes: u32,
    #[serde(default)]
    pub offset_minutes: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl JobSchedule {
    fn scrape_default() -> Self {
        Self {
            every_minutes: 5,
            offset_minutes: 0,
            start_hour: 4,
            end_hour: 20,
            timeout_secs: 5 * 60,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }

    /// `5-59/2 4-20 * * *`, 20 minute execution timeout.
    fn digest_default() -> Self {
        Self {
            every_minutes: 2,
            offset_minutes: 5,
            start_hour: 4,
            end_hour: 20,
            timeout_secs: 20 * 60,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// Load from the path in `GYM_CONFIG`, falling back to `main_config.json`.
    pub fn from_env() -> Result<Self> {
        let path = optional("GYM_CONFIG", DEFAULT_CONFIG_PATH);
        Self::from_file(path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.layer.is_empty()
                && self.layer.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "layer must be a plain schema identifier, got {:?}",
            self.layer
        );
        anyhow::ensure!(
            !self.scrape.locations.is_empty(),
            "scrape.locations must name at least one gym"
        );
        anyhow::ensure!(
            self.scrape.locations[0].select.is_none(),
            "the first location is read as loaded and cannot have a select step"
        );
        anyhow::ensure!(
            (-23..=23).contains(&self.utc_offset_hours),
            "utc_offset_hours must be within -23..=23, got {}",
            self.utc_offset_hours
        );
        anyhow::ensure!(self.digest.trailing_days > 0, "digest.trailing_days must be positive");
        anyhow::ensure!(
            self.digest.day_window.start <= self.digest.day_window.end,
            "digest.day_window must start before it ends"
        );
        for (name, job) in [("scrape", &self.schedule.scrape), ("digest", &self.schedule.digest)] {
            anyhow::ensure!(
                job.every_minutes > 0
                    && job.offset_minutes < 60
                    && job.start_hour <= job.end_hour
                    && job.end_hour < 24,
                "schedule.{name} has an empty or invalid window"
            );
        }
        Ok(())
    }

    pub fn offset(&self) -> FixedOffset {
        local_offset(self.utc_offset_hours)
    }

    /// Current wall-clock time at the configured offset.
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset()).naive_local()
    }
}

/// Builds the fixed offset; `hours` is validated to be in range on load.
pub fn local_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

fn default_layer() -> String {
    "raw".to_owned()
}

fn default_utc_offset_hours() -> i32 {
    3
}

fn default_pg_port() -> u16 {
    5432
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_owned()
}

fn default_page_url() -> String {
    "https://novokosino.gympro.su/schedule".to_owned()
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_owned()
}

fn default_locations() -> Vec<LocationSpec> {
    vec![
        LocationSpec {
            name: "Новокосино".to_owned(),
            select: None,
        },
        LocationSpec {
            name: "Советская".to_owned(),
            select: Some(SelectStep {
                dropdown_css: ".select".to_owned(),
                option_text: "СОВЕТСКАЯ".to_owned(),
            }),
        },
    ]
}

fn default_focal_gym() -> String {
    "Советская".to_owned()
}

fn default_cutover() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 16).expect("valid constant date")
}

fn default_trailing_days() -> i64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::from_json(MINIMAL).unwrap()
}

#[cfg(test)]
const MINIMAL: &str = r#"{
    "postgres": { "dbname": "gym", "user": "u", "password": "p", "host": "localhost", "port": 5432 },
    "telegram": { "token": "123:abc", "notification_tables": -1001 }
}"#;
