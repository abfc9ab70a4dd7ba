pub mod browser;
pub mod service;

use std::time::Duration;

use scraper::{Html, Selector};

pub use browser::{PageSession, Target, WebDriverSession};
pub use service::{SampleTimings, Sampler};

/// CSS selector of the element carrying the "online N" counter.
pub const ONLINE_SELECTOR: &str = "div.online-people_rz";

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("timed out after {after:?} waiting for {target} to become clickable")]
    Timeout { target: String, after: Duration },

    #[error("browser error: {0}")]
    Browser(String),
}

/// Pulls the visitor count out of a rendered schedule page.
///
/// The counter reads like `"Онлайн 37"`: the second whitespace-separated token
/// is the number. A missing element or a non-numeric token yields `None`.
pub fn extract_online(html: &str) -> Option<i32> {
    let selector = Selector::parse(ONLINE_SELECTOR).ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<String>();
    text.split_whitespace().nth(1)?.parse().ok()
}
