pub mod aggregate;
mod font;
pub mod render;
pub mod service;

use chrono::NaiveDate;

use crate::config::DigestConfig;

pub use aggregate::{aggregate, DayWindow, Heatmap, Reducer, Window};
pub use render::{render_heatmap, RenderError};
pub use service::{DigestReport, DigestService};

/// One heatmap of the digest: which samples, how they collapse, and the
/// caption it is sent with. Views are independent of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestView {
    pub title: String,
    pub window: Window,
    pub reducer: Reducer,
    pub hours: DayWindow,
}

impl DigestView {
    /// Mean over the last `days` days.
    pub fn trailing(days: i64, hours: DayWindow) -> Self {
        Self {
            title: format!("Загруженность gym за последние {days} дней"),
            window: Window::Trailing { days },
            reducer: Reducer::Mean,
            hours,
        }
    }

    /// Median over the pre-cutover history plus the current week.
    pub fn current_week(cutover: NaiveDate, hours: DayWindow) -> Self {
        Self {
            title: "Загруженность gym на текущей неделе".to_owned(),
            window: Window::CutoverPlusCurrentWeek { cutover },
            reducer: Reducer::Median,
            hours,
        }
    }

    /// The two views of every digest, in send order.
    pub fn configured(config: &DigestConfig) -> Vec<Self> {
        vec![
            Self::trailing(config.trailing_days, config.day_window),
            Self::current_week(config.cutover, config.day_window),
        ]
    }
}
