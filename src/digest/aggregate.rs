use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::Deserialize;

use crate::{db::models::OccupancySample, store::SampleQuery};

/// Bucket width in minutes.
pub const BUCKET_MINUTES: u32 = 30;

/// Start of the 30-minute interval containing `ts`.
pub fn bucket(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date().and_time(bucket_time(ts.time()))
}

/// Time-of-day part of [`bucket`].
pub fn bucket_time(t: NaiveTime) -> NaiveTime {
    let minute = t.minute() - t.minute() % BUCKET_MINUTES;
    NaiveTime::from_hms_opt(t.hour(), minute, 0).unwrap_or(t)
}

/// Time-of-day range, both ends inclusive, that takes part in a heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DayWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for DayWindow {
    /// 07:00:00 through 23:59:59.
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl DayWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// How a bucket's readings collapse into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Median,
}

impl Reducer {
    /// `None` for an empty slice; never zero by default.
    pub fn reduce(self, values: &[i32]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Mean => {
                let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
                Some(sum / values.len() as f64)
            }
            Reducer::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_unstable();
                let mid = sorted.len() / 2;
                Some(if sorted.len() % 2 == 0 {
                    (f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0
                } else {
                    f64::from(sorted[mid])
                })
            }
        }
    }
}

/// Time-of-day × weekday grid of reduced occupancy.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    /// Bucket start times, ascending.
    pub rows: Vec<NaiveTime>,
    /// Weekdays that have data, Monday first.
    pub columns: Vec<Weekday>,
    /// `cells[row][column]`; `None` where the group had no readings.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl Heatmap {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, time: NaiveTime, day: Weekday) -> Option<f64> {
        let row = self.rows.iter().position(|&t| t == time)?;
        let col = self.columns.iter().position(|&d| d == day)?;
        self.cells[row][col]
    }

    /// Smallest and largest present value.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.cells
            .iter()
            .flatten()
            .flatten()
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Buckets `samples` of `gym` by (time of day, weekday) and reduces each group.
///
/// Samples outside `hours` are skipped. A missing count still claims its row
/// and column but adds no value.
pub fn aggregate(
    samples: &[OccupancySample],
    gym: &str,
    reducer: Reducer,
    hours: DayWindow,
) -> Heatmap {
    let mut groups: BTreeMap<(NaiveTime, u32), Vec<i32>> = BTreeMap::new();
    let mut rows = BTreeSet::new();
    let mut columns: Vec<Weekday> = Vec::new();

    for s in samples.iter().filter(|s| s.gym_name == gym) {
        if !hours.contains(s.ts.time()) {
            continue;
        }
        let time = bucket(s.ts).time();
        let day = s.ts.weekday();
        rows.insert(time);
        if !columns.contains(&day) {
            columns.push(day);
        }
        let group = groups.entry((time, day.num_days_from_monday())).or_default();
        if let Some(v) = s.online {
            group.push(v);
        }
    }
    columns.sort_by_key(|d| d.num_days_from_monday());

    let rows: Vec<NaiveTime> = rows.into_iter().collect();
    let cells = rows
        .iter()
        .map(|&t| {
            columns
                .iter()
                .map(|d| {
                    groups
                        .get(&(t, d.num_days_from_monday()))
                        .and_then(|vals| reducer.reduce(vals))
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Heatmap { rows, columns, cells }
}

/// Date filter of one heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The last `days` days, counted from midnight.
    Trailing { days: i64 },
    /// Everything before `cutover` plus the current calendar week.
    CutoverPlusCurrentWeek { cutover: NaiveDate },
}

impl Window {
    pub fn query(self, gym: &str, now: NaiveDateTime) -> SampleQuery {
        let today = now.date();
        match self {
            Window::Trailing { days } => SampleQuery::Since {
                gym: gym.to_owned(),
                since: midnight(today - Duration::days(days)),
            },
            Window::CutoverPlusCurrentWeek { cutover } => SampleQuery::BeforeOrSince {
                gym: gym.to_owned(),
                before: midnight(cutover),
                since: midnight(week_start(today)),
            },
        }
    }
}

/// Monday of the week containing `day`.
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn midnight(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        // 2024-09-16 is a Monday.
        NaiveDate::from_ymd_opt(2024, 9, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample(ts: NaiveDateTime, online: Option<i32>, gym: &str) -> OccupancySample {
        OccupancySample { ts, online, gym_name: gym.to_owned() }
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn bucket_floors_to_half_hour() {
        assert_eq!(bucket(at(16, 9, 15)), at(16, 9, 0));
        assert_eq!(bucket(at(16, 9, 30)), at(16, 9, 30));
        assert_eq!(bucket(at(16, 23, 59)), at(16, 23, 30));
        assert_eq!(
            bucket(at(16, 14, 47) + Duration::seconds(31)),
            at(16, 14, 30)
        );
    }

    #[test]
    fn bucket_is_idempotent() {
        let mut t = at(16, 0, 0);
        while t < at(17, 0, 0) {
            assert_eq!(bucket(bucket(t)), bucket(t));
            t += Duration::seconds(97);
        }
    }

    #[test]
    fn mean_of_two_readings_in_one_bucket() {
        let rows = vec![
            sample(at(16, 9, 0), Some(5), "A"),
            sample(at(16, 9, 15), Some(7), "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Mean, DayWindow::default());
        assert_eq!(map.rows, vec![hm(9, 0)]);
        assert_eq!(map.columns, vec![Weekday::Mon]);
        assert_eq!(map.get(hm(9, 0), Weekday::Mon), Some(6.0));
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        assert_eq!(Reducer::Median.reduce(&[1, 9, 3, 5]), Some(4.0));
        assert_eq!(Reducer::Median.reduce(&[4, 1, 2]), Some(2.0));
        assert_eq!(Reducer::Mean.reduce(&[]), None);
    }

    #[test]
    fn columns_are_calendar_ordered_regardless_of_input() {
        // Sunday, Wednesday, Monday, in that order.
        let rows = vec![
            sample(at(22, 10, 0), Some(1), "A"),
            sample(at(18, 10, 0), Some(2), "A"),
            sample(at(16, 10, 0), Some(3), "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Mean, DayWindow::default());
        assert_eq!(map.columns, vec![Weekday::Mon, Weekday::Wed, Weekday::Sun]);
    }

    #[test]
    fn empty_group_is_missing_not_zero() {
        let rows = vec![
            sample(at(16, 9, 0), Some(5), "A"),
            sample(at(17, 10, 0), Some(8), "A"),
            sample(at(17, 9, 5), None, "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Mean, DayWindow::default());
        assert_eq!(map.get(hm(10, 0), Weekday::Mon), None);
        // Only a missing reading in the bucket.
        assert_eq!(map.get(hm(9, 0), Weekday::Tue), None);
        assert_eq!(map.cells.len(), 2);
        assert_eq!(map.cells[1][0], None);
    }

    #[test]
    fn filters_other_gyms_and_early_hours() {
        let rows = vec![
            sample(at(16, 6, 59), Some(50), "A"),
            sample(at(16, 7, 0), Some(4), "A"),
            sample(at(16, 7, 10), Some(99), "B"),
            sample(at(16, 23, 59), Some(2), "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Mean, DayWindow::default());
        assert_eq!(map.rows, vec![hm(7, 0), hm(23, 30)]);
        assert_eq!(map.get(hm(7, 0), Weekday::Mon), Some(4.0));
        assert_eq!(map.value_range(), Some((2.0, 4.0)));
    }

    #[test]
    fn narrower_window_drops_evening_and_keeps_its_end() {
        let hours = DayWindow { start: hm(9, 0), end: hm(18, 0) };
        let rows = vec![
            sample(at(16, 8, 59), Some(1), "A"),
            sample(at(16, 9, 0), Some(2), "A"),
            sample(at(16, 18, 0), Some(3), "A"),
            sample(at(16, 18, 1), Some(4), "A"),
            sample(at(16, 21, 0), Some(5), "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Mean, hours);
        assert_eq!(map.rows, vec![hm(9, 0), hm(18, 0)]);
        assert_eq!(map.get(hm(18, 0), Weekday::Mon), Some(3.0));
        assert_eq!(map.value_range(), Some((2.0, 3.0)));
    }

    #[test]
    fn default_window_spans_seven_to_midnight() {
        let hours = DayWindow::default();
        assert!(!hours.contains(hm(6, 59)));
        assert!(hours.contains(hm(7, 0)));
        assert!(hours.contains(NaiveTime::from_hms_opt(23, 59, 59).unwrap()));
    }

    #[test]
    fn all_seven_weekdays_in_calendar_order() {
        // 2024-09-16..22 is Monday..Sunday; fed in reverse.
        let rows: Vec<_> = (16..=22).rev().map(|d| sample(at(d, 12, 0), Some(1), "A")).collect();
        let map = aggregate(&rows, "A", Reducer::Mean, DayWindow::default());
        assert_eq!(
            map.columns,
            vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ]
        );
    }

    #[test]
    fn rows_are_ascending() {
        let rows = vec![
            sample(at(16, 21, 0), Some(1), "A"),
            sample(at(16, 8, 40), Some(1), "A"),
            sample(at(16, 12, 0), Some(1), "A"),
        ];
        let map = aggregate(&rows, "A", Reducer::Median, DayWindow::default());
        assert_eq!(map.rows, vec![hm(8, 30), hm(12, 0), hm(21, 0)]);
    }

    #[test]
    fn trailing_window_starts_at_midnight() {
        let q = Window::Trailing { days: 30 }.query("A", at(30, 14, 0));
        assert_eq!(
            q,
            SampleQuery::Since { gym: "A".into(), since: at(30, 0, 0) - Duration::days(30) }
        );
    }

    #[test]
    fn cutover_window_starts_current_week_on_monday() {
        let cutover = NaiveDate::from_ymd_opt(2024, 9, 16).unwrap();
        // Thursday 2024-09-26 → week starts Monday 2024-09-23.
        let q = Window::CutoverPlusCurrentWeek { cutover }.query("A", at(26, 18, 0));
        assert_eq!(
            q,
            SampleQuery::BeforeOrSince { gym: "A".into(), before: at(16, 0, 0), since: at(23, 0, 0) }
        );
    }

    #[test]
    fn week_start_of_monday_is_itself() {
        let monday = NaiveDate::from_ymd_opt(2024, 9, 16).unwrap();
        assert_eq!(week_start(monday), monday);
        assert_eq!(week_start(monday + Duration::days(6)), monday);
    }
}
