// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Symbolic reporting periods resolved into half-open instant ranges in the
//! caller's zone. Pure: the caller supplies "now".

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::GoalPeriod;

pub const VALID_PERIODS: &str =
    "today, yesterday, this_week, last_week, this_month, last_month, this_year, all_time";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("period must be one of: {VALID_PERIODS}")]
pub struct PeriodError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodLabel {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    AllTime,
}

impl PeriodLabel {
    pub const ALL: [PeriodLabel; 8] = [
        PeriodLabel::Today,
        PeriodLabel::Yesterday,
        PeriodLabel::ThisWeek,
        PeriodLabel::LastWeek,
        PeriodLabel::ThisMonth,
        PeriodLabel::LastMonth,
        PeriodLabel::ThisYear,
        PeriodLabel::AllTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodLabel::Today => "today",
            PeriodLabel::Yesterday => "yesterday",
            PeriodLabel::ThisWeek => "this_week",
            PeriodLabel::LastWeek => "last_week",
            PeriodLabel::ThisMonth => "this_month",
            PeriodLabel::LastMonth => "last_month",
            PeriodLabel::ThisYear => "this_year",
            PeriodLabel::AllTime => "all_time",
        }
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodLabel {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeriodLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or(PeriodError)
    }
}

/// `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.to
    }
}

pub fn resolve<Tz: TimeZone>(label: PeriodLabel, now: &DateTime<Tz>) -> DateRange {
    let tz = now.timezone();
    let today = now.date_naive();
    let now_utc = now.with_timezone(&Utc);
    let midnight = |date: NaiveDate| local_midnight(&tz, date);

    let (from, to) = match label {
        PeriodLabel::Today => (midnight(today), now_utc),
        PeriodLabel::Yesterday => (midnight(today - Duration::days(1)), midnight(today)),
        PeriodLabel::ThisWeek => (midnight(week_start(today)), now_utc),
        PeriodLabel::LastWeek => {
            let this_week = week_start(today);
            (midnight(this_week - Duration::days(7)), midnight(this_week))
        }
        PeriodLabel::ThisMonth => (midnight(month_start(today)), now_utc),
        PeriodLabel::LastMonth => {
            let this_month = month_start(today);
            let last_month = month_start(this_month - Duration::days(1));
            (midnight(last_month), midnight(this_month))
        }
        PeriodLabel::ThisYear => {
            let jan_first = today - Duration::days(i64::from(today.ordinal0()));
            (midnight(jan_first), now_utc)
        }
        PeriodLabel::AllTime => (Utc.from_utc_datetime(&NaiveDateTime::default()), now_utc),
    };
    DateRange { from, to }
}

/// Parses `label` and resolves it; unknown labels list the valid set.
pub fn resolve_label<Tz: TimeZone>(label: &str, now: &DateTime<Tz>) -> Result<DateRange, PeriodError> {
    Ok(resolve(label.parse()?, now))
}

/// How far through a goal window `now` is, as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressFraction {
    pub numerator: u32,
    pub denominator: u32,
}

/// daily: `hour / 24`; weekly: `weekday (Mon=1..Sun=7) / 7`;
/// monthly: `day_of_month / days_in_month`.
pub fn expected_progress_fraction<Tz: TimeZone>(
    period: GoalPeriod,
    now: &DateTime<Tz>,
) -> ProgressFraction {
    let (numerator, denominator) = match period {
        GoalPeriod::Daily => (now.hour(), 24),
        GoalPeriod::Weekly => (now.weekday().number_from_monday(), 7),
        GoalPeriod::Monthly => (now.day(), days_in_month(now.date_naive())),
    };
    ProgressFraction {
        numerator,
        denominator,
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn days_in_month(date: NaiveDate) -> u32 {
    let first = month_start(date);
    let next = month_start(first + Duration::days(32));
    (next - first).num_days() as u32
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at.with_timezone(&Utc),
        // midnight skipped by a DST jump; the zone's offset at that UTC instant is close enough
        LocalResult::None => tz.from_utc_datetime(&naive).with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(offset_hours: i32, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn today_starts_at_local_midnight() {
        // 2024-05-15 10:30 at UTC-5
        let now = at(-5, 2024, 5, 15, 10, 30);
        let range = resolve(PeriodLabel::Today, &now);
        assert_eq!(range.from, utc(2024, 5, 15, 5));
        assert_eq!(range.to, now.with_timezone(&Utc));
    }

    #[test]
    fn week_anchors_on_monday() {
        // Sunday 2024-05-19 maps to day 7 of the week starting Monday 05-13
        let now = at(0, 2024, 5, 19, 23, 0);
        assert_eq!(resolve(PeriodLabel::ThisWeek, &now).from, utc(2024, 5, 13, 0));
        let last = resolve(PeriodLabel::LastWeek, &now);
        assert_eq!(last.from, utc(2024, 5, 6, 0));
        assert_eq!(last.to, utc(2024, 5, 13, 0));
    }

    #[test]
    fn last_month_crosses_year() {
        let now = at(0, 2024, 1, 10, 12, 0);
        let last = resolve(PeriodLabel::LastMonth, &now);
        assert_eq!(last.from, utc(2023, 12, 1, 0));
        assert_eq!(last.to, utc(2024, 1, 1, 0));
        assert_eq!(resolve(PeriodLabel::ThisYear, &now).from, utc(2024, 1, 1, 0));
    }

    #[test]
    fn ranges_are_ordered_and_last_meets_this() {
        let instants = [
            at(0, 2024, 2, 29, 0, 0),
            at(9, 2024, 12, 31, 23, 59),
            at(-8, 2023, 3, 12, 2, 30),
            at(5, 2024, 7, 1, 0, 1),
            at(-3, 2025, 1, 6, 0, 0),
        ];
        for now in &instants {
            for label in PeriodLabel::ALL {
                let range = resolve(label, now);
                assert!(range.from <= range.to, "{label} at {now}");
            }
            let pairs = [
                (PeriodLabel::Yesterday, PeriodLabel::Today),
                (PeriodLabel::LastWeek, PeriodLabel::ThisWeek),
                (PeriodLabel::LastMonth, PeriodLabel::ThisMonth),
            ];
            for (last, this) in pairs {
                assert_eq!(resolve(last, now).to, resolve(this, now).from, "{last} at {now}");
            }
        }
    }

    #[test]
    fn unknown_label_lists_valid_set() {
        let err = resolve_label("fortnight", &Utc::now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "period must be one of: today, yesterday, this_week, last_week, this_month, last_month, this_year, all_time"
        );
    }

    #[test]
    fn progress_fractions() {
        // Wednesday
        let now = at(0, 2024, 5, 15, 18, 0);
        let weekly = expected_progress_fraction(GoalPeriod::Weekly, &now);
        assert_eq!((weekly.numerator, weekly.denominator), (3, 7));

        let daily = expected_progress_fraction(GoalPeriod::Daily, &now);
        assert_eq!((daily.numerator, daily.denominator), (18, 24));

        let monthly = expected_progress_fraction(GoalPeriod::Monthly, &now);
        assert_eq!((monthly.numerator, monthly.denominator), (15, 31));

        let leap = expected_progress_fraction(GoalPeriod::Monthly, &at(0, 2024, 2, 10, 0, 0));
        assert_eq!(leap.denominator, 29);
    }
}
