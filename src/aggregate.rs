//! Per-day rollups over the session history.
//!
//! The aggregate is never stored; it is re-derived from the full history on
//! every request.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::util::{date_key, ms_to_hours};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub date: String,
    pub total_hours: f64,
    pub files_edited: BTreeSet<String>,
    pub languages_used: BTreeSet<String>,
}

#[derive(Default)]
struct DayAccumulator {
    total_ms: i64,
    files: BTreeSet<String>,
    languages: BTreeSet<String>,
}

/// Folds sessions into one [`DailyStat`] per UTC date of `start_time`,
/// most recent date first.
///
/// Durations are summed in integer milliseconds and converted to hours once
/// per day, so the result does not depend on input order.
pub fn aggregate(sessions: &[Session]) -> Vec<DailyStat> {
    let mut days: BTreeMap<String, DayAccumulator> = BTreeMap::new();

    for session in sessions {
        let Some(date) = date_key(session.start_time) else {
            continue;
        };
        let day = days.entry(date).or_default();
        day.total_ms = day.total_ms.saturating_add(session.duration_ms());
        day.files.insert(session.file_path.clone());
        day.languages.insert(session.language.clone());
    }

    let mut stats: Vec<DailyStat> = days
        .into_iter()
        .map(|(date, day)| DailyStat {
            date,
            total_hours: ms_to_hours(day.total_ms),
            files_edited: day.files,
            languages_used: day.languages,
        })
        .collect();
    stats.sort_by(|a, b| b.date.cmp(&a.date));
    stats
}

pub fn stat_for<'a>(stats: &'a [DailyStat], date: &str) -> Option<&'a DailyStat> {
    stats.iter().find(|stat| stat.date == date)
}

/// Consecutive active days ending at `today`, or at the day before when
/// nothing has been recorded today yet.
pub fn coding_streak(stats: &[DailyStat], today: &str) -> u32 {
    let Ok(today) = NaiveDate::parse_from_str(today, "%Y-%m-%d") else {
        return 0;
    };
    let mut active: Vec<NaiveDate> = stats
        .iter()
        .filter(|stat| stat.total_hours > 0.0)
        .filter_map(|stat| NaiveDate::parse_from_str(&stat.date, "%Y-%m-%d").ok())
        .filter(|date| *date <= today)
        .collect();
    active.sort_by_key(|date| Reverse(*date));
    active.dedup();

    let mut expected = match active.first() {
        Some(first) if *first == today => today,
        Some(first) if Some(*first) == today.checked_sub_days(Days::new(1)) => *first,
        _ => return 0,
    };

    let mut streak = 0;
    for date in active {
        if date != expected {
            break;
        }
        streak += 1;
        match expected.checked_sub_days(Days::new(1)) {
            Some(previous) => expected = previous,
            None => break,
        }
    }
    streak
}
