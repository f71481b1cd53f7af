//! Daily time-window partitions.

use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;

/// Format of daily partition keys.
pub const DAILY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Anything that can name the most recent complete partition at a given time.
pub trait PartitionRegistry: fmt::Debug + Send + Sync {
    fn last_partition_key(&self, now: DateTime<Utc>) -> Option<String>;
}

/// One partition per calendar day in `timezone`, starting at `start_date`.
///
/// A day becomes a partition once it has fully elapsed; `end_offset` shifts
/// the last partition by whole days (1 exposes the current, still running day).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyPartitionsDefinition {
    pub start_date: NaiveDate,
    pub timezone: Tz,
    pub end_offset: i64,
}

impl DailyPartitionsDefinition {
    pub fn new(start_date: NaiveDate, timezone: Tz) -> Self {
        Self {
            start_date,
            timezone,
            end_offset: 0,
        }
    }

    pub fn with_end_offset(mut self, end_offset: i64) -> Self {
        self.end_offset = end_offset;
        self
    }

    /// Partitioned jobs tick at local midnight, when a new day completes.
    pub fn cron_schedule(&self) -> &'static str {
        "0 0 * * *"
    }

    fn last_partition_date(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = now.with_timezone(&self.timezone).date_naive();
        let last = if self.end_offset >= 1 {
            today.checked_add_days(Days::new((self.end_offset - 1) as u64))?
        } else {
            today.checked_sub_days(Days::new((1 - self.end_offset) as u64))?
        };
        (last >= self.start_date).then_some(last)
    }

    pub fn partition_key(date: NaiveDate) -> String {
        date.format(DAILY_KEY_FORMAT).to_string()
    }

    /// Every partition key up to the last one at `now`, oldest first.
    pub fn partition_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(last) = self.last_partition_date(now) else {
            return Vec::new();
        };
        self.start_date
            .iter_days()
            .take_while(|day| *day <= last)
            .map(Self::partition_key)
            .collect()
    }

    pub fn has_partition_key(&self, key: &str, now: DateTime<Utc>) -> bool {
        match (NaiveDate::parse_from_str(key, DAILY_KEY_FORMAT), self.last_partition_date(now)) {
            (Ok(date), Some(last)) => date >= self.start_date && date <= last,
            _ => false,
        }
    }
}

impl PartitionRegistry for DailyPartitionsDefinition {
    /// `None` until the first day after `start_date` has completed.
    fn last_partition_key(&self, now: DateTime<Utc>) -> Option<String> {
        self.last_partition_date(now).map(Self::partition_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily() -> DailyPartitionsDefinition {
        DailyPartitionsDefinition::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), chrono_tz::UTC)
    }

    #[test]
    fn test_last_partition_is_the_previous_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(daily().last_partition_key(now).as_deref(), Some("2024-03-09"));
    }

    #[test]
    fn test_no_partition_before_first_day_completes() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        assert_eq!(daily().last_partition_key(now), None);
        let next = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(daily().last_partition_key(next).as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_timezone_decides_the_day() {
        let partitions = DailyPartitionsDefinition::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            chrono_tz::America::Los_Angeles,
        );
        // 05:00 UTC on the 10th is still the 9th in Los Angeles.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 5, 0, 0).unwrap();
        assert_eq!(partitions.last_partition_key(now).as_deref(), Some("2024-03-08"));
    }

    #[test]
    fn test_end_offset_exposes_current_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(daily().with_end_offset(1).last_partition_key(now).as_deref(), Some("2024-03-10"));
    }

    #[test]
    fn test_partition_keys_span_start_to_last() {
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap();
        let partitions = daily();
        assert_eq!(partitions.partition_keys(now), vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
        assert!(partitions.has_partition_key("2024-01-03", now));
        assert!(!partitions.has_partition_key("2024-01-04", now));
        assert!(!partitions.has_partition_key("2023-12-31", now));
        assert!(!partitions.has_partition_key("yesterday", now));
    }
}
