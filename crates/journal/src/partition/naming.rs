//! Partition intervals and on-disk directory names.
//!
//! | Granularity | Directory      | Interval              |
//! |-------------|----------------|-----------------------|
//! | `Day`       | `yyyy-MM-dd`   | one calendar day      |
//! | `Month`     | `yyyy-MM`      | one calendar month    |
//! | `Year`      | `yyyy`         | one calendar year     |
//! | `None`      | `default`      | unbounded             |
//!
//! A directory may carry a `.N` suffix when a newer version of the same
//! interval was written; the suffix does not change the interval.

use crate::error::{JournalError, Result};
use crate::Timestamp;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Directory name used by unpartitioned journals.
pub const DEFAULT_PARTITION_NAME: &str = "default";

/// File at the journal root recording the partitioning granularity.
pub const PARTITION_TYPE_FILE: &str = "_partition_type";

/// Nanoseconds in one day.
pub const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Partitioning granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionType {
    /// One partition per calendar day.
    Day,
    /// One partition per calendar month.
    Month,
    /// One partition per calendar year.
    Year,
    /// A single partition holding every row.
    #[default]
    None,
}

impl PartitionType {
    /// Returns the name written to the partition type file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionType {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "DAY" => Ok(Self::Day),
            "MONTH" => Ok(Self::Month),
            "YEAR" => Ok(Self::Year),
            "NONE" => Ok(Self::None),
            other => Err(JournalError::SchemaMismatch(format!(
                "unknown partition type {other:?}"
            ))),
        }
    }
}

/// Time range `[start, end)` covered by one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInterval {
    /// Inclusive start.
    pub start: Timestamp,
    /// Exclusive end.
    pub end: Timestamp,
    /// Granularity that produced the interval.
    pub partition_type: PartitionType,
}

impl PartitionInterval {
    /// Computes the interval containing `timestamp`.
    pub fn for_timestamp(timestamp: Timestamp, partition_type: PartitionType) -> Self {
        let (start, end) = match partition_type {
            PartitionType::Day => {
                let day = div_floor(timestamp, NANOS_PER_DAY).0;
                (day_start(day), day_start(day + 1))
            }
            PartitionType::Month => {
                let (year, month, _) = civil_from_days(div_floor(timestamp, NANOS_PER_DAY).0);
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                (
                    day_start(days_from_civil(year, month, 1)),
                    day_start(days_from_civil(next_year, next_month, 1)),
                )
            }
            PartitionType::Year => {
                let (year, _, _) = civil_from_days(div_floor(timestamp, NANOS_PER_DAY).0);
                (
                    day_start(days_from_civil(year, 1, 1)),
                    day_start(days_from_civil(year + 1, 1, 1)),
                )
            }
            PartitionType::None => (Timestamp::MIN, Timestamp::MAX),
        };
        Self {
            start,
            end,
            partition_type,
        }
    }

    /// Returns true if `timestamp` falls inside the interval.
    ///
    /// An interval clamped at `Timestamp::MAX` includes `Timestamp::MAX`.
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        match self.partition_type {
            PartitionType::None => true,
            _ => {
                timestamp >= self.start
                    && (timestamp < self.end || self.end == Timestamp::MAX)
            }
        }
    }

    /// Returns the canonical directory name.
    pub fn dir_name(&self) -> String {
        let (year, month, day) = civil_from_days(div_floor(self.start, NANOS_PER_DAY).0);
        match self.partition_type {
            PartitionType::Day => format!("{:04}-{:02}-{:02}", year, month, day),
            PartitionType::Month => format!("{:04}-{:02}", year, month),
            PartitionType::Year => format!("{:04}", year),
            PartitionType::None => DEFAULT_PARTITION_NAME.to_string(),
        }
    }

    /// Returns the directory name for a given version (0 is unsuffixed).
    pub fn versioned_dir_name(&self, version: u32) -> String {
        versioned_dir_name(&self.dir_name(), version)
    }
}

/// Appends a `.N` version suffix; version 0 keeps the bare name.
pub fn versioned_dir_name(base: &str, version: u32) -> String {
    if version == 0 {
        base.to_string()
    } else {
        format!("{}.{}", base, version)
    }
}

/// A parsed partition directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDirName {
    /// Interval named by the directory.
    pub interval: PartitionInterval,
    /// Version suffix, 0 when absent.
    pub version: u32,
}

/// Parses a partition directory name for the given granularity.
///
/// Returns `None` for names that are not partitions of this journal, either
/// because the date is malformed or because it does not match the granularity.
pub fn parse_dir_name(name: &str, partition_type: PartitionType) -> Option<PartitionDirName> {
    let (base, version) = match name.rsplit_once('.') {
        Some((base, suffix)) => {
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (base, suffix.parse::<u32>().ok()?)
        }
        None => (name, 0),
    };

    let interval = match partition_type {
        PartitionType::None => {
            if base != DEFAULT_PARTITION_NAME {
                return None;
            }
            PartitionInterval::for_timestamp(0, PartitionType::None)
        }
        _ => {
            let (year, month, day) = parse_date(base, partition_type)?;
            let start = day_start(days_from_civil(year, month, day));
            PartitionInterval::for_timestamp(start, partition_type)
        }
    };

    Some(PartitionDirName { interval, version })
}

fn parse_date(base: &str, partition_type: PartitionType) -> Option<(i32, u32, u32)> {
    let mut parts = base.split('-');
    let year_part = parts.next()?;
    if year_part.len() != 4 || !year_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = year_part.parse::<i32>().ok()?;

    let mut component = |expected: bool| -> Option<u32> {
        let part = parts.next();
        match (expected, part) {
            (true, Some(p)) if p.len() == 2 && p.bytes().all(|b| b.is_ascii_digit()) => {
                p.parse::<u32>().ok()
            }
            (false, None) => Some(1),
            _ => None,
        }
    };

    let month = component(partition_type != PartitionType::Year)?;
    let day = component(partition_type == PartitionType::Day)?;
    if parts.next().is_some() {
        return None;
    }
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return None;
    }
    Some((year, month, day))
}

/// Reads the partition type recorded at the journal root, if any.
pub fn read_partition_type(root: &Path) -> Result<Option<PartitionType>> {
    match fs::read_to_string(root.join(PARTITION_TYPE_FILE)) {
        Ok(contents) => Ok(Some(contents.parse()?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Records the partition type at the journal root.
pub fn write_partition_type(root: &Path, partition_type: PartitionType) -> Result<()> {
    fs::write(root.join(PARTITION_TYPE_FILE), partition_type.as_str())?;
    Ok(())
}

/// First nanosecond of a day counted from the epoch, clamped to the
/// representable range.
fn day_start(days: i64) -> Timestamp {
    days.saturating_mul(NANOS_PER_DAY)
}

fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 {
        z / 146_097
    } else {
        (z - 146_096) / 146_097
    };
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = y + if month <= 2 { 1 } else { 0 };
    (year as i32, month as u32, day as u32)
}

fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = year as i64 - if month <= 2 { 1 } else { 0 };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (m + if m > 2 { -3 } else { 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DAY: i64 = NANOS_PER_DAY;

    #[test]
    fn test_day_interval() {
        let interval = PartitionInterval::for_timestamp(DAY + 5, PartitionType::Day);
        assert_eq!(interval.start, DAY);
        assert_eq!(interval.end, 2 * DAY);
        assert_eq!(interval.dir_name(), "1970-01-02");
        assert!(interval.contains(DAY));
        assert!(!interval.contains(2 * DAY));
    }

    #[test]
    fn test_month_interval_handles_year_rollover() {
        // 1970-12-15
        let ts = days_from_civil(1970, 12, 15) * DAY;
        let interval = PartitionInterval::for_timestamp(ts, PartitionType::Month);
        assert_eq!(interval.start, days_from_civil(1970, 12, 1) * DAY);
        assert_eq!(interval.end, days_from_civil(1971, 1, 1) * DAY);
        assert_eq!(interval.dir_name(), "1970-12");
    }

    #[test]
    fn test_year_interval() {
        let ts = days_from_civil(2024, 2, 29) * DAY + 17;
        let interval = PartitionInterval::for_timestamp(ts, PartitionType::Year);
        assert_eq!(interval.dir_name(), "2024");
        assert_eq!(interval.end - interval.start, 366 * DAY);
    }

    #[test]
    fn test_pre_epoch_day_interval() {
        let interval = PartitionInterval::for_timestamp(-1, PartitionType::Day);
        assert_eq!(interval.start, -DAY);
        assert_eq!(interval.dir_name(), "1969-12-31");
    }

    #[test]
    fn test_intervals_clamp_at_the_end_of_time() {
        let ts = Timestamp::MAX - 1;

        let year = PartitionInterval::for_timestamp(ts, PartitionType::Year);
        assert_eq!(year.start, days_from_civil(2262, 1, 1) * DAY);
        assert_eq!(year.end, Timestamp::MAX);
        assert_eq!(year.dir_name(), "2262");
        assert!(year.contains(ts));
        assert!(year.contains(Timestamp::MAX));

        let month = PartitionInterval::for_timestamp(ts, PartitionType::Month);
        assert_eq!(month.start, days_from_civil(2262, 4, 1) * DAY);
        assert_eq!(month.end, Timestamp::MAX);
        assert_eq!(month.dir_name(), "2262-04");
        assert!(month.contains(ts));

        let day = PartitionInterval::for_timestamp(ts, PartitionType::Day);
        assert_eq!(day.start, days_from_civil(2262, 4, 11) * DAY);
        assert_eq!(day.end, Timestamp::MAX);
        assert!(day.contains(Timestamp::MAX));
    }

    #[test]
    fn test_intervals_clamp_at_the_start_of_time() {
        let ts = Timestamp::MIN + 1;

        let day = PartitionInterval::for_timestamp(ts, PartitionType::Day);
        assert_eq!(day.start, Timestamp::MIN);
        assert_eq!(day.end, days_from_civil(1677, 9, 22) * DAY);
        assert_eq!(day.dir_name(), "1677-09-21");
        assert!(day.contains(Timestamp::MIN));
        assert!(day.contains(ts));
        assert!(!day.contains(day.end));

        let year = PartitionInterval::for_timestamp(ts, PartitionType::Year);
        assert_eq!(year.start, Timestamp::MIN);
        assert_eq!(year.end, days_from_civil(1678, 1, 1) * DAY);
        assert_eq!(year.dir_name(), "1677");
    }

    #[test]
    fn test_none_interval_is_unbounded() {
        let interval = PartitionInterval::for_timestamp(12345, PartitionType::None);
        assert_eq!(interval.dir_name(), DEFAULT_PARTITION_NAME);
        assert!(interval.contains(Timestamp::MIN));
        assert!(interval.contains(Timestamp::MAX));
    }

    #[test]
    fn test_parse_round_trips_canonical_names() {
        for (ts, partition_type) in [
            (days_from_civil(2023, 7, 4) * DAY, PartitionType::Day),
            (days_from_civil(2023, 7, 1) * DAY, PartitionType::Month),
            (days_from_civil(2023, 1, 1) * DAY, PartitionType::Year),
        ] {
            let interval = PartitionInterval::for_timestamp(ts, partition_type);
            let parsed = parse_dir_name(&interval.dir_name(), partition_type).unwrap();
            assert_eq!(parsed.interval, interval);
            assert_eq!(parsed.version, 0);
        }
    }

    #[test]
    fn test_parse_version_suffix() {
        let parsed = parse_dir_name("2023-07-04.3", PartitionType::Day).unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.interval.dir_name(), "2023-07-04");
        assert_eq!(parsed.interval.versioned_dir_name(3), "2023-07-04.3");
        assert_eq!(parsed.interval.versioned_dir_name(0), "2023-07-04");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        assert!(parse_dir_name("2023-13-01", PartitionType::Day).is_none());
        assert!(parse_dir_name("2023-02-30", PartitionType::Day).is_none());
        assert!(parse_dir_name("2023-07", PartitionType::Day).is_none());
        assert!(parse_dir_name("2023-07-04", PartitionType::Month).is_none());
        assert!(parse_dir_name("2023-07-04.x", PartitionType::Day).is_none());
        assert!(parse_dir_name("2023-07-04.", PartitionType::Day).is_none());
        assert!(parse_dir_name("_tx", PartitionType::Day).is_none());
        assert!(parse_dir_name("2023", PartitionType::None).is_none());
        assert!(parse_dir_name("default.2", PartitionType::None).is_some());
    }

    #[test]
    fn test_partition_type_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(read_partition_type(temp_dir.path()).unwrap(), None);
        write_partition_type(temp_dir.path(), PartitionType::Month).unwrap();
        assert_eq!(
            read_partition_type(temp_dir.path()).unwrap(),
            Some(PartitionType::Month)
        );
    }
}
