//! Partial-precision date and time values.
//!
//! FHIR dates carry explicit precision: `@2024` and `@2024-03` are valid
//! values whose missing fields are unknown rather than defaulted. Comparison
//! between values of different precision is therefore three-valued — if two
//! values agree on their common fields but one is more precise, the ordering
//! is unknown and comparisons return `None`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Precision of a date/time value or calendar duration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateTimePrecision {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DateTimePrecision {
    /// Map a calendar duration unit (UCUM code or CQL keyword) to a precision.
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "a" | "year" | "years" => Some(Self::Year),
            "mo" | "month" | "months" => Some(Self::Month),
            "wk" | "week" | "weeks" => Some(Self::Week),
            "d" | "day" | "days" => Some(Self::Day),
            "h" | "hour" | "hours" => Some(Self::Hour),
            "min" | "minute" | "minutes" => Some(Self::Minute),
            "s" | "second" | "seconds" => Some(Self::Second),
            "ms" | "millisecond" | "milliseconds" => Some(Self::Millisecond),
            _ => None,
        }
    }
}

impl fmt::Display for DateTimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
        };
        write!(f, "{name}")
    }
}

/// A date with explicit precision: year, year-month, or full date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FhirDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl FhirDate {
    pub fn new(year: i32, month: Option<u32>, day: Option<u32>) -> Self {
        FhirDate { year, month, day }
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Self {
        FhirDate {
            year,
            month: Some(month),
            day: Some(day),
        }
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.day.is_some() {
            DateTimePrecision::Day
        } else if self.month.is_some() {
            DateTimePrecision::Month
        } else {
            DateTimePrecision::Year
        }
    }

    /// Component values in precision order, `None` past the value's precision.
    fn components(&self) -> [Option<i64>; 3] {
        [
            Some(self.year as i64),
            self.month.map(|m| m as i64),
            self.day.map(|d| d as i64),
        ]
    }

    /// Precision-aware ordering. `None` means the ordering is unknown.
    pub fn partial_cmp_precision(&self, other: &FhirDate) -> Option<Ordering> {
        compare_components(&self.components(), &other.components())
    }

    /// Three-valued equality: `None` when precision differs over an equal
    /// common prefix.
    pub fn equals(&self, other: &FhirDate) -> Option<bool> {
        match self.partial_cmp_precision(other) {
            Some(Ordering::Equal) => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }

    /// Equivalence: compare only the comparable portion, never unknown.
    pub fn equivalent(&self, other: &FhirDate) -> bool {
        equivalent_components(&self.components(), &other.components())
    }

    /// Truncate to a coarser precision. `None` if this value is not precise
    /// enough to have the requested component.
    pub fn truncate_to(&self, precision: DateTimePrecision) -> Option<FhirDate> {
        match precision {
            DateTimePrecision::Year => Some(FhirDate::new(self.year, None, None)),
            DateTimePrecision::Month => self.month.map(|m| FhirDate::new(self.year, Some(m), None)),
            _ => {
                self.day?;
                Some(*self)
            }
        }
    }

    /// Add calendar months, carrying into years and clamping the day to the
    /// end of the target month.
    pub fn add_months(&self, amount: i64) -> Option<FhirDate> {
        let month = self.month? as i64;
        let total = self.year as i64 * 12 + (month - 1) + amount;
        let year = total.div_euclid(12);
        let new_month = (total.rem_euclid(12) + 1) as u32;
        let year = i32::try_from(year).ok()?;
        let day = self
            .day
            .map(|d| d.min(days_in_month(year, new_month)));
        Some(FhirDate {
            year,
            month: Some(new_month),
            day,
        })
    }

    pub fn add_years(&self, amount: i64) -> Option<FhirDate> {
        if self.month.is_some() {
            self.add_months(amount.checked_mul(12)?)
        } else {
            let year = i32::try_from(self.year as i64 + amount).ok()?;
            Some(FhirDate::new(year, None, None))
        }
    }

    /// Add days; requires day precision.
    pub fn add_days(&self, amount: i64) -> Option<FhirDate> {
        let (month, day) = (self.month?, self.day?);
        let serial = days_from_civil(self.year, month, day) + amount;
        let (year, month, day) = civil_from_days(serial);
        Some(FhirDate::from_ymd(year, month, day))
    }

    /// Add a calendar duration at the given unit precision.
    ///
    /// Units finer than the date's precision yield `None`.
    pub fn add_duration(&self, amount: i64, unit: DateTimePrecision) -> Option<FhirDate> {
        match unit {
            DateTimePrecision::Year => self.add_years(amount),
            DateTimePrecision::Month => self.add_months(amount),
            DateTimePrecision::Week => self.add_days(amount.checked_mul(7)?),
            DateTimePrecision::Day => self.add_days(amount),
            _ => None,
        }
    }
}

impl fmt::Display for FhirDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{month:02}")?;
            if let Some(day) = self.day {
                write!(f, "-{day:02}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for FhirDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let year_str = parts.next().ok_or("empty date")?;
        if year_str.len() != 4 {
            return Err(format!("invalid year in date '{s}'"));
        }
        let year: i32 = year_str.parse().map_err(|_| format!("invalid date '{s}'"))?;
        let month = parts
            .next()
            .map(|m| parse_component(m, 1, 12, s))
            .transpose()?;
        let day = match (month, parts.next()) {
            (Some(month), Some(d)) => {
                let day = parse_component(d, 1, 31, s)?;
                if day > days_in_month(year, month) {
                    return Err(format!("day out of range in date '{s}'"));
                }
                Some(day)
            }
            (_, None) => None,
            (None, Some(_)) => return Err(format!("invalid date '{s}'")),
        };
        Ok(FhirDate { year, month, day })
    }
}

fn parse_component(s: &str, min: u32, max: u32, whole: &str) -> Result<u32, String> {
    if s.len() != 2 {
        return Err(format!("invalid component in '{whole}'"));
    }
    let value: u32 = s.parse().map_err(|_| format!("invalid component in '{whole}'"))?;
    if value < min || value > max {
        return Err(format!("component out of range in '{whole}'"));
    }
    Ok(value)
}

/// A time-of-day value with explicit precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FhirTime {
    pub hour: u32,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    pub millisecond: Option<u32>,
}

impl FhirTime {
    pub fn new(hour: u32, minute: Option<u32>, second: Option<u32>, millisecond: Option<u32>) -> Self {
        FhirTime {
            hour,
            minute,
            second,
            millisecond,
        }
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.millisecond.is_some() {
            DateTimePrecision::Millisecond
        } else if self.second.is_some() {
            DateTimePrecision::Second
        } else if self.minute.is_some() {
            DateTimePrecision::Minute
        } else {
            DateTimePrecision::Hour
        }
    }

    fn components(&self) -> [Option<i64>; 4] {
        [
            Some(self.hour as i64),
            self.minute.map(|m| m as i64),
            self.second.map(|s| s as i64),
            self.millisecond.map(|ms| ms as i64),
        ]
    }

    pub fn partial_cmp_precision(&self, other: &FhirTime) -> Option<Ordering> {
        compare_components(&self.components(), &other.components())
    }

    pub fn equals(&self, other: &FhirTime) -> Option<bool> {
        match self.partial_cmp_precision(other) {
            Some(Ordering::Equal) => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }

    pub fn equivalent(&self, other: &FhirTime) -> bool {
        equivalent_components(&self.components(), &other.components())
    }

    /// Add a duration, wrapping around midnight.
    pub fn add_duration(&self, amount: i64, unit: DateTimePrecision) -> Option<FhirTime> {
        let unit_ms: i64 = match unit {
            DateTimePrecision::Hour => 3_600_000,
            DateTimePrecision::Minute => {
                self.minute?;
                60_000
            }
            DateTimePrecision::Second => {
                self.second?;
                1000
            }
            DateTimePrecision::Millisecond => {
                self.millisecond?;
                1
            }
            _ => return None,
        };
        let current = self.hour as i64 * 3_600_000
            + self.minute.unwrap_or(0) as i64 * 60_000
            + self.second.unwrap_or(0) as i64 * 1000
            + self.millisecond.unwrap_or(0) as i64;
        let total = (current + amount.checked_mul(unit_ms)?).rem_euclid(86_400_000);
        Some(FhirTime {
            hour: (total / 3_600_000) as u32,
            minute: self.minute.map(|_| ((total / 60_000) % 60) as u32),
            second: self.second.map(|_| ((total / 1000) % 60) as u32),
            millisecond: self.millisecond.map(|_| (total % 1000) as u32),
        })
    }
}

impl fmt::Display for FhirTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.hour)?;
        if let Some(minute) = self.minute {
            write!(f, ":{minute:02}")?;
            if let Some(second) = self.second {
                write!(f, ":{second:02}")?;
                if let Some(ms) = self.millisecond {
                    write!(f, ".{ms:03}")?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for FhirTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (clock, millis) = match s.split_once('.') {
            Some((clock, frac)) => {
                if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(format!("invalid time '{s}'"));
                }
                // Fractional seconds are normalized to milliseconds
                let ms: u32 = format!("{frac:0<3}").parse().map_err(|_| format!("invalid time '{s}'"))?;
                (clock, Some(ms))
            }
            None => (s, None),
        };

        let mut parts = clock.splitn(3, ':');
        let hour = parse_component(parts.next().ok_or("empty time")?, 0, 23, s)?;
        let minute = parts.next().map(|m| parse_component(m, 0, 59, s)).transpose()?;
        let second = parts.next().map(|x| parse_component(x, 0, 59, s)).transpose()?;
        if millis.is_some() && second.is_none() {
            return Err(format!("invalid time '{s}'"));
        }
        Ok(FhirTime {
            hour,
            minute,
            second,
            millisecond: millis,
        })
    }
}

/// A date-time with partial precision and optional timezone offset.
///
/// The offset is stored as signed minutes east of UTC; `Z` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FhirDateTime {
    pub date: FhirDate,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    pub millisecond: Option<u32>,
    pub tz_offset_minutes: Option<i32>,
}

impl FhirDateTime {
    pub fn from_date(date: FhirDate) -> Self {
        FhirDateTime {
            date,
            hour: None,
            minute: None,
            second: None,
            millisecond: None,
            tz_offset_minutes: None,
        }
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.millisecond.is_some() {
            DateTimePrecision::Millisecond
        } else if self.second.is_some() {
            DateTimePrecision::Second
        } else if self.minute.is_some() {
            DateTimePrecision::Minute
        } else if self.hour.is_some() {
            DateTimePrecision::Hour
        } else {
            self.date.precision()
        }
    }

    fn components(&self) -> [Option<i64>; 7] {
        [
            Some(self.date.year as i64),
            self.date.month.map(|m| m as i64),
            self.date.day.map(|d| d as i64),
            self.hour.map(|h| h as i64),
            self.minute.map(|m| m as i64),
            self.second.map(|s| s as i64),
            self.millisecond.map(|ms| ms as i64),
        ]
    }

    /// Normalize to UTC when the value has both a time and an offset;
    /// otherwise returned unchanged.
    pub fn to_utc(&self) -> FhirDateTime {
        let (Some(offset), Some(hour)) = (self.tz_offset_minutes, self.hour) else {
            return *self;
        };
        if offset == 0 || self.date.day.is_none() {
            return *self;
        }
        let minutes = hour as i64 * 60 + self.minute.unwrap_or(0) as i64 - offset as i64;
        let day_shift = minutes.div_euclid(1440);
        let minutes = minutes.rem_euclid(1440);
        let Some(date) = self.date.add_days(day_shift) else {
            return *self;
        };
        FhirDateTime {
            date,
            hour: Some((minutes / 60) as u32),
            minute: self.minute.map(|_| (minutes % 60) as u32),
            second: self.second,
            millisecond: self.millisecond,
            tz_offset_minutes: Some(0),
        }
    }

    pub fn partial_cmp_precision(&self, other: &FhirDateTime) -> Option<Ordering> {
        let (a, b) = normalize_pair(self, other);
        compare_components(&a.components(), &b.components())
    }

    pub fn equals(&self, other: &FhirDateTime) -> Option<bool> {
        match self.partial_cmp_precision(other) {
            Some(Ordering::Equal) => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }

    pub fn equivalent(&self, other: &FhirDateTime) -> bool {
        let (a, b) = normalize_pair(self, other);
        equivalent_components(&a.components(), &b.components())
    }

    /// Truncate to a coarser precision; `None` when the component is absent.
    pub fn truncate_to(&self, precision: DateTimePrecision) -> Option<FhirDateTime> {
        let mut result = *self;
        match precision {
            DateTimePrecision::Year | DateTimePrecision::Month | DateTimePrecision::Day => {
                result.date = self.date.truncate_to(precision)?;
                result.hour = None;
                result.minute = None;
                result.second = None;
                result.millisecond = None;
            }
            DateTimePrecision::Week => return None,
            DateTimePrecision::Hour => {
                self.hour?;
                result.minute = None;
                result.second = None;
                result.millisecond = None;
            }
            DateTimePrecision::Minute => {
                self.minute?;
                result.second = None;
                result.millisecond = None;
            }
            DateTimePrecision::Second => {
                self.second?;
                result.millisecond = None;
            }
            DateTimePrecision::Millisecond => {
                self.millisecond?;
            }
        }
        Some(result)
    }

    /// Add a calendar duration at the given unit precision.
    pub fn add_duration(&self, amount: i64, unit: DateTimePrecision) -> Option<FhirDateTime> {
        match unit {
            DateTimePrecision::Year | DateTimePrecision::Month | DateTimePrecision::Week | DateTimePrecision::Day => {
                let date = self.date.add_duration(amount, unit)?;
                Some(FhirDateTime { date, ..*self })
            }
            _ => {
                let unit_ms: i64 = match unit {
                    DateTimePrecision::Hour => {
                        self.hour?;
                        3_600_000
                    }
                    DateTimePrecision::Minute => {
                        self.minute?;
                        60_000
                    }
                    DateTimePrecision::Second => {
                        self.second?;
                        1000
                    }
                    DateTimePrecision::Millisecond => {
                        self.millisecond?;
                        1
                    }
                    _ => unreachable!(),
                };
                let current = self.hour.unwrap_or(0) as i64 * 3_600_000
                    + self.minute.unwrap_or(0) as i64 * 60_000
                    + self.second.unwrap_or(0) as i64 * 1000
                    + self.millisecond.unwrap_or(0) as i64;
                let total = current + amount.checked_mul(unit_ms)?;
                let day_shift = total.div_euclid(86_400_000);
                let within_day = total.rem_euclid(86_400_000);
                let date = self.date.add_days(day_shift)?;
                Some(FhirDateTime {
                    date,
                    hour: self.hour.map(|_| (within_day / 3_600_000) as u32),
                    minute: self.minute.map(|_| ((within_day / 60_000) % 60) as u32),
                    second: self.second.map(|_| ((within_day / 1000) % 60) as u32),
                    millisecond: self.millisecond.map(|_| (within_day % 1000) as u32),
                    tz_offset_minutes: self.tz_offset_minutes,
                })
            }
        }
    }
}

/// Normalize a pair of date-times to UTC when both carry offsets.
fn normalize_pair(a: &FhirDateTime, b: &FhirDateTime) -> (FhirDateTime, FhirDateTime) {
    match (a.tz_offset_minutes, b.tz_offset_minutes) {
        (Some(x), Some(y)) if x != y => (a.to_utc(), b.to_utc()),
        _ => (*a, *b),
    }
}

impl fmt::Display for FhirDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date)?;
        if let Some(hour) = self.hour {
            write!(f, "T{hour:02}")?;
            if let Some(minute) = self.minute {
                write!(f, ":{minute:02}")?;
                if let Some(second) = self.second {
                    write!(f, ":{second:02}")?;
                    if let Some(ms) = self.millisecond {
                        write!(f, ".{ms:03}")?;
                    }
                }
            }
            if let Some(offset) = self.tz_offset_minutes {
                if offset == 0 {
                    write!(f, "Z")?;
                } else {
                    let sign = if offset < 0 { '-' } else { '+' };
                    let abs = offset.unsigned_abs();
                    write!(f, "{sign}{:02}:{:02}", abs / 60, abs % 60)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for FhirDateTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((date_part, time_part)) = s.split_once('T') else {
            return Ok(FhirDateTime::from_date(s.parse()?));
        };
        let date: FhirDate = date_part.parse()?;
        if date.day.is_none() {
            return Err(format!("time component requires a full date in '{s}'"));
        }
        if time_part.is_empty() {
            return Ok(FhirDateTime::from_date(date));
        }

        // Split off the timezone suffix: Z or +hh:mm / -hh:mm
        let (clock, tz) = if let Some(stripped) = time_part.strip_suffix('Z') {
            (stripped, Some(0))
        } else if let Some(pos) = time_part.rfind(['+', '-']) {
            let (clock, tz_str) = time_part.split_at(pos);
            let sign: i32 = if tz_str.starts_with('-') { -1 } else { 1 };
            let hhmm = &tz_str[1..];
            let (h, m) = hhmm
                .split_once(':')
                .ok_or_else(|| format!("invalid timezone in '{s}'"))?;
            let hours: i32 = h.parse().map_err(|_| format!("invalid timezone in '{s}'"))?;
            let minutes: i32 = m.parse().map_err(|_| format!("invalid timezone in '{s}'"))?;
            (clock, Some(sign * (hours * 60 + minutes)))
        } else {
            (time_part, None)
        };

        let time: FhirTime = clock.parse()?;
        Ok(FhirDateTime {
            date,
            hour: Some(time.hour),
            minute: time.minute,
            second: time.second,
            millisecond: time.millisecond,
            tz_offset_minutes: tz,
        })
    }
}

/// Compare component arrays pairwise; stop with `None` when precision runs
/// out on one side only.
fn compare_components(a: &[Option<i64>], b: &[Option<i64>]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match (x, y) {
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => continue,
                ordering => return Some(ordering),
            },
            (None, None) => return Some(Ordering::Equal),
            _ => return None,
        }
    }
    Some(Ordering::Equal)
}

/// Equivalence over the shared precision prefix.
fn equivalent_components(a: &[Option<i64>], b: &[Option<i64>]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        match (x, y) {
            (Some(x), Some(y)) => {
                if x != y {
                    return false;
                }
            }
            _ => return true,
        }
    }
    true
}

/// Days in a month, accounting for leap years.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Serial day number from a civil date (days since 1970-01-01).
pub fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = year as i64 - if month <= 2 { 1 } else { 0 };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (m + if m > 2 { -3 } else { 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// Civil date from a serial day number.
pub fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = (y + if month <= 2 { 1 } else { 0 }) as i32;
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_dates() {
        let year_only: FhirDate = "2024".parse().unwrap();
        assert_eq!(year_only.precision(), DateTimePrecision::Year);

        let full: FhirDate = "2024-03-15".parse().unwrap();
        assert_eq!(full, FhirDate::from_ymd(2024, 3, 15));
        assert_eq!(full.to_string(), "2024-03-15");

        assert!("2024-13".parse::<FhirDate>().is_err());
        assert!("2024-02-30".parse::<FhirDate>().is_err());
    }

    #[test]
    fn test_precision_comparison() {
        let month: FhirDate = "2024-03".parse().unwrap();
        let day: FhirDate = "2024-03-15".parse().unwrap();

        // Equal common prefix, different precision: unknown
        assert_eq!(month.partial_cmp_precision(&day), None);
        assert_eq!(month.equals(&day), None);

        // Differing before precision runs out: known ordering
        let later: FhirDate = "2024-04".parse().unwrap();
        assert_eq!(day.partial_cmp_precision(&later), Some(Ordering::Less));

        // Equivalence compares only the comparable portion
        assert!(month.equivalent(&day));
        assert!(!month.equivalent(&later));
    }

    #[test]
    fn test_add_months_clamps_day() {
        let jan31 = FhirDate::from_ymd(2024, 1, 31);
        assert_eq!(jan31.add_months(1).unwrap(), FhirDate::from_ymd(2024, 2, 29));
        assert_eq!(jan31.add_months(13).unwrap(), FhirDate::from_ymd(2025, 2, 28));

        let nov = FhirDate::from_ymd(2024, 11, 15);
        assert_eq!(nov.add_months(2).unwrap(), FhirDate::from_ymd(2025, 1, 15));
        assert_eq!(nov.add_months(-12).unwrap(), FhirDate::from_ymd(2023, 11, 15));
    }

    #[test]
    fn test_add_days_carries() {
        let date = FhirDate::from_ymd(2024, 12, 30);
        assert_eq!(date.add_days(3).unwrap(), FhirDate::from_ymd(2025, 1, 2));
        assert_eq!(date.add_days(-30).unwrap(), FhirDate::from_ymd(2024, 11, 30));
    }

    #[test]
    fn test_insufficient_precision_for_unit() {
        let month: FhirDate = "2024-03".parse().unwrap();
        assert!(month.add_duration(1, DateTimePrecision::Day).is_none());
        assert!(month.add_duration(1, DateTimePrecision::Month).is_some());
    }

    #[test]
    fn test_datetime_parse_and_display() {
        let dt: FhirDateTime = "2024-03-15T10:30:00.500Z".parse().unwrap();
        assert_eq!(dt.precision(), DateTimePrecision::Millisecond);
        assert_eq!(dt.to_string(), "2024-03-15T10:30:00.500Z");

        let offset: FhirDateTime = "2024-03-15T10:30-05:00".parse().unwrap();
        assert_eq!(offset.tz_offset_minutes, Some(-300));
        assert_eq!(offset.to_string(), "2024-03-15T10:30-05:00");
    }

    #[test]
    fn test_datetime_timezone_normalization() {
        let east: FhirDateTime = "2024-03-15T23:30+02:00".parse().unwrap();
        let utc: FhirDateTime = "2024-03-15T21:30Z".parse().unwrap();
        assert_eq!(east.equals(&utc), Some(true));

        // Offset carries across midnight
        let west: FhirDateTime = "2024-03-15T23:30-05:00".parse().unwrap();
        assert_eq!(west.to_utc().date, FhirDate::from_ymd(2024, 3, 16));
    }

    #[test]
    fn test_datetime_add_duration() {
        let dt: FhirDateTime = "2024-03-15T23:00:00".parse().unwrap();
        let later = dt.add_duration(2, DateTimePrecision::Hour).unwrap();
        assert_eq!(later.date, FhirDate::from_ymd(2024, 3, 16));
        assert_eq!(later.hour, Some(1));
    }

    #[test]
    fn test_time_parse_compare_add() {
        let t1: FhirTime = "10:30".parse().unwrap();
        let t2: FhirTime = "10:30:15".parse().unwrap();
        assert_eq!(t1.partial_cmp_precision(&t2), None);

        let wrapped = FhirTime::new(23, Some(30), None, None)
            .add_duration(45, DateTimePrecision::Minute)
            .unwrap();
        assert_eq!((wrapped.hour, wrapped.minute), (0, Some(15)));
    }

    #[test]
    fn test_civil_round_trip() {
        for serial in [-719468, -1, 0, 1, 19_000, 738_000] {
            let (y, m, d) = civil_from_days(serial);
            assert_eq!(days_from_civil(y, m, d), serial);
        }
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2024, 3, 1) - days_from_civil(2024, 2, 1), 29);
    }
}
