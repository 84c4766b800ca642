//! Interval algebra, temporal comparison, and duration computation.
//!
//! All operators are defined over interval endpoints with their closedness;
//! a missing endpoint behaves as −∞/+∞ within the operand type. Precision
//! qualifiers coerce temporal operands before comparing and yield null when
//! the coercion drops a component that is not there.

use fhirkit_fhirpath::model::datetime::{days_from_civil, DateTimePrecision};
use fhirkit_fhirpath::{FhirPathValue, Interval};
use fhirkit_ucum::UcumConverter;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Compare two points, optionally at a coarser precision.
///
/// Returns `None` when the points are incomparable: nulls, incompatible
/// quantity units, mixed precision, or a precision qualifier the operand
/// cannot satisfy.
pub fn point_cmp(
    left: &FhirPathValue,
    right: &FhirPathValue,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> Option<Ordering> {
    let (left, right) = match precision {
        Some(p) => (truncate_point(left, p)?, truncate_point(right, p)?),
        None => (left.clone(), right.clone()),
    };
    left.compare(&right, converter)
}

fn truncate_point(value: &FhirPathValue, precision: DateTimePrecision) -> Option<FhirPathValue> {
    match value {
        FhirPathValue::Date(d) => d.truncate_to(precision).map(FhirPathValue::Date),
        FhirPathValue::DateTime(dt) => dt.truncate_to(precision).map(FhirPathValue::DateTime),
        FhirPathValue::Null => None,
        other => Some(other.clone()),
    }
}

/// View a value as an interval: intervals pass through, points become the
/// degenerate closed interval `[p, p]`.
pub fn as_interval(value: &FhirPathValue) -> Option<Interval> {
    match value {
        FhirPathValue::Interval(interval) => Some((**interval).clone()),
        FhirPathValue::Null => None,
        point => Some(Interval::closed(point.clone(), point.clone())),
    }
}

/// Endpoint comparison where `Null` low is −∞ and `Null` high is +∞.
///
/// `low_side` selects which infinity a null endpoint denotes for each
/// operand.
fn bound_cmp(
    a: &FhirPathValue,
    a_is_low: bool,
    b: &FhirPathValue,
    b_is_low: bool,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> Option<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => Some(match (a_is_low, b_is_low) {
            (true, true) | (false, false) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }),
        (true, false) => Some(if a_is_low { Ordering::Less } else { Ordering::Greater }),
        (false, true) => Some(if b_is_low { Ordering::Greater } else { Ordering::Less }),
        (false, false) => point_cmp(a, b, precision, converter),
    }
}

/// The interval-interval and point-interval operator suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalOp {
    Before,
    After,
    SameAs,
    SameOrBefore,
    SameOrAfter,
    Overlaps,
    OverlapsBefore,
    OverlapsAfter,
    Meets,
    MeetsBefore,
    MeetsAfter,
    Starts,
    Ends,
    Includes,
    IncludedIn,
    ProperlyIncludes,
    ProperlyIncludedIn,
}

/// Evaluate an interval/temporal operator. Point operands become degenerate
/// intervals, so `@2024-01-05 during Interval[...]` works uniformly.
pub fn evaluate_interval_op(
    op: IntervalOp,
    left: &FhirPathValue,
    right: &FhirPathValue,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> FhirPathValue {
    // Pure point comparisons keep three-valued precision semantics
    if !matches!(left, FhirPathValue::Interval(_))
        && !matches!(right, FhirPathValue::Interval(_))
    {
        let Some(ordering) = point_cmp(left, right, precision, converter) else {
            return FhirPathValue::Null;
        };
        let result = match op {
            IntervalOp::Before => ordering == Ordering::Less,
            IntervalOp::After => ordering == Ordering::Greater,
            IntervalOp::SameAs | IntervalOp::Starts | IntervalOp::Ends => {
                ordering == Ordering::Equal
            }
            IntervalOp::SameOrBefore => ordering != Ordering::Greater,
            IntervalOp::SameOrAfter => ordering != Ordering::Less,
            IntervalOp::Overlaps
            | IntervalOp::Meets
            | IntervalOp::Includes
            | IntervalOp::IncludedIn => ordering == Ordering::Equal,
            IntervalOp::OverlapsBefore
            | IntervalOp::OverlapsAfter
            | IntervalOp::MeetsBefore
            | IntervalOp::MeetsAfter
            | IntervalOp::ProperlyIncludes
            | IntervalOp::ProperlyIncludedIn => false,
        };
        return FhirPathValue::Boolean(result);
    }

    let (Some(a), Some(b)) = (as_interval(left), as_interval(right)) else {
        return FhirPathValue::Null;
    };

    let result = interval_relation(op, &a, &b, precision, converter);
    match result {
        Some(b) => FhirPathValue::Boolean(b),
        None => FhirPathValue::Null,
    }
}

fn interval_relation(
    op: IntervalOp,
    a: &Interval,
    b: &Interval,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> Option<bool> {
    let cmp = |x: &FhirPathValue, x_low: bool, y: &FhirPathValue, y_low: bool| {
        bound_cmp(x, x_low, y, y_low, precision, converter)
    };

    match op {
        // A entirely before B: A.high below B.low, or touching with an open
        // side
        IntervalOp::Before => {
            let ordering = cmp(&a.high, false, &b.low, true)?;
            Some(match ordering {
                Ordering::Less => true,
                Ordering::Equal => !(a.high_closed && b.low_closed),
                Ordering::Greater => false,
            })
        }
        IntervalOp::After => {
            let ordering = cmp(&a.low, true, &b.high, false)?;
            Some(match ordering {
                Ordering::Greater => true,
                Ordering::Equal => !(a.low_closed && b.high_closed),
                Ordering::Less => false,
            })
        }
        IntervalOp::SameAs => Some(
            cmp(&a.low, true, &b.low, true)? == Ordering::Equal
                && cmp(&a.high, false, &b.high, false)? == Ordering::Equal
                && a.low_closed == b.low_closed
                && a.high_closed == b.high_closed,
        ),
        IntervalOp::SameOrBefore => {
            let before = interval_relation(IntervalOp::Before, a, b, precision, converter)?;
            let same = interval_relation(IntervalOp::SameAs, a, b, precision, converter)?;
            Some(before || same)
        }
        IntervalOp::SameOrAfter => {
            let after = interval_relation(IntervalOp::After, a, b, precision, converter)?;
            let same = interval_relation(IntervalOp::SameAs, a, b, precision, converter)?;
            Some(after || same)
        }
        // Any point in common
        IntervalOp::Overlaps => {
            let before = interval_relation(IntervalOp::Before, a, b, precision, converter)?;
            let after = interval_relation(IntervalOp::After, a, b, precision, converter)?;
            Some(!before && !after)
        }
        IntervalOp::OverlapsBefore => {
            let overlaps = interval_relation(IntervalOp::Overlaps, a, b, precision, converter)?;
            Some(overlaps && cmp(&a.low, true, &b.low, true)? == Ordering::Less)
        }
        IntervalOp::OverlapsAfter => {
            let overlaps = interval_relation(IntervalOp::Overlaps, a, b, precision, converter)?;
            Some(overlaps && cmp(&a.high, false, &b.high, false)? == Ordering::Greater)
        }
        // Adjacent with no gap and no overlap
        IntervalOp::Meets => {
            let meets_before =
                interval_relation(IntervalOp::MeetsBefore, a, b, precision, converter)?;
            let meets_after =
                interval_relation(IntervalOp::MeetsAfter, a, b, precision, converter)?;
            Some(meets_before || meets_after)
        }
        IntervalOp::MeetsBefore => {
            if a.high.is_null() || b.low.is_null() {
                return Some(false);
            }
            match cmp(&a.high, false, &b.low, true)? {
                // Exactly one side closed: shared boundary, no overlap, no gap
                Ordering::Equal => Some(a.high_closed != b.low_closed),
                Ordering::Less => Some(adjacent(&a.high, &b.low)
                    && a.high_closed
                    && b.low_closed),
                Ordering::Greater => Some(false),
            }
        }
        IntervalOp::MeetsAfter => {
            interval_relation(IntervalOp::MeetsBefore, b, a, precision, converter)
        }
        // A starts B: same low, A within B
        IntervalOp::Starts => Some(
            cmp(&a.low, true, &b.low, true)? == Ordering::Equal
                && a.low_closed == b.low_closed
                && high_within(a, b, precision, converter)?,
        ),
        IntervalOp::Ends => Some(
            cmp(&a.high, false, &b.high, false)? == Ordering::Equal
                && a.high_closed == b.high_closed
                && low_within(a, b, precision, converter)?,
        ),
        IntervalOp::Includes => {
            interval_relation(IntervalOp::IncludedIn, b, a, precision, converter)
        }
        // A included in B: B.low <= A.low and A.high <= B.high, respecting
        // closedness at equal bounds
        IntervalOp::IncludedIn => {
            Some(low_within(a, b, precision, converter)? && high_within(a, b, precision, converter)?)
        }
        IntervalOp::ProperlyIncludes => {
            let includes = interval_relation(IntervalOp::Includes, a, b, precision, converter)?;
            let same = interval_relation(IntervalOp::SameAs, a, b, precision, converter)?;
            Some(includes && !same)
        }
        IntervalOp::ProperlyIncludedIn => {
            let included = interval_relation(IntervalOp::IncludedIn, a, b, precision, converter)?;
            let same = interval_relation(IntervalOp::SameAs, a, b, precision, converter)?;
            Some(included && !same)
        }
    }
}

/// A.low falls inside B's low bound.
fn low_within(
    a: &Interval,
    b: &Interval,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> Option<bool> {
    match bound_cmp(&a.low, true, &b.low, true, precision, converter)? {
        Ordering::Greater => Some(true),
        Ordering::Equal => Some(b.low_closed || !a.low_closed),
        Ordering::Less => Some(false),
    }
}

/// A.high falls inside B's high bound.
fn high_within(
    a: &Interval,
    b: &Interval,
    precision: Option<DateTimePrecision>,
    converter: &UcumConverter,
) -> Option<bool> {
    match bound_cmp(&a.high, false, &b.high, false, precision, converter)? {
        Ordering::Less => Some(true),
        Ordering::Equal => Some(b.high_closed || !a.high_closed),
        Ordering::Greater => Some(false),
    }
}

/// Successor adjacency for discrete types (integer intervals, day-precision
/// dates).
fn adjacent(high: &FhirPathValue, low: &FhirPathValue) -> bool {
    use FhirPathValue::*;
    match (high, low) {
        (Integer(a), Integer(b)) | (Long(a), Long(b)) => a.checked_add(1) == Some(*b),
        (Date(a), Date(b)) => a
            .add_duration(1, DateTimePrecision::Day)
            .map(|next| next == *b)
            .unwrap_or(false),
        _ => false,
    }
}

/// Whole calendar periods between two temporal points (`duration in`).
pub fn duration_between(
    low: &FhirPathValue,
    high: &FhirPathValue,
    precision: DateTimePrecision,
) -> FhirPathValue {
    use FhirPathValue::*;
    let components = |value: &FhirPathValue| -> Option<(i32, Option<u32>, Option<u32>, [Option<u32>; 4])> {
        match value {
            Date(d) => Some((d.year, d.month, d.day, [None, None, None, None])),
            DateTime(dt) => {
                let utc = dt.to_utc();
                Some((
                    utc.date.year,
                    utc.date.month,
                    utc.date.day,
                    [utc.hour, utc.minute, utc.second, utc.millisecond],
                ))
            }
            _ => None,
        }
    };
    let (Some(a), Some(b)) = (components(low), components(high)) else {
        return Null;
    };

    match precision {
        DateTimePrecision::Year => {
            let (Some(am), Some(bm)) = (a.1, b.1) else {
                return Integer((b.0 - a.0) as i64);
            };
            let mut years = (b.0 - a.0) as i64;
            if (bm, b.2.unwrap_or(1)) < (am, a.2.unwrap_or(1)) {
                years -= 1;
            }
            Integer(years)
        }
        DateTimePrecision::Month => {
            let (Some(am), Some(bm)) = (a.1, b.1) else {
                return Null;
            };
            let mut months =
                (b.0 as i64 * 12 + bm as i64) - (a.0 as i64 * 12 + am as i64);
            if b.2.unwrap_or(1) < a.2.unwrap_or(1) {
                months -= 1;
            }
            Integer(months)
        }
        DateTimePrecision::Week | DateTimePrecision::Day => {
            let (Some(am), Some(ad), Some(bm), Some(bd)) = (a.1, a.2, b.1, b.2) else {
                return Null;
            };
            let days = days_from_civil(b.0, bm, bd) - days_from_civil(a.0, am, ad);
            if precision == DateTimePrecision::Week {
                Integer(days / 7)
            } else {
                Integer(days)
            }
        }
        _ => {
            let (Some(am), Some(ad), Some(bm), Some(bd)) = (a.1, a.2, b.1, b.2) else {
                return Null;
            };
            let to_millis = |date_days: i64, time: [Option<u32>; 4]| -> Option<i64> {
                let [hour, minute, second, ms] = time;
                Some(
                    date_days * 86_400_000
                        + hour? as i64 * 3_600_000
                        + minute.unwrap_or(0) as i64 * 60_000
                        + second.unwrap_or(0) as i64 * 1000
                        + ms.unwrap_or(0) as i64,
                )
            };
            let (Some(start), Some(end)) = (
                to_millis(days_from_civil(a.0, am, ad), a.3),
                to_millis(days_from_civil(b.0, bm, bd), b.3),
            ) else {
                return Null;
            };
            let unit_ms: i64 = match precision {
                DateTimePrecision::Hour => 3_600_000,
                DateTimePrecision::Minute => 60_000,
                DateTimePrecision::Second => 1000,
                _ => 1,
            };
            Integer((end - start).div_euclid(unit_ms))
        }
    }
}

/// Boundary-count difference (`difference in`): truncate both to the
/// precision, then count periods.
pub fn difference_between(
    low: &FhirPathValue,
    high: &FhirPathValue,
    precision: DateTimePrecision,
) -> FhirPathValue {
    let truncated = |value: &FhirPathValue| truncate_point(value, precision);
    let (Some(a), Some(b)) = (truncated(low), truncated(high)) else {
        return FhirPathValue::Null;
    };
    match precision {
        DateTimePrecision::Year => match (&a, &b) {
            (FhirPathValue::Date(x), FhirPathValue::Date(y)) => {
                FhirPathValue::Integer((y.year - x.year) as i64)
            }
            (FhirPathValue::DateTime(x), FhirPathValue::DateTime(y)) => {
                FhirPathValue::Integer((y.date.year - x.date.year) as i64)
            }
            _ => FhirPathValue::Null,
        },
        _ => duration_between(&a, &b, precision),
    }
}

/// Numeric midpoint width: `high - low`.
pub fn interval_width(interval: &Interval, converter: &UcumConverter) -> FhirPathValue {
    use fhirkit_fhirpath::evaluator::operations::arithmetic;
    if interval.low_unbounded() || interval.high_unbounded() {
        return FhirPathValue::Null;
    }
    arithmetic::subtract_values(&interval.high, &interval.low, converter)
}

/// `start of` / `end of`, honoring closedness on discrete types.
pub fn interval_boundary(interval: &Interval, low_side: bool) -> FhirPathValue {
    let (value, closed) = if low_side {
        (&interval.low, interval.low_closed)
    } else {
        (&interval.high, interval.high_closed)
    };
    if closed || value.is_null() {
        return value.clone();
    }
    // Open discrete bounds step inward
    match value {
        FhirPathValue::Integer(i) => {
            let stepped = if low_side { i.checked_add(1) } else { i.checked_sub(1) };
            stepped.map(FhirPathValue::Integer).unwrap_or(FhirPathValue::Null)
        }
        FhirPathValue::Long(i) => {
            let stepped = if low_side { i.checked_add(1) } else { i.checked_sub(1) };
            stepped.map(FhirPathValue::Long).unwrap_or(FhirPathValue::Null)
        }
        other => other.clone(),
    }
}

/// `predecessor of` / `successor of` for ordered scalars.
pub fn step_value(value: &FhirPathValue, forward: bool) -> FhirPathValue {
    use FhirPathValue::*;
    let delta: i64 = if forward { 1 } else { -1 };
    match value {
        Integer(i) => i.checked_add(delta).map(Integer).unwrap_or(Null),
        Long(i) => i.checked_add(delta).map(Long).unwrap_or(Null),
        Decimal(d) => Decimal(d + rust_decimal::Decimal::new(delta, 8)),
        Date(d) => {
            let unit = match d.precision() {
                DateTimePrecision::Year => DateTimePrecision::Year,
                DateTimePrecision::Month => DateTimePrecision::Month,
                _ => DateTimePrecision::Day,
            };
            d.add_duration(delta, unit).map(Date).unwrap_or(Null)
        }
        DateTime(dt) => {
            let unit = dt.precision();
            dt.add_duration(delta, unit).map(DateTime).unwrap_or(Null)
        }
        _ => Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_fhirpath::FhirDate;

    fn int(i: i64) -> FhirPathValue {
        FhirPathValue::Integer(i)
    }

    fn interval(low: i64, high: i64, low_closed: bool, high_closed: bool) -> FhirPathValue {
        FhirPathValue::Interval(Box::new(Interval::new(
            int(low),
            int(high),
            low_closed,
            high_closed,
        )))
    }

    fn check(op: IntervalOp, a: &FhirPathValue, b: &FhirPathValue) -> FhirPathValue {
        evaluate_interval_op(op, a, b, None, &UcumConverter::new())
    }

    #[test]
    fn test_before_after_overlaps() {
        let a = interval(1, 5, true, true);
        let b = interval(6, 10, true, true);
        assert_eq!(check(IntervalOp::Before, &a, &b), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::After, &b, &a), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::Overlaps, &a, &b), FhirPathValue::Boolean(false));

        let c = interval(4, 8, true, true);
        assert_eq!(check(IntervalOp::Overlaps, &a, &c), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::OverlapsBefore, &a, &c), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::OverlapsAfter, &c, &a), FhirPathValue::Boolean(true));
    }

    #[test]
    fn test_overlaps_is_not_before_and_not_after() {
        let cases = [
            (interval(1, 5, true, true), interval(4, 8, true, true)),
            (interval(1, 5, true, true), interval(6, 10, true, true)),
            (interval(1, 10, true, true), interval(2, 3, true, true)),
            (interval(1, 5, true, false), interval(5, 8, true, true)),
        ];
        for (a, b) in cases {
            let overlaps = check(IntervalOp::Overlaps, &a, &b);
            let before = check(IntervalOp::Before, &a, &b);
            let after = check(IntervalOp::After, &a, &b);
            assert_eq!(
                overlaps,
                FhirPathValue::Boolean(
                    before == FhirPathValue::Boolean(false)
                        && after == FhirPathValue::Boolean(false)
                ),
                "{a:?} vs {b:?}"
            );
        }
    }

    #[test]
    fn test_open_bounds_touching() {
        // [1,5) before [5,8]: touching but the boundary is open on one side
        let a = interval(1, 5, true, false);
        let b = interval(5, 8, true, true);
        assert_eq!(check(IntervalOp::Before, &a, &b), FhirPathValue::Boolean(true));
        // [1,5] meets [6,8] for integers (successor adjacency)
        let c = interval(1, 5, true, true);
        let d = interval(6, 8, true, true);
        assert_eq!(check(IntervalOp::Meets, &c, &d), FhirPathValue::Boolean(true));
        // and a shared closed boundary overlaps instead of meeting
        let e = interval(5, 8, true, true);
        assert_eq!(check(IntervalOp::Meets, &c, &e), FhirPathValue::Boolean(false));
        assert_eq!(check(IntervalOp::Overlaps, &c, &e), FhirPathValue::Boolean(true));
    }

    #[test]
    fn test_inclusion() {
        let outer = interval(1, 10, true, true);
        let inner = interval(3, 5, true, true);
        assert_eq!(check(IntervalOp::Includes, &outer, &inner), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::IncludedIn, &inner, &outer), FhirPathValue::Boolean(true));
        assert_eq!(
            check(IntervalOp::ProperlyIncludes, &outer, &outer),
            FhirPathValue::Boolean(false)
        );

        // point during interval
        assert_eq!(check(IntervalOp::IncludedIn, &int(4), &outer), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::IncludedIn, &int(11), &outer), FhirPathValue::Boolean(false));
    }

    #[test]
    fn test_unbounded_endpoints() {
        let unbounded_high = FhirPathValue::Interval(Box::new(Interval::new(
            int(5),
            FhirPathValue::Null,
            true,
            true,
        )));
        let finite = interval(6, 10, true, true);
        assert_eq!(
            check(IntervalOp::Includes, &unbounded_high, &finite),
            FhirPathValue::Boolean(true)
        );
        assert_eq!(
            check(IntervalOp::Before, &unbounded_high, &finite),
            FhirPathValue::Boolean(false)
        );
    }

    #[test]
    fn test_starts_ends() {
        let outer = interval(1, 10, true, true);
        let prefix = interval(1, 4, true, true);
        let suffix = interval(7, 10, true, true);
        assert_eq!(check(IntervalOp::Starts, &prefix, &outer), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::Ends, &suffix, &outer), FhirPathValue::Boolean(true));
        assert_eq!(check(IntervalOp::Starts, &suffix, &outer), FhirPathValue::Boolean(false));
    }

    #[test]
    fn test_point_comparisons_with_precision() {
        let march = FhirPathValue::Date("2024-03-15".parse().unwrap());
        let april = FhirPathValue::Date("2024-04-02".parse().unwrap());
        assert_eq!(
            evaluate_interval_op(
                IntervalOp::SameAs,
                &march,
                &april,
                Some(DateTimePrecision::Year),
                &UcumConverter::new()
            ),
            FhirPathValue::Boolean(true)
        );
        // coercion to day when only month precision exists: null
        let month_only = FhirPathValue::Date("2024-03".parse().unwrap());
        assert_eq!(
            evaluate_interval_op(
                IntervalOp::Before,
                &month_only,
                &april,
                Some(DateTimePrecision::Day),
                &UcumConverter::new()
            ),
            FhirPathValue::Null
        );
    }

    #[test]
    fn test_duration_between() {
        let a = FhirPathValue::Date(FhirDate::from_ymd(2023, 3, 15));
        let b = FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 14));
        assert_eq!(duration_between(&a, &b, DateTimePrecision::Year), int(0));
        let c = FhirPathValue::Date(FhirDate::from_ymd(2024, 3, 15));
        assert_eq!(duration_between(&a, &c, DateTimePrecision::Year), int(1));
        assert_eq!(duration_between(&a, &c, DateTimePrecision::Month), int(12));
        assert_eq!(
            duration_between(&a, &c, DateTimePrecision::Day),
            int(366) // 2024 is a leap year
        );

        // difference counts boundaries
        let dec = FhirPathValue::Date(FhirDate::from_ymd(2023, 12, 31));
        let jan = FhirPathValue::Date(FhirDate::from_ymd(2024, 1, 1));
        assert_eq!(duration_between(&dec, &jan, DateTimePrecision::Year), int(0));
        assert_eq!(difference_between(&dec, &jan, DateTimePrecision::Year), int(1));
    }

    #[test]
    fn test_boundary_and_step() {
        let open = Interval::new(int(1), int(5), false, false);
        assert_eq!(interval_boundary(&open, true), int(2));
        assert_eq!(interval_boundary(&open, false), int(4));

        assert_eq!(step_value(&int(5), true), int(6));
        let date = FhirPathValue::Date(FhirDate::from_ymd(2024, 1, 1));
        assert_eq!(
            step_value(&date, false),
            FhirPathValue::Date(FhirDate::from_ymd(2023, 12, 31))
        );
    }
}
