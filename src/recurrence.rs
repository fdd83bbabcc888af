//! Next-occurrence computation for recurring tasks.
//!
//! Everything here is pure: no I/O, no clock reads, inputs are never mutated.
//! All arithmetic happens in UTC.

use crate::types::{Frequency, FrequencyOn, FrequencyType, IntervalUnit, Task};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("bad frequency: {0}")]
    BadFrequency(String),
}

pub type RecurrenceResult<T> = std::result::Result<T, RecurrenceError>;

fn bad(reason: impl Into<String>) -> RecurrenceError {
    RecurrenceError::BadFrequency(reason.into())
}

/// Validated form of a [`Frequency`] descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom {
        rule: CustomRule,
        /// Wall-clock override applied to the base before advancing.
        time: Option<NaiveTime>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomRule {
    Interval { every: u32, unit: IntervalUnit },
    /// Indexed by weekday, 0 = Sunday.
    DaysOfWeek { days: [bool; 7] },
    /// `day` is the day of month; `months` is indexed 0 = January.
    DaysOfMonth { day: u32, months: [bool; 12] },
}

impl TryFrom<&Frequency> for Schedule {
    type Error = RecurrenceError;

    fn try_from(freq: &Frequency) -> RecurrenceResult<Self> {
        match freq.kind {
            FrequencyType::Once => Ok(Schedule::Once),
            FrequencyType::Daily => Ok(Schedule::Daily),
            FrequencyType::Weekly => Ok(Schedule::Weekly),
            FrequencyType::Monthly => Ok(Schedule::Monthly),
            FrequencyType::Yearly => Ok(Schedule::Yearly),
            FrequencyType::Custom => {
                let time = freq.time.as_deref().map(parse_time).transpose()?;
                let rule = match freq.on {
                    None => return Err(bad("custom frequency requires 'on'")),
                    Some(FrequencyOn::Interval) => {
                        let every = positive_every(freq.every)?;
                        let unit = freq
                            .unit
                            .ok_or_else(|| bad("interval frequency requires 'unit'"))?;
                        CustomRule::Interval { every, unit }
                    }
                    Some(FrequencyOn::DaysOfTheWeek) => {
                        let mut days = [false; 7];
                        if freq.days.is_empty() {
                            return Err(bad("days_of_the_week requires at least one day"));
                        }
                        for &d in &freq.days {
                            let slot = days
                                .get_mut(d as usize)
                                .ok_or_else(|| bad(format!("weekday {} out of range 0..6", d)))?;
                            *slot = true;
                        }
                        CustomRule::DaysOfWeek { days }
                    }
                    Some(FrequencyOn::DayOfTheMonths) => {
                        let day = positive_every(freq.every)?;
                        if day > 31 {
                            return Err(bad(format!("day of month {} out of range 1..31", day)));
                        }
                        let mut months = [false; 12];
                        if freq.months.is_empty() {
                            return Err(bad("day_of_the_months requires at least one month"));
                        }
                        for &m in &freq.months {
                            let slot = months
                                .get_mut(m as usize)
                                .ok_or_else(|| bad(format!("month {} out of range 0..11", m)))?;
                            *slot = true;
                        }
                        CustomRule::DaysOfMonth { day, months }
                    }
                };
                Ok(Schedule::Custom { rule, time })
            }
        }
    }
}

fn positive_every(every: Option<u32>) -> RecurrenceResult<u32> {
    match every {
        Some(n) if n > 0 => Ok(n),
        Some(_) => Err(bad("'every' must be positive")),
        None => Err(bad("'every' is required")),
    }
}

fn parse_time(s: &str) -> RecurrenceResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| bad(format!("invalid time of day '{}'", s)))
}

/// Check that a descriptor is usable without computing anything.
pub fn validate(freq: &Frequency) -> RecurrenceResult<()> {
    Schedule::try_from(freq).map(|_| ())
}

/// Compute the next due date of `task` when it is completed at `completed_at`.
///
/// `Ok(None)` means the task terminates: it is a one-shot task or the next
/// occurrence would fall after its end date.
pub fn next_due(task: &Task, completed_at: DateTime<Utc>) -> RecurrenceResult<Option<DateTime<Utc>>> {
    next_occurrence(
        &task.frequency,
        task.next_due_date,
        task.end_date,
        task.is_rolling,
        completed_at,
    )
}

/// Field-level form of [`next_due`].
pub fn next_occurrence(
    frequency: &Frequency,
    current_due: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    is_rolling: bool,
    completed_at: DateTime<Utc>,
) -> RecurrenceResult<Option<DateTime<Utc>>> {
    let schedule = Schedule::try_from(frequency)?;

    let mut base = if is_rolling {
        completed_at
    } else {
        current_due.unwrap_or(completed_at)
    };

    if let Schedule::Custom {
        time: Some(time), ..
    } = &schedule
    {
        base = base.date_naive().and_time(*time).and_utc();
    }

    let candidate = match advance(&schedule, base)? {
        Some(candidate) => candidate,
        None => return Ok(None),
    };

    match end_date {
        Some(end) if candidate > end => Ok(None),
        _ => Ok(Some(candidate)),
    }
}

fn out_of_range() -> RecurrenceError {
    bad("next occurrence is out of the representable date range")
}

fn add_days(base: DateTime<Utc>, days: i64) -> RecurrenceResult<DateTime<Utc>> {
    TimeDelta::try_days(days)
        .and_then(|delta| base.checked_add_signed(delta))
        .ok_or_else(out_of_range)
}

fn add_months(base: DateTime<Utc>, months: u32) -> RecurrenceResult<DateTime<Utc>> {
    base.checked_add_months(Months::new(months))
        .ok_or_else(out_of_range)
}

fn advance(schedule: &Schedule, base: DateTime<Utc>) -> RecurrenceResult<Option<DateTime<Utc>>> {
    let next = match schedule {
        Schedule::Once => return Ok(None),
        Schedule::Daily => add_days(base, 1)?,
        Schedule::Weekly => add_days(base, 7)?,
        // chrono clamps to the last day of shorter months (Jan 31 -> Feb 29/28).
        Schedule::Monthly => add_months(base, 1)?,
        Schedule::Yearly => add_months(base, 12)?,
        Schedule::Custom { rule, .. } => match rule {
            CustomRule::Interval { every, unit } => {
                let every = *every;
                match unit {
                    IntervalUnit::Hours => TimeDelta::try_hours(i64::from(every))
                        .and_then(|delta| base.checked_add_signed(delta))
                        .ok_or_else(out_of_range)?,
                    IntervalUnit::Days => add_days(base, i64::from(every))?,
                    IntervalUnit::Weeks => add_days(base, i64::from(every) * 7)?,
                    IntervalUnit::Months => add_months(base, every)?,
                    IntervalUnit::Years => {
                        add_months(base, every.checked_mul(12).ok_or_else(out_of_range)?)?
                    }
                }
            }
            CustomRule::DaysOfWeek { days } => next_weekday(base, days)?,
            CustomRule::DaysOfMonth { day, months } => next_month_day(base, *day, months)?,
        },
    };
    Ok(Some(next))
}

fn next_weekday(base: DateTime<Utc>, days: &[bool; 7]) -> RecurrenceResult<DateTime<Utc>> {
    for offset in 1..=7 {
        let candidate = add_days(base, offset)?;
        if days[candidate.weekday().num_days_from_sunday() as usize] {
            return Ok(candidate);
        }
    }
    Err(bad("days_of_the_week matched no weekday"))
}

fn days_in_month(first_of_month: NaiveDate) -> Option<u32> {
    first_of_month
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
}

fn next_month_day(
    base: DateTime<Utc>,
    day: u32,
    months: &[bool; 12],
) -> RecurrenceResult<DateTime<Utc>> {
    let first = base.date_naive().with_day(1).ok_or_else(out_of_range)?;
    for offset in 0..=12 {
        let month_start = first
            .checked_add_months(Months::new(offset))
            .ok_or_else(out_of_range)?;
        if !months[month_start.month0() as usize] {
            continue;
        }
        let last_day = days_in_month(month_start).ok_or_else(out_of_range)?;
        let candidate = month_start
            .with_day(day.min(last_day))
            .ok_or_else(out_of_range)?
            .and_time(base.time())
            .and_utc();
        if candidate > base {
            return Ok(candidate);
        }
    }
    Err(bad("day_of_the_months matched no month"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn custom(on: FrequencyOn) -> Frequency {
        Frequency {
            kind: FrequencyType::Custom,
            on: Some(on),
            ..Frequency::default()
        }
    }

    #[test]
    fn weekly_non_rolling_advances_from_due_date() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Weekly),
            Some(at(2024, 3, 15, 10, 0, 0)),
            None,
            false,
            at(2024, 3, 16, 8, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 22, 10, 0, 0)));
    }

    #[test]
    fn weekly_rolling_advances_from_completion() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Weekly),
            Some(at(2024, 3, 15, 10, 0, 0)),
            None,
            true,
            at(2024, 3, 17, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 24, 9, 0, 0)));
    }

    #[test]
    fn once_terminates() {
        let next = next_occurrence(
            &Frequency::once(),
            Some(at(2024, 3, 15, 10, 0, 0)),
            None,
            false,
            at(2024, 3, 15, 11, 0, 0),
        )
        .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn end_date_terminates() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Daily),
            Some(at(2024, 3, 15, 10, 0, 0)),
            Some(at(2024, 3, 15, 23, 59, 59)),
            false,
            at(2024, 3, 15, 12, 0, 0),
        )
        .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn candidate_equal_to_end_date_is_kept() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Daily),
            Some(at(2024, 3, 15, 10, 0, 0)),
            Some(at(2024, 3, 16, 10, 0, 0)),
            false,
            at(2024, 3, 15, 12, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 16, 10, 0, 0)));
    }

    #[test]
    fn missing_due_date_uses_completion_as_base() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Daily),
            None,
            None,
            false,
            at(2024, 3, 15, 7, 30, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 16, 7, 30, 0)));
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Monthly),
            Some(at(2024, 1, 31, 9, 0, 0)),
            None,
            false,
            at(2024, 1, 31, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 2, 29, 9, 0, 0)));
    }

    #[test]
    fn yearly_leap_day_falls_back_to_feb_28() {
        let next = next_occurrence(
            &Frequency::of(FrequencyType::Yearly),
            Some(at(2024, 2, 29, 9, 0, 0)),
            None,
            false,
            at(2024, 2, 29, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2025, 2, 28, 9, 0, 0)));
    }

    #[test]
    fn custom_days_of_week_picks_earliest_match() {
        let mut freq = custom(FrequencyOn::DaysOfTheWeek);
        freq.days = vec![1, 3, 5];
        // 2024-03-11 is a Monday.
        let next = next_occurrence(
            &freq,
            Some(at(2024, 3, 11, 9, 0, 0)),
            None,
            false,
            at(2024, 3, 11, 12, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 13, 9, 0, 0)));
    }

    #[test]
    fn custom_days_of_week_wraps_to_same_weekday() {
        let mut freq = custom(FrequencyOn::DaysOfTheWeek);
        freq.days = vec![1];
        let next = next_occurrence(
            &freq,
            Some(at(2024, 3, 11, 9, 0, 0)),
            None,
            false,
            at(2024, 3, 11, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 18, 9, 0, 0)));
    }

    #[test]
    fn custom_interval_hours() {
        let mut freq = custom(FrequencyOn::Interval);
        freq.every = Some(6);
        freq.unit = Some(IntervalUnit::Hours);
        let next = next_occurrence(
            &freq,
            Some(at(2024, 3, 11, 22, 0, 0)),
            None,
            false,
            at(2024, 3, 11, 22, 5, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 12, 4, 0, 0)));
    }

    #[test]
    fn custom_day_of_the_months_scans_forward() {
        let mut freq = custom(FrequencyOn::DayOfTheMonths);
        freq.every = Some(15);
        freq.months = vec![5, 11]; // June, December
        let next = next_occurrence(
            &freq,
            Some(at(2024, 6, 15, 8, 0, 0)),
            None,
            false,
            at(2024, 6, 15, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 12, 15, 8, 0, 0)));
    }

    #[test]
    fn custom_day_of_the_months_same_month_when_later() {
        let mut freq = custom(FrequencyOn::DayOfTheMonths);
        freq.every = Some(31);
        freq.months = vec![1]; // February
        let next = next_occurrence(
            &freq,
            Some(at(2024, 2, 3, 8, 0, 0)),
            None,
            false,
            at(2024, 2, 3, 8, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 2, 29, 8, 0, 0)));
    }

    #[test]
    fn custom_time_overrides_base_clock() {
        let mut freq = custom(FrequencyOn::Interval);
        freq.every = Some(1);
        freq.unit = Some(IntervalUnit::Days);
        freq.time = Some("18:30".to_string());
        let next = next_occurrence(
            &freq,
            Some(at(2024, 3, 11, 9, 0, 0)),
            None,
            false,
            at(2024, 3, 11, 9, 0, 0),
        )
        .unwrap();
        assert_eq!(next, Some(at(2024, 3, 12, 18, 30, 0)));
    }

    #[test]
    fn interval_without_unit_is_bad_frequency() {
        let mut freq = custom(FrequencyOn::Interval);
        freq.every = Some(2);
        let err = next_occurrence(&freq, None, None, false, at(2024, 1, 1, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, RecurrenceError::BadFrequency(_)));
    }

    #[test]
    fn validate_rejects_out_of_range_indexes() {
        let mut freq = custom(FrequencyOn::DaysOfTheWeek);
        freq.days = vec![7];
        assert!(validate(&freq).is_err());

        let mut freq = custom(FrequencyOn::DayOfTheMonths);
        freq.every = Some(10);
        freq.months = vec![12];
        assert!(validate(&freq).is_err());

        assert!(validate(&custom(FrequencyOn::DaysOfTheWeek)).is_err());
        assert!(validate(&Frequency { kind: FrequencyType::Custom, ..Frequency::default() }).is_err());
        assert!(validate(&Frequency::of(FrequencyType::Monthly)).is_ok());
    }
}
