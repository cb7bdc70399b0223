//! Pay period derivation.
//!
//! Monthly periods follow the calendar months of the tax year (period 1 is
//! March). Weekly and fortnightly periods are fixed-length blocks counted
//! from 1 March.

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::PayrollSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::{PayFrequency, PayPeriod, TaxYear};

/// Derives the dates of one pay period.
///
/// # Errors
///
/// Returns [`EngineError::InvalidPeriod`] when `period_number` is outside
/// `1..=periods_per_year` for the frequency.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::calculate_pay_period;
/// use payrun_engine::config::PayrollSettings;
/// use payrun_engine::models::{PayFrequency, TaxYear};
/// use chrono::NaiveDate;
///
/// let period = calculate_pay_period(
///     PayFrequency::Monthly,
///     1,
///     TaxYear::new(2025),
///     &PayrollSettings::default(),
/// )
/// .unwrap();
/// assert_eq!(period.start_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
/// assert_eq!(period.end_date, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
/// assert_eq!(period.pay_date, NaiveDate::from_ymd_opt(2025, 3, 25).unwrap());
/// ```
pub fn calculate_pay_period(
    frequency: PayFrequency,
    period_number: u32,
    tax_year: TaxYear,
    settings: &PayrollSettings,
) -> EngineResult<PayPeriod> {
    let max = frequency.periods_per_year();
    if period_number == 0 || period_number > max {
        return Err(EngineError::InvalidPeriod {
            frequency: frequency.to_string(),
            period_number,
            max,
        });
    }

    let (start_date, end_date, cut_off_date, pay_date) = match frequency {
        PayFrequency::Monthly => {
            let (year, month) = month_of_period(tax_year, period_number);
            let start = date(year, month, 1)?;
            let end = last_day_of_month(start)?;
            let cut_off = clamp_to_month(start, end, settings.cut_off_day)?;
            let pay = clamp_to_month(start, end, settings.pay_day)?;
            (start, end, cut_off, pay)
        }
        PayFrequency::Weekly | PayFrequency::Fortnightly => {
            let length = i64::from(7 * (52 / max));
            let start = tax_year.start_date() + Duration::days(length * i64::from(period_number - 1));
            let end = start + Duration::days(length - 1);
            let pay = end + Duration::days(settings.short_period_pay_offset_days);
            (start, end, end, pay)
        }
    };

    Ok(PayPeriod {
        frequency,
        period_number,
        tax_year,
        start_date,
        end_date,
        cut_off_date,
        pay_date,
    })
}

/// Calendar (year, month) of a monthly period; period 1 is March.
fn month_of_period(tax_year: TaxYear, period_number: u32) -> (i32, u32) {
    let zero_based = 2 + period_number - 1;
    let year = tax_year.start_year() + (zero_based / 12) as i32;
    (year, zero_based % 12 + 1)
}

fn date(year: i32, month: u32, day: u32) -> EngineResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| EngineError::CalculationError {
        message: format!("invalid calendar date {}-{:02}-{:02}", year, month, day),
    })
}

fn last_day_of_month(first: NaiveDate) -> EngineResult<NaiveDate> {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    date(year, month, 1)?
        .pred_opt()
        .ok_or_else(|| EngineError::CalculationError {
            message: format!("no day precedes {}-{:02}-01", year, month),
        })
}

fn clamp_to_month(first: NaiveDate, last: NaiveDate, day: u32) -> EngineResult<NaiveDate> {
    date(first.year(), first.month(), day.min(last.day()))
}
