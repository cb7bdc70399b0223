//! Pay frequency, tax year and pay period models.
//!
//! This module contains the [`PayFrequency`], [`TaxYear`] and [`PayPeriod`]
//! types that define the calculation window of a pay run.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How often employees on a run are paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrequency {
    /// 52 periods per tax year.
    Weekly,
    /// 26 periods per tax year.
    Fortnightly,
    /// 12 periods per tax year.
    Monthly,
}

impl PayFrequency {
    /// Returns the number of pay periods in one tax year.
    ///
    /// # Example
    ///
    /// ```
    /// use payrun_engine::models::PayFrequency;
    ///
    /// assert_eq!(PayFrequency::Weekly.periods_per_year(), 52);
    /// assert_eq!(PayFrequency::Fortnightly.periods_per_year(), 26);
    /// assert_eq!(PayFrequency::Monthly.periods_per_year(), 12);
    /// ```
    pub fn periods_per_year(&self) -> u32 {
        match self {
            PayFrequency::Weekly => 52,
            PayFrequency::Fortnightly => 26,
            PayFrequency::Monthly => 12,
        }
    }

    /// Returns the snake_case name used in configuration and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayFrequency::Weekly => "weekly",
            PayFrequency::Fortnightly => "fortnightly",
            PayFrequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PayFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statutory tax year that starts on 1 March.
///
/// Labels take the form `"YYYY/YYYY"` where the second year is the first plus one.
///
/// # Example
///
/// ```
/// use payrun_engine::models::TaxYear;
/// use chrono::NaiveDate;
///
/// let year: TaxYear = "2025/2026".parse().unwrap();
/// assert_eq!(year.start_year(), 2025);
/// assert_eq!(year.start_date(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
/// assert_eq!(year.to_string(), "2025/2026");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxYear {
    start_year: i32,
}

impl TaxYear {
    /// Creates the tax year beginning in March of `start_year`.
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    /// The calendar year in which the tax year begins.
    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    /// 1 March of the starting year.
    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year, 3, 1).unwrap_or(NaiveDate::MIN)
    }

    /// The last day of February in the following year.
    pub fn end_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year + 1, 3, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// Returns the label used in configuration file names, e.g. `2025-2026`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.start_year, self.start_year + 1)
    }
}

impl FromStr for TaxYear {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidTaxYear {
            label: s.to_string(),
        };

        let (first, second) = s.trim().split_once('/').ok_or_else(invalid)?;
        if first.len() != 4 || second.len() != 4 {
            return Err(invalid());
        }
        let first: i32 = first.parse().map_err(|_| invalid())?;
        let second: i32 = second.parse().map_err(|_| invalid())?;
        if second != first + 1 {
            return Err(invalid());
        }

        Ok(TaxYear::new(first))
    }
}

impl TryFrom<String> for TaxYear {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxYear> for String {
    fn from(year: TaxYear) -> Self {
        year.to_string()
    }
}

impl fmt::Display for TaxYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start_year, self.start_year + 1)
    }
}

/// The dates governing one pay period of a tax year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPeriod {
    /// The pay frequency the period belongs to.
    pub frequency: PayFrequency,
    /// The 1-based period number within the tax year.
    pub period_number: u32,
    /// The tax year of the period.
    pub tax_year: TaxYear,
    /// The start date of the pay period (inclusive).
    pub start_date: NaiveDate,
    /// The end date of the pay period (inclusive).
    pub end_date: NaiveDate,
    /// The last date on which inputs are accepted for the period.
    pub cut_off_date: NaiveDate,
    /// The date employees are paid.
    pub pay_date: NaiveDate,
}

impl PayPeriod {
    /// Checks if a given date falls within this pay period.
    ///
    /// The check is inclusive of both start and end dates.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}
