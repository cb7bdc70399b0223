//! Configuration types for payroll processing.
//!
//! This module contains the strongly-typed configuration structures that
//! are deserialized from YAML configuration files: tenant payroll settings
//! and the statutory tax policy table for each tax year.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{PayFrequency, TaxYear};

/// One band of the progressive income tax table.
///
/// Annual tax for income above `threshold` within this band is
/// `base_tax + (income - threshold) * rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBracket {
    /// Annual income above which the band applies.
    pub threshold: Decimal,
    /// Tax on income up to the threshold.
    pub base_tax: Decimal,
    /// Marginal rate within the band, as a fraction.
    pub rate: Decimal,
}

/// An annual tax rebate, granted from a minimum age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRebate {
    /// Rebate name, e.g. "primary".
    pub name: String,
    /// Annual rebate amount.
    pub amount: Decimal,
    /// Minimum age in years on the last day of the tax year.
    #[serde(default)]
    pub min_age: u32,
}

/// Unemployment Insurance Fund policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UifPolicy {
    /// Employee contribution rate, as a fraction.
    pub employee_rate: Decimal,
    /// Employer contribution rate, as a fraction.
    pub employer_rate: Decimal,
    /// Remuneration ceiling per month.
    pub monthly_ceiling: Decimal,
}

impl UifPolicy {
    /// The remuneration ceiling for one period at `frequency`.
    pub fn period_ceiling(&self, frequency: PayFrequency) -> Decimal {
        match frequency {
            PayFrequency::Monthly => self.monthly_ceiling,
            _ => {
                self.monthly_ceiling * Decimal::from(12)
                    / Decimal::from(frequency.periods_per_year())
            }
        }
    }
}

/// Skills Development Levy policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdlPolicy {
    /// Levy rate, as a fraction.
    pub rate: Decimal,
}

/// The statutory tables governing one tax year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPolicy {
    /// The tax year the policy applies to.
    pub tax_year: TaxYear,
    /// Progressive brackets, ascending by threshold.
    pub brackets: Vec<TaxBracket>,
    /// Age-based rebates.
    #[serde(default)]
    pub rebates: Vec<TaxRebate>,
    /// UIF rates and ceiling.
    pub uif: UifPolicy,
    /// SDL rate.
    pub sdl: SdlPolicy,
}

impl TaxPolicy {
    /// Checks the table is usable: brackets start at zero, ascend, and all rates are fractions.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |message: String| EngineError::InvalidConfig {
            message: format!("tax year {}: {}", self.tax_year, message),
        };

        let first = self
            .brackets
            .first()
            .ok_or_else(|| invalid("at least one tax bracket is required".to_string()))?;
        if first.threshold != Decimal::ZERO {
            return Err(invalid("the first bracket must start at 0".to_string()));
        }
        for pair in self.brackets.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return Err(invalid(format!(
                    "bracket thresholds must ascend ({} follows {})",
                    pair[1].threshold, pair[0].threshold
                )));
            }
        }

        let rates = self
            .brackets
            .iter()
            .map(|b| ("bracket rate", b.rate))
            .chain([
                ("uif employee_rate", self.uif.employee_rate),
                ("uif employer_rate", self.uif.employer_rate),
                ("sdl rate", self.sdl.rate),
            ]);
        for (name, rate) in rates {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(invalid(format!("{} {} must be between 0 and 1", name, rate)));
            }
        }

        if self.uif.monthly_ceiling.is_sign_negative() {
            return Err(invalid("uif monthly_ceiling must not be negative".to_string()));
        }

        Ok(())
    }

    /// Returns the bracket that applies to an annual income.
    pub fn bracket_for(&self, annual_income: Decimal) -> Option<&TaxBracket> {
        self.brackets
            .iter()
            .rfind(|b| annual_income > b.threshold || b.threshold == Decimal::ZERO)
    }
}

/// Working days in one pay period, used to value unpaid leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDays {
    /// Working days in a weekly period.
    pub weekly: Decimal,
    /// Working days in a fortnightly period.
    pub fortnightly: Decimal,
    /// Working days in a monthly period.
    pub monthly: Decimal,
}

impl WorkingDays {
    /// Working days for a period at `frequency`.
    pub fn for_frequency(&self, frequency: PayFrequency) -> Decimal {
        match frequency {
            PayFrequency::Weekly => self.weekly,
            PayFrequency::Fortnightly => self.fortnightly,
            PayFrequency::Monthly => self.monthly,
        }
    }
}

impl Default for WorkingDays {
    fn default() -> Self {
        Self {
            weekly: Decimal::from(5),
            fortnightly: Decimal::from(10),
            monthly: Decimal::new(2167, 2),
        }
    }
}

/// Tenant payroll settings from payroll.yaml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayrollSettings {
    /// Day of month inputs close for monthly runs.
    pub cut_off_day: u32,
    /// Day of month employees are paid for monthly runs.
    pub pay_day: u32,
    /// Days after period end that weekly and fortnightly runs are paid.
    pub short_period_pay_offset_days: i64,
    /// Whether the tenant is registered for SDL.
    pub sdl_registered: bool,
    /// Net pay movement, in percent, that raises a large variance warning.
    pub large_variance_percent: Decimal,
    /// Employees calculated per parallel batch.
    pub calculation_batch_size: usize,
    /// Attempts made when a concurrent writer changes the run mid-transition.
    pub max_transition_attempts: u32,
    /// Working days per period.
    pub working_days: WorkingDays,
}

impl Default for PayrollSettings {
    fn default() -> Self {
        Self {
            cut_off_day: 25,
            pay_day: 25,
            short_period_pay_offset_days: 0,
            sdl_registered: true,
            large_variance_percent: Decimal::from(20),
            calculation_batch_size: 250,
            max_transition_attempts: 3,
            working_days: WorkingDays::default(),
        }
    }
}

impl PayrollSettings {
    /// Checks the settings are usable.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |message: &str| EngineError::InvalidConfig {
            message: message.to_string(),
        };
        if !(1..=31).contains(&self.cut_off_day) {
            return Err(invalid("cut_off_day must be between 1 and 31"));
        }
        if !(1..=31).contains(&self.pay_day) {
            return Err(invalid("pay_day must be between 1 and 31"));
        }
        if self.calculation_batch_size == 0 {
            return Err(invalid("calculation_batch_size must be at least 1"));
        }
        if self.max_transition_attempts == 0 {
            return Err(invalid("max_transition_attempts must be at least 1"));
        }
        if self.large_variance_percent.is_sign_negative() {
            return Err(invalid("large_variance_percent must not be negative"));
        }
        for frequency in [PayFrequency::Weekly, PayFrequency::Fortnightly, PayFrequency::Monthly] {
            if self.working_days.for_frequency(frequency) <= Decimal::ZERO {
                return Err(invalid("working_days must be positive"));
            }
        }
        Ok(())
    }
}

/// The complete payroll configuration: settings plus every loaded tax table.
#[derive(Debug, Clone)]
pub struct PayrollConfig {
    settings: PayrollSettings,
    tax_tables: BTreeMap<TaxYear, TaxPolicy>,
}

impl PayrollConfig {
    /// Creates a configuration from its parts, validating each part.
    pub fn new(settings: PayrollSettings, tables: Vec<TaxPolicy>) -> EngineResult<Self> {
        settings.validate()?;
        let mut tax_tables = BTreeMap::new();
        for table in tables {
            table.validate()?;
            if tax_tables.insert(table.tax_year, table).is_some() {
                return Err(EngineError::InvalidConfig {
                    message: "duplicate tax table for the same tax year".to_string(),
                });
            }
        }
        Ok(Self {
            settings,
            tax_tables,
        })
    }

    /// Returns the payroll settings.
    pub fn settings(&self) -> &PayrollSettings {
        &self.settings
    }

    /// Returns the tax policy for a tax year.
    pub fn tax_policy(&self, tax_year: TaxYear) -> EngineResult<&TaxPolicy> {
        self.tax_tables
            .get(&tax_year)
            .ok_or_else(|| EngineError::TaxTableNotFound {
                tax_year: tax_year.to_string(),
            })
    }

    /// Returns every tax year with a loaded table, ascending.
    pub fn tax_years(&self) -> impl Iterator<Item = TaxYear> + '_ {
        self.tax_tables.keys().copied()
    }
}
