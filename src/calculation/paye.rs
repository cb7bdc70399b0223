//! PAYE (employee income tax) calculation.
//!
//! Period taxable income is annualized by the pay frequency, taxed against
//! the progressive bracket table of the tax year, reduced by the age rebates
//! the employee qualifies for, and de-annualized back to the period.

use rust_decimal::Decimal;

use crate::config::{TaxPolicy, TaxRebate};
use crate::error::{EngineError, EngineResult};
use crate::models::{AuditStep, PayFrequency};

use super::rounding::round_cents;

/// The result of a PAYE calculation, including the audit step.
#[derive(Debug, Clone)]
pub struct PayeResult {
    /// Tax withheld for the period, rounded to the cent.
    pub paye: Decimal,
    /// Taxable income annualized by the frequency.
    pub annual_income: Decimal,
    /// Annual tax before rebates.
    pub annual_tax: Decimal,
    /// Total annual rebates applied.
    pub rebates: Decimal,
    /// The audit step recording this calculation.
    pub audit_step: AuditStep,
}

/// Calculates PAYE for one period.
///
/// # Arguments
///
/// * `taxable_income` - Period taxable income after pre-tax deductions
/// * `frequency` - The pay frequency used to annualize the income
/// * `age` - The employee's age at the end of the tax year, when known
/// * `policy` - The tax year's bracket and rebate table
/// * `step_number` - The step number for audit trail sequencing
///
/// Without a known age only rebates with a minimum age of zero apply.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::calculate_paye;
/// use payrun_engine::config::ConfigLoader;
/// use payrun_engine::models::{PayFrequency, TaxYear};
/// use rust_decimal::Decimal;
///
/// let loader = ConfigLoader::load("./config/za").unwrap();
/// let policy = loader.tax_policy(TaxYear::new(2025)).unwrap();
///
/// let result = calculate_paye(Decimal::new(35000, 0), PayFrequency::Monthly, Some(40), policy, 1)
///     .unwrap();
/// assert_eq!(result.paye.to_string(), "6289.33");
/// ```
pub fn calculate_paye(
    taxable_income: Decimal,
    frequency: PayFrequency,
    age: Option<u32>,
    policy: &TaxPolicy,
    step_number: u32,
) -> EngineResult<PayeResult> {
    let periods = Decimal::from(frequency.periods_per_year());
    let annual_income = taxable_income.max(Decimal::ZERO) * periods;

    let bracket = policy
        .bracket_for(annual_income)
        .ok_or_else(|| EngineError::CalculationError {
            message: format!("tax year {} has no tax brackets", policy.tax_year),
        })?;
    let annual_tax = if annual_income > Decimal::ZERO {
        bracket.base_tax + (annual_income - bracket.threshold) * bracket.rate
    } else {
        Decimal::ZERO
    };

    let qualifying: Vec<&TaxRebate> = policy
        .rebates
        .iter()
        .filter(|r| r.min_age == 0 || age.is_some_and(|age| age >= r.min_age))
        .collect();
    let rebates: Decimal = qualifying.iter().map(|r| r.amount).sum();
    let applied: Vec<&str> = qualifying.iter().map(|r| r.name.as_str()).collect();

    let annual_liability = (annual_tax - rebates).max(Decimal::ZERO);
    let paye = round_cents(annual_liability / periods);

    let audit_step = AuditStep {
        step_number,
        rule_id: "paye".to_string(),
        rule_name: "Pay As You Earn".to_string(),
        input: serde_json::json!({
            "taxable_income": taxable_income.to_string(),
            "frequency": frequency.as_str(),
            "age": age,
            "tax_year": policy.tax_year.to_string(),
        }),
        output: serde_json::json!({
            "annual_income": annual_income.normalize().to_string(),
            "bracket_threshold": bracket.threshold.normalize().to_string(),
            "annual_tax": annual_tax.normalize().to_string(),
            "rebates_applied": applied,
            "rebates": rebates.normalize().to_string(),
            "paye": paye.to_string(),
        }),
        reasoning: format!(
            "({} + ({} - {}) x {} - {}) / {} = {}",
            bracket.base_tax.normalize(),
            annual_income.normalize(),
            bracket.threshold.normalize(),
            bracket.rate.normalize(),
            rebates.normalize(),
            periods,
            paye
        ),
    };

    Ok(PayeResult {
        paye,
        annual_income,
        annual_tax,
        rebates,
        audit_step,
    })
}
