//! Exception detection over calculated lines.
//!
//! Each check is an [`ExceptionRule`]; the [`ExceptionDetector`] runs every
//! registered rule over a line and collects what they report. Hosts can add
//! their own rules alongside the built-in set.

use rust_decimal::Decimal;

use crate::models::{EmployeeSnapshot, ExceptionKind, PayException, PayPeriod, PayRunLine};

use super::rounding::round_cents;

/// What a rule sees when inspecting one line.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionContext<'a> {
    /// The freshly calculated line.
    pub line: &'a PayRunLine,
    /// The snapshot the line was calculated from.
    pub employee: &'a EmployeeSnapshot,
    /// The run's pay period.
    pub period: &'a PayPeriod,
    /// The employee's line on the last finalised run of the tax year, if any.
    pub prior_line: Option<&'a PayRunLine>,
}

/// A single exception check.
pub trait ExceptionRule: Send + Sync {
    /// Identifies the rule in logs.
    fn name(&self) -> &'static str;

    /// Returns an exception when the line trips the rule.
    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException>;
}

/// Net pay below zero. Blocks the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegativeNetPayRule;

impl ExceptionRule for NegativeNetPayRule {
    fn name(&self) -> &'static str {
        "negative_net_pay"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        let line = context.line;
        (line.net_pay < Decimal::ZERO).then(|| {
            PayException::new(
                ExceptionKind::NegativeNetPay,
                format!(
                    "Net pay is {}: deductions {} exceed gross earnings {}",
                    line.net_pay, line.total_deductions, line.gross_earnings
                ),
            )
        })
    }
}

/// Net pay of exactly zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroNetPayRule;

impl ExceptionRule for ZeroNetPayRule {
    fn name(&self) -> &'static str {
        "zero_net_pay"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        context.line.net_pay.is_zero().then(|| {
            PayException::new(ExceptionKind::ZeroNetPay, "Net pay is zero for the period")
        })
    }
}

/// No usable bank account. Blocks the run because the bank file needs one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingBankDetailsRule;

impl ExceptionRule for MissingBankDetailsRule {
    fn name(&self) -> &'static str {
        "missing_bank_details"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        match &context.employee.bank_details {
            Some(details) if details.is_complete() => None,
            Some(_) => Some(PayException::new(
                ExceptionKind::MissingBankDetails,
                "Bank details are incomplete",
            )),
            None => Some(PayException::new(
                ExceptionKind::MissingBankDetails,
                "No bank details on record",
            )),
        }
    }
}

/// No income tax reference number.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingTaxNumberRule;

impl ExceptionRule for MissingTaxNumberRule {
    fn name(&self) -> &'static str {
        "missing_tax_number"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        is_blank(&context.employee.tax_number).then(|| {
            PayException::new(ExceptionKind::MissingTaxNumber, "No tax reference number")
        })
    }
}

/// No national identity number.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingIdNumberRule;

impl ExceptionRule for MissingIdNumberRule {
    fn name(&self) -> &'static str {
        "missing_id_number"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        is_blank(&context.employee.id_number)
            .then(|| PayException::new(ExceptionKind::MissingIdNumber, "No ID number"))
    }
}

/// Net pay moved more than `threshold_percent` since the last finalised period.
#[derive(Debug, Clone, Copy)]
pub struct LargeVarianceRule {
    /// Movement, in percent of the prior net pay, above which the rule fires.
    pub threshold_percent: Decimal,
}

impl ExceptionRule for LargeVarianceRule {
    fn name(&self) -> &'static str {
        "large_variance"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        let prior = context.prior_line?.net_pay;
        if prior.is_zero() {
            return None;
        }
        let current = context.line.net_pay;
        let variance = round_cents((current - prior) / prior.abs() * Decimal::ONE_HUNDRED);
        (variance.abs() > self.threshold_percent).then(|| {
            PayException::new(
                ExceptionKind::LargeVariance,
                format!(
                    "Net pay changed by {}% from {} to {} (threshold {}%)",
                    variance,
                    prior,
                    current,
                    self.threshold_percent.normalize()
                ),
            )
        })
    }
}

/// Basic salary differs from the last finalised period.
#[derive(Debug, Clone, Copy, Default)]
pub struct SalaryChangeRule;

impl ExceptionRule for SalaryChangeRule {
    fn name(&self) -> &'static str {
        "salary_change"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        let prior = context.prior_line?.basic_salary;
        let current = context.line.basic_salary;
        (prior != current).then(|| {
            PayException::new(
                ExceptionKind::SalaryChange,
                format!("Basic salary changed from {} to {}", prior, current),
            )
        })
    }
}

/// Employment started within the period.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewEmployeeRule;

impl ExceptionRule for NewEmployeeRule {
    fn name(&self) -> &'static str {
        "new_employee"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        let start = context.employee.start_date;
        context.period.contains_date(start).then(|| {
            PayException::new(
                ExceptionKind::NewEmployee,
                format!("Employment started on {}", start),
            )
        })
    }
}

/// Employment ends on or before the period end.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminatedRule;

impl ExceptionRule for TerminatedRule {
    fn name(&self) -> &'static str {
        "terminated"
    }

    fn check(&self, context: &ExceptionContext<'_>) -> Option<PayException> {
        let end = context.employee.termination_date?;
        (end <= context.period.end_date).then(|| {
            PayException::new(
                ExceptionKind::Terminated,
                format!("Employment terminated on {}", end),
            )
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Runs a set of exception rules over calculated lines.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::{ExceptionDetector, NegativeNetPayRule};
/// use rust_decimal::Decimal;
///
/// let detector = ExceptionDetector::with_default_rules(Decimal::from(20));
/// assert_eq!(detector.rule_names().len(), 9);
///
/// let custom = ExceptionDetector::new().with_rule(NegativeNetPayRule);
/// assert_eq!(custom.rule_names(), vec!["negative_net_pay"]);
/// ```
pub struct ExceptionDetector {
    rules: Vec<Box<dyn ExceptionRule>>,
}

impl ExceptionDetector {
    /// Creates a detector with no rules.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Creates a detector with every built-in rule.
    pub fn with_default_rules(large_variance_percent: Decimal) -> Self {
        Self::new()
            .with_rule(NegativeNetPayRule)
            .with_rule(ZeroNetPayRule)
            .with_rule(MissingBankDetailsRule)
            .with_rule(MissingTaxNumberRule)
            .with_rule(MissingIdNumberRule)
            .with_rule(LargeVarianceRule {
                threshold_percent: large_variance_percent,
            })
            .with_rule(SalaryChangeRule)
            .with_rule(NewEmployeeRule)
            .with_rule(TerminatedRule)
    }

    /// Adds a rule.
    pub fn with_rule(mut self, rule: impl ExceptionRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Names of the registered rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Runs every rule, returning the exceptions ordered by descending severity.
    pub fn detect(&self, context: &ExceptionContext<'_>) -> Vec<PayException> {
        let mut found: Vec<PayException> =
            self.rules.iter().filter_map(|r| r.check(context)).collect();
        found.sort_by(|a, b| b.severity.cmp(&a.severity));
        found
    }
}

impl Default for ExceptionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExceptionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionDetector")
            .field("rules", &self.rule_names())
            .finish()
    }
}
