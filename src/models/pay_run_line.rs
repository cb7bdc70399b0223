//! Pay run line models.
//!
//! A [`PayRunLine`] is one employee's computed payslip data for a pay run:
//! an identity snapshot, itemized earnings/deductions/contributions,
//! statutory amounts, net pay and the updated year-to-date accumulators.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AuditStep, BankDetails, ExceptionKind, PayElementType, PayException, TaxTreatment};

/// One itemized amount on a line.
///
/// The element's definition is copied into the item so later edits to the
/// pay element never change historical lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The element code (statutory items use `PAYE`, `UIF`, `UIF_ER`, `SDL`).
    pub code: String,
    /// The element name at calculation time.
    pub name: String,
    /// Earning, deduction or employer contribution.
    pub element_type: PayElementType,
    /// The calculation method name.
    pub method: String,
    /// Rate applied, for hourly, daily and statutory items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
    /// Hours, days or units applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Decimal>,
    /// Percentage applied, for percentage elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Decimal>,
    /// The amount, rounded to the cent.
    pub amount: Decimal,
    /// Statutory flags at calculation time.
    pub tax_treatment: TaxTreatment,
}

/// Year-to-date accumulators for one employee within a tax year.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct YtdFigures {
    /// Gross earnings.
    pub gross: Decimal,
    /// Taxable income.
    pub taxable: Decimal,
    /// PAYE withheld.
    pub paye: Decimal,
    /// Employee UIF.
    pub uif: Decimal,
    /// SDL.
    pub sdl: Decimal,
    /// Net pay.
    pub net: Decimal,
}

/// An employee line that blocks a run, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingLine {
    /// The line id.
    pub line_id: Uuid,
    /// The employee number.
    pub employee_number: String,
    /// The employee's name.
    pub employee_name: String,
    /// Kinds of the unresolved error-severity exceptions.
    pub kinds: Vec<ExceptionKind>,
}

/// One employee's computed payslip data for a pay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayRunLine {
    /// Unique identifier.
    pub id: Uuid,
    /// The owning run.
    pub run_id: Uuid,
    /// Directory identifier.
    pub employee_id: String,
    /// Employee number at calculation time.
    pub employee_number: String,
    /// Full name at calculation time.
    pub employee_name: String,
    /// National identity number at calculation time.
    pub id_number: Option<String>,
    /// Tax reference number at calculation time.
    pub tax_number: Option<String>,
    /// Department at calculation time.
    pub department: Option<String>,
    /// Job title at calculation time.
    pub job_title: Option<String>,
    /// Basic salary for the period, before unpaid leave.
    pub basic_salary: Decimal,
    /// Unpaid leave days applied to the basic salary.
    pub unpaid_leave_days: Decimal,
    /// Earnings, including the basic salary item.
    pub earnings: Vec<LineItem>,
    /// Deductions, including PAYE and employee UIF.
    pub deductions: Vec<LineItem>,
    /// Employer contributions, including employer UIF and SDL.
    pub employer_contributions: Vec<LineItem>,
    /// Sum of earnings.
    pub gross_earnings: Decimal,
    /// Sum of pre-tax deductions.
    pub pre_tax_deductions: Decimal,
    /// Taxable earnings less pre-tax deductions.
    pub taxable_income: Decimal,
    /// Income tax withheld.
    pub paye: Decimal,
    /// Employee UIF contribution.
    pub uif_employee: Decimal,
    /// Employer UIF contribution.
    pub uif_employer: Decimal,
    /// Skills development levy.
    pub sdl: Decimal,
    /// Sum of deductions.
    pub total_deductions: Decimal,
    /// Sum of employer contributions.
    pub total_employer_contributions: Decimal,
    /// Gross earnings less total deductions.
    pub net_pay: Decimal,
    /// Year-to-date figures including this period.
    pub ytd: YtdFigures,
    /// Whether the line counts towards run totals and outputs.
    pub is_included: bool,
    /// Why the line was excluded.
    #[serde(default)]
    pub exclusion_reason: Option<String>,
    /// Exceptions detected on the line.
    #[serde(default)]
    pub exceptions: Vec<PayException>,
    /// Full bank details for bank-file generation. Use [`BankDetails::masked`] for display.
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
    /// How the statutory figures were derived.
    #[serde(default)]
    pub audit_trace: Vec<AuditStep>,
}

impl PayRunLine {
    /// Unresolved error-severity exceptions on the line.
    pub fn blocking_exceptions(&self) -> impl Iterator<Item = &PayException> {
        self.exceptions.iter().filter(|e| e.is_blocking())
    }

    /// True when the line is included and has an unresolved error-severity exception.
    pub fn is_blocking(&self) -> bool {
        self.is_included && self.blocking_exceptions().next().is_some()
    }

    /// Number of unresolved exceptions of any severity.
    pub fn unresolved_exception_count(&self) -> usize {
        self.exceptions.iter().filter(|e| !e.is_resolved()).count()
    }

    /// Returns the caller-facing description of the line if it blocks the run.
    pub fn as_blocking_line(&self) -> Option<BlockingLine> {
        if !self.is_blocking() {
            return None;
        }
        Some(BlockingLine {
            line_id: self.id,
            employee_number: self.employee_number.clone(),
            employee_name: self.employee_name.clone(),
            kinds: self.blocking_exceptions().map(|e| e.kind).collect(),
        })
    }

    /// Returns a copy with bank details masked for display.
    pub fn for_display(&self) -> PayRunLine {
        PayRunLine {
            bank_details: self.bank_details.as_ref().map(BankDetails::masked),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExceptionResolution;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn line(exceptions: Vec<PayException>) -> PayRunLine {
        PayRunLine {
            id: Uuid::new_v4(),
            run_id: Uuid::nil(),
            employee_id: "emp_001".to_string(),
            employee_number: "EMP001".to_string(),
            employee_name: "Thandi Nkosi".to_string(),
            id_number: None,
            tax_number: None,
            department: None,
            job_title: None,
            basic_salary: dec("20000"),
            unpaid_leave_days: Decimal::ZERO,
            earnings: vec![],
            deductions: vec![],
            employer_contributions: vec![],
            gross_earnings: dec("20000.00"),
            pre_tax_deductions: Decimal::ZERO,
            taxable_income: dec("20000.00"),
            paye: dec("2600.00"),
            uif_employee: dec("177.12"),
            uif_employer: dec("177.12"),
            sdl: dec("200.00"),
            total_deductions: dec("2777.12"),
            total_employer_contributions: dec("377.12"),
            net_pay: dec("17222.88"),
            ytd: YtdFigures::default(),
            is_included: true,
            exclusion_reason: None,
            exceptions,
            bank_details: Some(BankDetails {
                bank_name: "First National".to_string(),
                branch_code: "250655".to_string(),
                account_number: "62812345678".to_string(),
                account_holder: "T Nkosi".to_string(),
                account_type: None,
            }),
            audit_trace: vec![],
        }
    }

    fn resolved(kind: ExceptionKind) -> PayException {
        let mut exception = PayException::new(kind, "resolved");
        exception.resolution = Some(ExceptionResolution {
            resolved_by: "reviewer".to_string(),
            resolved_at: Utc::now(),
            note: "checked".to_string(),
        });
        exception
    }

    #[test]
    fn test_blocking_needs_unresolved_error_on_included_line() {
        let mut blocked = line(vec![
            PayException::new(ExceptionKind::NegativeNetPay, "net pay is negative"),
            PayException::new(ExceptionKind::MissingTaxNumber, "no tax number"),
        ]);
        assert!(blocked.is_blocking());
        assert_eq!(blocked.unresolved_exception_count(), 2);

        let described = blocked.as_blocking_line().unwrap();
        assert_eq!(described.employee_number, "EMP001");
        assert_eq!(described.kinds, vec![ExceptionKind::NegativeNetPay]);

        blocked.is_included = false;
        assert!(!blocked.is_blocking());
        assert!(blocked.as_blocking_line().is_none());
    }

    #[test]
    fn test_resolved_and_warning_exceptions_do_not_block() {
        let clean = line(vec![
            resolved(ExceptionKind::MissingBankDetails),
            PayException::new(ExceptionKind::LargeVariance, "net pay moved 35%"),
        ]);
        assert!(!clean.is_blocking());
        assert_eq!(clean.unresolved_exception_count(), 1);
    }

    #[test]
    fn test_for_display_masks_account_number_only() {
        let original = line(vec![]);
        let display = original.for_display();
        let details = display.bank_details.as_ref().unwrap();
        assert_eq!(details.account_number, "*******5678");
        assert_eq!(details.branch_code, "250655");
        assert_eq!(display.net_pay, original.net_pay);
        assert_eq!(
            original.bank_details.as_ref().unwrap().account_number,
            "62812345678"
        );
    }

    #[test]
    fn test_line_serializes_amounts_as_strings() {
        let json = serde_json::to_value(line(vec![])).unwrap();
        assert_eq!(json["net_pay"], "17222.88");
        assert_eq!(json["is_included"], true);

        let mut legacy = json.clone();
        legacy.as_object_mut().unwrap().remove("audit_trace");
        let parsed: PayRunLine = serde_json::from_value(legacy).unwrap();
        assert!(parsed.audit_trace.is_empty());
        assert_eq!(parsed.net_pay, dec("17222.88"));
    }
}
