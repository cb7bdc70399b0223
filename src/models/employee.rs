//! Employee snapshot model and related types.
//!
//! An [`EmployeeSnapshot`] is the frozen view of an employee captured from the
//! employee directory when a run's inputs are locked. Lines are calculated
//! from the snapshot, never from live employee records.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bank account details used for salary payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    /// The bank name.
    pub bank_name: String,
    /// The branch (sort) code.
    pub branch_code: String,
    /// The full account number.
    pub account_number: String,
    /// The name on the account.
    pub account_holder: String,
    /// Account type, e.g. "cheque" or "savings".
    #[serde(default)]
    pub account_type: Option<String>,
}

impl BankDetails {
    /// Returns a copy suitable for display with all but the last four account digits hidden.
    ///
    /// # Example
    ///
    /// ```
    /// use payrun_engine::models::BankDetails;
    ///
    /// let details = BankDetails {
    ///     bank_name: "First National".to_string(),
    ///     branch_code: "250655".to_string(),
    ///     account_number: "62812345678".to_string(),
    ///     account_holder: "T Nkosi".to_string(),
    ///     account_type: None,
    /// };
    /// assert_eq!(details.masked().account_number, "*******5678");
    /// ```
    pub fn masked(&self) -> BankDetails {
        let visible = 4;
        let chars: Vec<char> = self.account_number.chars().collect();
        let hidden = chars.len().saturating_sub(visible);
        let masked: String = chars
            .iter()
            .enumerate()
            .map(|(i, c)| if i < hidden { '*' } else { *c })
            .collect();

        BankDetails {
            account_number: masked,
            ..self.clone()
        }
    }

    /// Returns true when the details are complete enough to pay into.
    pub fn is_complete(&self) -> bool {
        !self.account_number.trim().is_empty()
            && !self.branch_code.trim().is_empty()
            && !self.account_holder.trim().is_empty()
    }
}

/// A pay element assigned to an employee for the period, with its per-employee inputs.
///
/// Which fields are used depends on the element's calculation method:
/// fixed elements may override `amount`, hourly elements use `hours`,
/// daily elements use `days`, and formulas may reference any of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementAssignment {
    /// The pay element code.
    pub code: String,
    /// Overrides the element's fixed amount.
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Overrides the element's hourly or daily rate.
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// Hours worked for hourly elements.
    #[serde(default)]
    pub hours: Option<Decimal>,
    /// Days worked for daily elements.
    #[serde(default)]
    pub days: Option<Decimal>,
    /// Free-form units for formula elements.
    #[serde(default)]
    pub units: Option<Decimal>,
}

impl ElementAssignment {
    /// Creates an assignment with no per-employee inputs.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }
}

/// The employee data a pay run line is calculated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeSnapshot {
    /// Directory identifier for the employee.
    pub employee_id: String,
    /// Payroll employee number.
    pub employee_number: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// National identity number.
    #[serde(default)]
    pub id_number: Option<String>,
    /// Income tax reference number.
    #[serde(default)]
    pub tax_number: Option<String>,
    /// Department name.
    #[serde(default)]
    pub department: Option<String>,
    /// Job title.
    #[serde(default)]
    pub job_title: Option<String>,
    /// Date of birth, used for age-based tax rebates.
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// First day of employment.
    pub start_date: NaiveDate,
    /// Last day of employment, if terminated.
    #[serde(default)]
    pub termination_date: Option<NaiveDate>,
    /// Basic salary for one pay period at the run's frequency.
    pub basic_salary: Decimal,
    /// Exempt from UIF contributions.
    #[serde(default)]
    pub uif_exempt: bool,
    /// Bank account for salary payment.
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
    /// Recurring and period-specific pay elements.
    #[serde(default)]
    pub elements: Vec<ElementAssignment>,
}

impl EmployeeSnapshot {
    /// Returns "first last".
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    /// Returns the employee's age in whole years on `date`, if the date of birth is known.
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        self.date_of_birth.and_then(|dob| date.years_since(dob))
    }
}
