//! Pay element definitions.
//!
//! A [`PayElement`] is a tenant-owned definition of one earning, deduction or
//! employer contribution. Its calculation method is a closed set of variants
//! whose required fields are validated when the element is constructed or
//! deserialized, never when it is used.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculation::Formula;
use crate::error::{EngineError, EngineResult};

/// Codes the engine uses for the basic salary and statutory line items.
pub const RESERVED_CODES: [&str; 5] = ["BASIC", "PAYE", "UIF", "UIF_ER", "SDL"];

/// The role an element plays on a payslip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayElementType {
    /// Adds to gross earnings.
    Earning,
    /// Reduces net pay.
    Deduction,
    /// Cost to the employer that never reduces net pay.
    EmployerContribution,
}

/// How an element's amount is derived for one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalculationMethod {
    /// A flat amount per period.
    Fixed {
        /// The amount per period.
        amount: Decimal,
    },
    /// A percentage of the employee's basic salary.
    Percentage {
        /// Percentage in the range (0, 100].
        percentage: Decimal,
    },
    /// A rate multiplied by hours worked.
    Hourly {
        /// Amount per hour.
        rate: Decimal,
    },
    /// A rate multiplied by days worked.
    Daily {
        /// Amount per day.
        rate: Decimal,
    },
    /// An arithmetic expression over `basic_salary`, `hours`, `days`, `units` and `rate`.
    Formula {
        /// The expression source.
        expression: String,
    },
}

impl CalculationMethod {
    /// Returns the snake_case name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            CalculationMethod::Fixed { .. } => "fixed",
            CalculationMethod::Percentage { .. } => "percentage",
            CalculationMethod::Hourly { .. } => "hourly",
            CalculationMethod::Daily { .. } => "daily",
            CalculationMethod::Formula { .. } => "formula",
        }
    }

    fn validate(&self, code: &str) -> EngineResult<()> {
        let invalid = |message: String| EngineError::InvalidPayElement {
            code: code.to_string(),
            message,
        };

        match self {
            CalculationMethod::Fixed { amount } if amount.is_sign_negative() => {
                Err(invalid(format!("fixed amount {} must not be negative", amount)))
            }
            CalculationMethod::Percentage { percentage }
                if *percentage <= Decimal::ZERO || *percentage > Decimal::ONE_HUNDRED =>
            {
                Err(invalid(format!(
                    "percentage {} must be greater than 0 and at most 100",
                    percentage
                )))
            }
            CalculationMethod::Hourly { rate } | CalculationMethod::Daily { rate }
                if rate.is_sign_negative() =>
            {
                Err(invalid(format!("rate {} must not be negative", rate)))
            }
            CalculationMethod::Formula { expression } => {
                Formula::parse(expression).map(|_| ()).map_err(|err| match err {
                    EngineError::FormulaError { message, .. } => {
                        invalid(format!("formula '{}': {}", expression, message))
                    }
                    other => other,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Statutory treatment flags of an element.
///
/// Earnings use `taxable`, `uif_applicable` and `sdl_applicable`; deductions
/// use `pre_tax` to reduce taxable income (e.g. qualifying retirement funding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxTreatment {
    /// Counts towards taxable income.
    #[serde(default)]
    pub taxable: bool,
    /// Taxable earnings without this flag are left out of the UIF base.
    #[serde(default)]
    pub uif_applicable: bool,
    /// Reported as SDL remuneration; the levy itself applies to gross earnings.
    #[serde(default)]
    pub sdl_applicable: bool,
    /// Deducted from taxable income before PAYE.
    #[serde(default)]
    pub pre_tax: bool,
}

impl TaxTreatment {
    /// Fully taxable, UIF- and SDL-applicable earning treatment.
    pub fn remuneration() -> Self {
        Self {
            taxable: true,
            uif_applicable: true,
            sdl_applicable: true,
            pre_tax: false,
        }
    }

    /// A deduction that reduces taxable income.
    pub fn pre_tax_deduction() -> Self {
        Self {
            pre_tax: true,
            ..Default::default()
        }
    }
}

/// The unvalidated wire form of a [`PayElement`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayElementDefinition {
    /// Unique code within the tenant.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Earning, deduction or employer contribution.
    pub element_type: PayElementType,
    /// How the amount is derived.
    #[serde(flatten)]
    pub method: CalculationMethod,
    /// Statutory flags.
    #[serde(default)]
    pub tax_treatment: TaxTreatment,
    /// Inactive elements cannot be assigned to new runs.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A validated, reusable pay element definition.
///
/// # Example
///
/// ```
/// use payrun_engine::models::{CalculationMethod, PayElement, PayElementType, TaxTreatment};
/// use rust_decimal::Decimal;
///
/// let element = PayElement::new(
///     "travel",
///     "Travel Allowance",
///     PayElementType::Earning,
///     CalculationMethod::Fixed { amount: Decimal::new(150000, 2) },
///     TaxTreatment::remuneration(),
/// )
/// .unwrap();
/// assert_eq!(element.code(), "TRAVEL");
///
/// let invalid = PayElement::new(
///     "bonus",
///     "Bonus",
///     PayElementType::Earning,
///     CalculationMethod::Percentage { percentage: Decimal::new(150, 0) },
///     TaxTreatment::remuneration(),
/// );
/// assert!(invalid.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PayElementDefinition")]
pub struct PayElement {
    code: String,
    name: String,
    element_type: PayElementType,
    #[serde(flatten)]
    method: CalculationMethod,
    tax_treatment: TaxTreatment,
    is_active: bool,
}

impl PayElement {
    /// Validates and creates an active element. The code is trimmed and upper-cased.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        element_type: PayElementType,
        method: CalculationMethod,
        tax_treatment: TaxTreatment,
    ) -> EngineResult<Self> {
        Self::try_from(PayElementDefinition {
            code: code.into(),
            name: name.into(),
            element_type,
            method,
            tax_treatment,
            is_active: true,
        })
    }

    /// The element code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Earning, deduction or employer contribution.
    pub fn element_type(&self) -> PayElementType {
        self.element_type
    }

    /// The calculation method.
    pub fn method(&self) -> &CalculationMethod {
        &self.method
    }

    /// The statutory flags.
    pub fn tax_treatment(&self) -> TaxTreatment {
        self.tax_treatment
    }

    /// Whether the element may be assigned.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}

impl TryFrom<PayElementDefinition> for PayElement {
    type Error = EngineError;

    fn try_from(def: PayElementDefinition) -> Result<Self, Self::Error> {
        let code = def.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(EngineError::InvalidPayElement {
                code: def.code,
                message: "code must not be blank".to_string(),
            });
        }
        if RESERVED_CODES.contains(&code.as_str()) {
            return Err(EngineError::InvalidPayElement {
                code,
                message: "code is reserved for engine-generated items".to_string(),
            });
        }
        if def.name.trim().is_empty() {
            return Err(EngineError::InvalidPayElement {
                code,
                message: "name must not be blank".to_string(),
            });
        }

        def.method.validate(&code)?;

        let treatment = def.tax_treatment;
        match def.element_type {
            PayElementType::Earning if treatment.pre_tax => {
                return Err(EngineError::InvalidPayElement {
                    code,
                    message: "earnings cannot be pre-tax deductions".to_string(),
                });
            }
            PayElementType::Deduction | PayElementType::EmployerContribution
                if treatment.taxable || treatment.uif_applicable || treatment.sdl_applicable =>
            {
                return Err(EngineError::InvalidPayElement {
                    code,
                    message: "only earnings can be taxable, UIF- or SDL-applicable".to_string(),
                });
            }
            PayElementType::EmployerContribution if treatment.pre_tax => {
                return Err(EngineError::InvalidPayElement {
                    code,
                    message: "employer contributions cannot be pre-tax deductions".to_string(),
                });
            }
            _ => {}
        }

        Ok(PayElement {
            code,
            name: def.name.trim().to_string(),
            element_type: def.element_type,
            method: def.method,
            tax_treatment: treatment,
            is_active: def.is_active,
        })
    }
}
