//! Pay element registry and assignment resolution.
//!
//! The [`PayElementRegistry`] holds a tenant's element definitions keyed by
//! code. At `inputs_locked` the registry is snapshotted into the run inputs so
//! later edits to a definition never change a run's lines.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{CalculationMethod, ElementAssignment, LineItem, PayElement};

use super::formula::{Formula, FormulaContext};
use super::rounding::round_cents;

/// A tenant's pay element definitions, ordered by code.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::PayElementRegistry;
/// use payrun_engine::models::{
///     CalculationMethod, ElementAssignment, PayElement, PayElementType, TaxTreatment,
/// };
/// use rust_decimal::Decimal;
///
/// let mut registry = PayElementRegistry::new();
/// registry.register(
///     PayElement::new(
///         "OT",
///         "Overtime",
///         PayElementType::Earning,
///         CalculationMethod::Hourly { rate: Decimal::new(25000, 2) },
///         TaxTreatment::remuneration(),
///     )
///     .unwrap(),
/// );
///
/// let assignment = ElementAssignment {
///     hours: Some(Decimal::new(4, 0)),
///     ..ElementAssignment::new("OT")
/// };
/// let item = registry.resolve(&assignment, Decimal::new(2000000, 2)).unwrap();
/// assert_eq!(item.amount.to_string(), "1000.00");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayElementRegistry {
    elements: BTreeMap<String, PayElement>,
}

impl PayElementRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from definitions. Later duplicates replace earlier ones.
    pub fn from_elements(elements: impl IntoIterator<Item = PayElement>) -> Self {
        let mut registry = Self::new();
        for element in elements {
            registry.register(element);
        }
        registry
    }

    /// Adds or replaces a definition, returning the one it replaced.
    pub fn register(&mut self, element: PayElement) -> Option<PayElement> {
        self.elements.insert(element.code().to_string(), element)
    }

    /// Marks an element inactive so it can no longer be assigned.
    pub fn deactivate(&mut self, code: &str) -> EngineResult<()> {
        let code = normalize_code(code);
        let element = self
            .elements
            .get_mut(&code)
            .ok_or(EngineError::PayElementNotFound { code })?;
        element.set_active(false);
        Ok(())
    }

    /// Looks up a definition by code (case-insensitive).
    pub fn get(&self, code: &str) -> Option<&PayElement> {
        self.elements.get(&normalize_code(code))
    }

    /// Active definitions ordered by code.
    pub fn active(&self) -> impl Iterator<Item = &PayElement> {
        self.elements.values().filter(|e| e.is_active())
    }

    /// Every definition, active or not, ordered by code.
    pub fn all(&self) -> impl Iterator<Item = &PayElement> {
        self.elements.values()
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// A frozen copy for storing with a run's inputs.
    pub fn snapshot(&self) -> PayElementRegistry {
        self.clone()
    }

    /// Returns the element for a code if it exists and is active.
    pub fn assignable(&self, code: &str) -> EngineResult<&PayElement> {
        let element = self.get(code).ok_or_else(|| EngineError::PayElementNotFound {
            code: normalize_code(code),
        })?;
        if !element.is_active() {
            return Err(EngineError::InvalidPayElement {
                code: element.code().to_string(),
                message: "element is inactive and cannot be assigned".to_string(),
            });
        }
        Ok(element)
    }

    /// Evaluates one assignment for an employee and returns the line item.
    ///
    /// `basic_salary` is the employee's contracted basic salary for the period.
    /// Amounts are rounded half-up to the cent.
    pub fn resolve(
        &self,
        assignment: &ElementAssignment,
        basic_salary: Decimal,
    ) -> EngineResult<LineItem> {
        let element = self.get(&assignment.code).ok_or_else(|| EngineError::PayElementNotFound {
            code: normalize_code(&assignment.code),
        })?;

        let mut item = LineItem {
            code: element.code().to_string(),
            name: element.name().to_string(),
            element_type: element.element_type(),
            method: element.method().name().to_string(),
            rate: None,
            units: None,
            percentage: None,
            amount: Decimal::ZERO,
            tax_treatment: element.tax_treatment(),
        };

        let amount = match element.method() {
            CalculationMethod::Fixed { amount } => assignment.amount.unwrap_or(*amount),
            CalculationMethod::Percentage { percentage } => {
                item.percentage = Some(*percentage);
                basic_salary * *percentage / Decimal::ONE_HUNDRED
            }
            CalculationMethod::Hourly { rate } => {
                let rate = assignment.rate.unwrap_or(*rate);
                let hours = assignment.hours.unwrap_or_default();
                item.rate = Some(rate);
                item.units = Some(hours);
                rate * hours
            }
            CalculationMethod::Daily { rate } => {
                let rate = assignment.rate.unwrap_or(*rate);
                let days = assignment.days.unwrap_or_default();
                item.rate = Some(rate);
                item.units = Some(days);
                rate * days
            }
            CalculationMethod::Formula { expression } => {
                let formula = Formula::parse(expression)?;
                let context = FormulaContext {
                    basic_salary,
                    hours: assignment.hours.unwrap_or_default(),
                    days: assignment.days.unwrap_or_default(),
                    units: assignment.units.unwrap_or_default(),
                    rate: assignment.rate.unwrap_or_default(),
                };
                let value = formula.evaluate(&context)?;
                if value.is_sign_negative() && !value.is_zero() {
                    return Err(EngineError::FormulaError {
                        expression: expression.clone(),
                        message: format!(
                            "evaluated to negative amount {} for element {}",
                            value,
                            element.code()
                        ),
                    });
                }
                value
            }
        };

        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(EngineError::InvalidInput {
                field: format!("elements.{}", element.code()),
                message: format!("resolved amount {} must not be negative", amount),
            });
        }

        item.amount = round_cents(amount);
        Ok(item)
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
