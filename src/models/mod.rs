//! Core data models for the payroll run engine.
//!
//! This module contains all the domain models used throughout the engine.

mod audit;
mod employee;
mod exception;
mod pay_element;
mod pay_period;
mod pay_run;
mod pay_run_line;

pub use audit::AuditStep;
pub use employee::{BankDetails, ElementAssignment, EmployeeSnapshot};
pub use exception::{ExceptionKind, ExceptionResolution, PayException, Severity};
pub use pay_element::{
    CalculationMethod, PayElement, PayElementDefinition, PayElementType, RESERVED_CODES,
    TaxTreatment,
};
pub use pay_period::{PayFrequency, PayPeriod, TaxYear};
pub use pay_run::{OutputFlags, OutputKind, PayRun, PayRunStatus, RunTotals, TransitionRecord};
pub use pay_run_line::{BlockingLine, LineItem, PayRunLine, YtdFigures};
