//! Error types for the payroll run engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for every failure the engine can surface: rejected input, illegal or
//! concurrent state transitions, blocking pay exceptions, configuration and
//! persistence failures.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{BlockingLine, PayRunStatus};

/// The main error type for the payroll run engine.
///
/// # Example
///
/// ```
/// use payrun_engine::error::EngineError;
///
/// let error = EngineError::InvalidTaxYear {
///     label: "2025-2026".to_string(),
/// };
/// assert_eq!(
///     error.to_string(),
///     "Invalid tax year '2025-2026': expected YYYY/YYYY with consecutive years"
/// );
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file was not found at the specified path.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    ConfigParseError {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },

    /// Configuration parsed but holds values the engine cannot use.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// No tax policy table is loaded for the tax year.
    #[error("Tax table not found for tax year {tax_year}")]
    TaxTableNotFound {
        /// The tax year label that was requested.
        tax_year: String,
    },

    /// The period number is outside the range allowed for the frequency.
    #[error("Invalid period {period_number} for {frequency} frequency: expected 1..={max}")]
    InvalidPeriod {
        /// The pay frequency.
        frequency: String,
        /// The rejected period number.
        period_number: u32,
        /// The largest period number for the frequency.
        max: u32,
    },

    /// The tax year label could not be parsed.
    #[error("Invalid tax year '{label}': expected YYYY/YYYY with consecutive years")]
    InvalidTaxYear {
        /// The rejected label.
        label: String,
    },

    /// A pay element definition failed validation.
    #[error("Invalid pay element '{code}': {message}")]
    InvalidPayElement {
        /// The element code.
        code: String,
        /// What made the element invalid.
        message: String,
    },

    /// A pay element code is not in the registry.
    #[error("Pay element not found: {code}")]
    PayElementNotFound {
        /// The element code that was not found.
        code: String,
    },

    /// A formula could not be parsed or evaluated.
    #[error("Formula error in '{expression}': {message}")]
    FormulaError {
        /// The formula source.
        expression: String,
        /// A description of the failure.
        message: String,
    },

    /// An employee snapshot is missing data required to lock inputs.
    #[error("Employee '{employee}' is missing required field '{field}'")]
    MissingEmployeeData {
        /// The employee number (or id when the number itself is missing).
        employee: String,
        /// The missing or invalid field.
        field: String,
    },

    /// A request field was blank or otherwise unusable.
    #[error("Invalid input '{field}': {message}")]
    InvalidInput {
        /// The offending field.
        field: String,
        /// A description of the problem.
        message: String,
    },

    /// A run already exists for the tenant, frequency, tax year and period.
    #[error("A {frequency} pay run for period {period_number} of {tax_year} already exists: {existing}")]
    DuplicateRun {
        /// The pay frequency.
        frequency: String,
        /// The period number.
        period_number: u32,
        /// The tax year label.
        tax_year: String,
        /// The id of the existing run.
        existing: Uuid,
    },

    /// No pay run exists with the given id.
    #[error("Pay run not found: {run_id}")]
    RunNotFound {
        /// The requested run id.
        run_id: Uuid,
    },

    /// No line with the given id exists on the run.
    #[error("Pay run line {line_id} not found on run {run_id}")]
    LineNotFound {
        /// The run id.
        run_id: Uuid,
        /// The requested line id.
        line_id: Uuid,
    },

    /// No exception with the given id exists on the line.
    #[error("Exception {exception_id} not found on line {line_id}")]
    ExceptionNotFound {
        /// The line id.
        line_id: Uuid,
        /// The requested exception id.
        exception_id: Uuid,
    },

    /// The run is not in a state that permits the requested action.
    #[error("Pay run {run_id} is '{current}' and cannot {action}")]
    StateConflict {
        /// The run id.
        run_id: Uuid,
        /// The action that was attempted.
        action: String,
        /// The authoritative current status.
        current: PayRunStatus,
    },

    /// Another writer changed the run between read and write.
    #[error("Pay run {run_id} was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification {
        /// The run id.
        run_id: Uuid,
        /// The version the writer read.
        expected: u64,
        /// The version found at write time.
        actual: u64,
    },

    /// Unresolved error-severity exceptions prevent the run from advancing.
    #[error("{count} blocking exception(s) on pay run {run_id}: {}", describe_lines(.lines))]
    BlockingExceptions {
        /// The run id.
        run_id: Uuid,
        /// Number of unresolved error-severity exceptions.
        count: usize,
        /// The offending lines.
        lines: Vec<BlockingLine>,
    },

    /// The persistence layer failed; nothing was written.
    #[error("Persistence failure: {message}")]
    Persistence {
        /// A description of the failure.
        message: String,
    },

    /// A downstream output generator rejected the trigger call.
    #[error("Failed to trigger {output} generation: {message}")]
    OutputTrigger {
        /// Which output was being requested.
        output: String,
        /// A description of the failure.
        message: String,
    },

    /// Another caller holds the claim on an output of the run.
    #[error("{output} generation for pay run {run_id} is already in progress")]
    OutputInProgress {
        /// The run being finalised.
        run_id: Uuid,
        /// The claimed output.
        output: String,
    },

    /// A general calculation error occurred.
    #[error("Calculation error: {message}")]
    CalculationError {
        /// A description of the calculation error.
        message: String,
    },
}

impl EngineError {
    /// Returns true for errors a caller may resolve by re-reading the run and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StateConflict { .. }
                | EngineError::ConcurrentModification { .. }
                | EngineError::OutputInProgress { .. }
        )
    }
}

fn describe_lines(lines: &[BlockingLine]) -> String {
    lines
        .iter()
        .map(|line| {
            let kinds: Vec<&str> = line.kinds.iter().map(|k| k.as_str()).collect();
            format!(
                "{} {} [{}]",
                line.employee_number,
                line.employee_name,
                kinds.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
