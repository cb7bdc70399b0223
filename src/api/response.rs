//! Response types for the payroll run API.
//!
//! This module defines the error response body and the mapping from
//! [`EngineError`] to HTTP status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::EngineError;
use crate::models::{PayRun, PayRunLine};

/// API error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Structured context, e.g. the blocking lines or the current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new API error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<Value>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Creates a malformed JSON error response.
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::new("MALFORMED_JSON", message)
    }
}

/// Body returned by line edits: the edited line and the run's new totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineUpdateResponse {
    /// The run header after the edit.
    pub run: PayRun,
    /// The edited line, bank details masked.
    pub line: PayRunLine,
}

/// API error with HTTP status code.
pub struct ApiErrorResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The error body.
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<EngineError> for ApiErrorResponse {
    fn from(error: EngineError) -> Self {
        let message = error.to_string();
        let (status, code, details) = match &error {
            EngineError::ConfigNotFound { .. }
            | EngineError::ConfigParseError { .. }
            | EngineError::InvalidConfig { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", None)
            }
            EngineError::TaxTableNotFound { tax_year } => (
                StatusCode::BAD_REQUEST,
                "TAX_TABLE_NOT_FOUND",
                Some(json!({ "tax_year": tax_year })),
            ),
            EngineError::InvalidPeriod { max, .. } => (
                StatusCode::BAD_REQUEST,
                "INVALID_PERIOD",
                Some(json!({ "max": max })),
            ),
            EngineError::InvalidTaxYear { .. } => (StatusCode::BAD_REQUEST, "INVALID_TAX_YEAR", None),
            EngineError::InvalidPayElement { code, .. } => (
                StatusCode::BAD_REQUEST,
                "INVALID_PAY_ELEMENT",
                Some(json!({ "code": code })),
            ),
            EngineError::FormulaError { expression, .. } => (
                StatusCode::BAD_REQUEST,
                "FORMULA_ERROR",
                Some(json!({ "expression": expression })),
            ),
            EngineError::MissingEmployeeData { employee, field } => (
                StatusCode::BAD_REQUEST,
                "MISSING_EMPLOYEE_DATA",
                Some(json!({ "employee": employee, "field": field })),
            ),
            EngineError::InvalidInput { field, .. } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                Some(json!({ "field": field })),
            ),
            EngineError::PayElementNotFound { .. } => {
                (StatusCode::NOT_FOUND, "PAY_ELEMENT_NOT_FOUND", None)
            }
            EngineError::RunNotFound { .. } => (StatusCode::NOT_FOUND, "RUN_NOT_FOUND", None),
            EngineError::LineNotFound { .. } => (StatusCode::NOT_FOUND, "LINE_NOT_FOUND", None),
            EngineError::ExceptionNotFound { .. } => {
                (StatusCode::NOT_FOUND, "EXCEPTION_NOT_FOUND", None)
            }
            EngineError::DuplicateRun { existing, .. } => (
                StatusCode::CONFLICT,
                "DUPLICATE_RUN",
                Some(json!({ "existing_run_id": existing })),
            ),
            EngineError::StateConflict { action, current, .. } => (
                StatusCode::CONFLICT,
                "STATE_CONFLICT",
                Some(json!({ "action": action, "current_status": current })),
            ),
            EngineError::ConcurrentModification {
                expected, actual, ..
            } => (
                StatusCode::CONFLICT,
                "CONCURRENT_MODIFICATION",
                Some(json!({ "expected_version": expected, "actual_version": actual })),
            ),
            EngineError::BlockingExceptions { count, lines, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "BLOCKING_EXCEPTIONS",
                Some(json!({ "count": count, "lines": lines })),
            ),
            EngineError::Persistence { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR", None)
            }
            EngineError::OutputTrigger { output, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OUTPUT_TRIGGER_FAILED",
                Some(json!({ "output": output })),
            ),
            EngineError::OutputInProgress { output, .. } => (
                StatusCode::CONFLICT,
                "OUTPUT_IN_PROGRESS",
                Some(json!({ "output": output })),
            ),
            EngineError::CalculationError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CALCULATION_ERROR", None)
            }
        };

        ApiErrorResponse {
            status,
            error: ApiError {
                code: code.to_string(),
                message,
                details,
            },
        }
    }
}
