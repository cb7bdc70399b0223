//! Pay exception models.
//!
//! Exceptions are first-class data attached to a pay run line. They are not
//! failures of the calculation pipeline: error-severity exceptions block the
//! run from advancing past review until resolved or the line is excluded,
//! everything else only informs reviewers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How serious an exception is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Context for reviewers.
    Info,
    /// Needs human review but never blocks.
    Warning,
    /// Blocks the run from advancing past review.
    Error,
}

/// The condition an exception reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Net pay is below zero.
    NegativeNetPay,
    /// Net pay is exactly zero on an included line.
    ZeroNetPay,
    /// No usable bank account for the bank file.
    MissingBankDetails,
    /// No income tax reference number.
    MissingTaxNumber,
    /// No national identity number.
    MissingIdNumber,
    /// Net pay moved beyond the variance threshold since the last finalised period.
    LargeVariance,
    /// Basic salary differs from the last finalised period.
    SalaryChange,
    /// Employment started within the period.
    NewEmployee,
    /// Employment ends on or before the period end.
    Terminated,
}

impl ExceptionKind {
    /// The severity every exception of this kind carries.
    pub fn severity(&self) -> Severity {
        match self {
            ExceptionKind::NegativeNetPay | ExceptionKind::MissingBankDetails => Severity::Error,
            ExceptionKind::ZeroNetPay
            | ExceptionKind::MissingTaxNumber
            | ExceptionKind::MissingIdNumber
            | ExceptionKind::LargeVariance => Severity::Warning,
            ExceptionKind::SalaryChange | ExceptionKind::NewEmployee | ExceptionKind::Terminated => {
                Severity::Info
            }
        }
    }

    /// Returns the snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::NegativeNetPay => "negative_net_pay",
            ExceptionKind::ZeroNetPay => "zero_net_pay",
            ExceptionKind::MissingBankDetails => "missing_bank_details",
            ExceptionKind::MissingTaxNumber => "missing_tax_number",
            ExceptionKind::MissingIdNumber => "missing_id_number",
            ExceptionKind::LargeVariance => "large_variance",
            ExceptionKind::SalaryChange => "salary_change",
            ExceptionKind::NewEmployee => "new_employee",
            ExceptionKind::Terminated => "terminated",
        }
    }
}

/// Who resolved an exception, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionResolution {
    /// The resolving actor.
    pub resolved_by: String,
    /// When it was resolved.
    pub resolved_at: DateTime<Utc>,
    /// Free-text explanation.
    pub note: String,
}

/// An exception attached to a pay run line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayException {
    /// Unique identifier.
    pub id: Uuid,
    /// What was detected.
    pub kind: ExceptionKind,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Set once a reviewer resolves the exception.
    #[serde(default)]
    pub resolution: Option<ExceptionResolution>,
}

impl PayException {
    /// Creates an unresolved exception with the kind's severity.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            message: message.into(),
            resolution: None,
        }
    }

    /// Whether a reviewer has resolved the exception.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Unresolved and error severity.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error && !self.is_resolved()
    }
}
