//! Request types for the payroll run API.
//!
//! Every mutating request names its actor explicitly; the engine keeps no
//! session of its own.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::models::{PayFrequency, TaxYear};

/// Request body for `POST /tenants/:tenant_id/runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunRequest {
    /// Pay frequency of the run.
    pub frequency: PayFrequency,
    /// Period number within the tax year.
    pub period_number: u32,
    /// Tax year label, e.g. `"2025/2026"`.
    pub tax_year: String,
    /// Who is creating the run.
    pub actor: String,
}

impl CreateRunRequest {
    /// Parses the tax year label.
    pub fn tax_year(&self) -> EngineResult<TaxYear> {
        self.tax_year.parse()
    }
}

/// Request body for transitions that need nothing but an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    /// Who is performing the action.
    pub actor: String,
}

/// Request body for re-opening a run or excluding a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonRequest {
    /// Who is performing the action.
    pub actor: String,
    /// Why; kept on the audit record.
    pub reason: String,
}

/// Request body for resolving a pay exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveExceptionRequest {
    /// Who resolved the exception.
    pub actor: String,
    /// How it was resolved.
    pub note: String,
}
