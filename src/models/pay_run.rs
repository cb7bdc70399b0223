//! Pay run header model and lifecycle status.
//!
//! This module contains [`PayRun`], its [`PayRunStatus`] lifecycle and the
//! aggregate [`RunTotals`] that are always derived from the included lines.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PayFrequency, PayPeriod, PayRunLine, TaxYear};

/// The lifecycle status of a pay run.
///
/// Statuses are ordered: every status compares greater than its predecessors,
/// so `status >= PayRunStatus::Approved` reads as "approved or beyond".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayRunStatus {
    /// Created; inputs may still change.
    Draft,
    /// Roster, elements and leave frozen for the period.
    InputsLocked,
    /// Line calculation in progress.
    Calculating,
    /// Lines calculated; may be recalculated.
    Calculated,
    /// Under review; exceptions are being worked.
    Review,
    /// Submitted for approval.
    PendingApproval,
    /// Approved; lines are frozen.
    Approved,
    /// Output generation being triggered.
    Finalising,
    /// Outputs requested; the run is final.
    Finalised,
    /// Terminal. No further mutation.
    Closed,
}

impl PayRunStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [PayRunStatus; 10] = [
        PayRunStatus::Draft,
        PayRunStatus::InputsLocked,
        PayRunStatus::Calculating,
        PayRunStatus::Calculated,
        PayRunStatus::Review,
        PayRunStatus::PendingApproval,
        PayRunStatus::Approved,
        PayRunStatus::Finalising,
        PayRunStatus::Finalised,
        PayRunStatus::Closed,
    ];

    /// The single status reachable from this one by a normal transition.
    ///
    /// # Example
    ///
    /// ```
    /// use payrun_engine::models::PayRunStatus;
    ///
    /// assert_eq!(PayRunStatus::Draft.successor(), Some(PayRunStatus::InputsLocked));
    /// assert_eq!(PayRunStatus::Closed.successor(), None);
    /// ```
    pub fn successor(&self) -> Option<PayRunStatus> {
        match self {
            PayRunStatus::Draft => Some(PayRunStatus::InputsLocked),
            PayRunStatus::InputsLocked => Some(PayRunStatus::Calculating),
            PayRunStatus::Calculating => Some(PayRunStatus::Calculated),
            PayRunStatus::Calculated => Some(PayRunStatus::Review),
            PayRunStatus::Review => Some(PayRunStatus::PendingApproval),
            PayRunStatus::PendingApproval => Some(PayRunStatus::Approved),
            PayRunStatus::Approved => Some(PayRunStatus::Finalising),
            PayRunStatus::Finalising => Some(PayRunStatus::Finalised),
            PayRunStatus::Finalised => Some(PayRunStatus::Closed),
            PayRunStatus::Closed => None,
        }
    }

    /// Whether a normal transition from this status to `target` is legal.
    pub fn can_transition_to(&self, target: PayRunStatus) -> bool {
        self.successor() == Some(target)
    }

    /// Lines may be excluded, included or have exceptions resolved.
    pub fn lines_editable(&self) -> bool {
        matches!(
            self,
            PayRunStatus::Calculated | PayRunStatus::Review | PayRunStatus::PendingApproval
        )
    }

    /// Approved or beyond: lines are frozen outside the re-open path.
    pub fn is_frozen(&self) -> bool {
        *self >= PayRunStatus::Approved
    }

    /// Whether the run may be re-opened back to `calculated`.
    pub fn can_reopen(&self) -> bool {
        *self >= PayRunStatus::Approved && *self != PayRunStatus::Closed
    }

    /// Returns the snake_case name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayRunStatus::Draft => "draft",
            PayRunStatus::InputsLocked => "inputs_locked",
            PayRunStatus::Calculating => "calculating",
            PayRunStatus::Calculated => "calculated",
            PayRunStatus::Review => "review",
            PayRunStatus::PendingApproval => "pending_approval",
            PayRunStatus::Approved => "approved",
            PayRunStatus::Finalising => "finalising",
            PayRunStatus::Finalised => "finalised",
            PayRunStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PayRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate amounts over the included lines of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunTotals {
    /// Sum of gross earnings.
    pub gross_earnings: Decimal,
    /// Sum of total deductions.
    pub total_deductions: Decimal,
    /// Sum of employer contributions.
    pub employer_contributions: Decimal,
    /// Sum of net pay.
    pub net_pay: Decimal,
    /// Sum of PAYE.
    pub paye: Decimal,
    /// Sum of employee UIF.
    pub uif_employee: Decimal,
    /// Sum of employer UIF.
    pub uif_employer: Decimal,
    /// Sum of SDL.
    pub sdl: Decimal,
}

impl RunTotals {
    /// Sums the included lines.
    pub fn from_lines(lines: &[PayRunLine]) -> Self {
        lines
            .iter()
            .filter(|line| line.is_included)
            .fold(RunTotals::default(), |mut totals, line| {
                totals.gross_earnings += line.gross_earnings;
                totals.total_deductions += line.total_deductions;
                totals.employer_contributions += line.total_employer_contributions;
                totals.net_pay += line.net_pay;
                totals.paye += line.paye;
                totals.uif_employee += line.uif_employee;
                totals.uif_employer += line.uif_employer;
                totals.sdl += line.sdl;
                totals
            })
    }
}

/// A downstream output produced once a run is finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Employee payslips.
    Payslips,
    /// The salary bank payment file.
    BankFile,
    /// The general ledger journal.
    Journal,
}

impl OutputKind {
    /// Every output, in the order they are triggered.
    pub const ALL: [OutputKind; 3] = [OutputKind::Payslips, OutputKind::BankFile, OutputKind::Journal];

    /// Returns the snake_case name of the output.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Payslips => "payslips",
            OutputKind::BankFile => "bank_file",
            OutputKind::Journal => "journal",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream output requests recorded on the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputFlags {
    /// Payslip generation requested.
    pub payslips_generated: bool,
    /// Bank file generation requested.
    pub bank_file_generated: bool,
    /// General ledger journal requested.
    pub journal_generated: bool,
}

impl OutputFlags {
    /// Whether the output has been requested.
    pub fn is_set(&self, kind: OutputKind) -> bool {
        match kind {
            OutputKind::Payslips => self.payslips_generated,
            OutputKind::BankFile => self.bank_file_generated,
            OutputKind::Journal => self.journal_generated,
        }
    }

    /// Marks the output as requested.
    pub fn set(&mut self, kind: OutputKind) {
        match kind {
            OutputKind::Payslips => self.payslips_generated = true,
            OutputKind::BankFile => self.bank_file_generated = true,
            OutputKind::Journal => self.journal_generated = true,
        }
    }

    /// Whether any output has been requested.
    pub fn any(&self) -> bool {
        OutputKind::ALL.iter().any(|kind| self.is_set(*kind))
    }

    /// Whether every output has been requested.
    pub fn all(&self) -> bool {
        OutputKind::ALL.iter().all(|kind| self.is_set(*kind))
    }
}

/// One entry in a run's append-only audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Status before the change.
    pub from: PayRunStatus,
    /// Status after the change.
    pub to: PayRunStatus,
    /// Who made the change.
    pub actor: String,
    /// When it was made.
    pub at: DateTime<Utc>,
    /// Optional context, e.g. a re-open reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One payroll cycle for a tenant, frequency and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayRun {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Pay frequency.
    pub frequency: PayFrequency,
    /// Period number within the tax year.
    pub period_number: u32,
    /// Tax year.
    pub tax_year: TaxYear,
    /// First day of the period.
    pub period_start: NaiveDate,
    /// Last day of the period.
    pub period_end: NaiveDate,
    /// Input cut-off date.
    pub cut_off_date: NaiveDate,
    /// Payment date.
    pub pay_date: NaiveDate,
    /// Current lifecycle status.
    pub status: PayRunStatus,
    /// Incremented on every committed change; used for optimistic concurrency.
    pub version: u64,
    /// Lines on the run.
    pub employee_count: usize,
    /// Included lines.
    pub processed_count: usize,
    /// Unresolved exceptions of any severity across included lines.
    pub exception_count: usize,
    /// Included lines with an unresolved error-severity exception.
    pub blocking_count: usize,
    /// Totals over included lines.
    pub totals: RunTotals,
    /// Who created the run.
    pub created_by: String,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// Who last calculated the run.
    pub calculated_by: Option<String>,
    /// When the run was last calculated.
    pub calculated_at: Option<DateTime<Utc>>,
    /// Who approved the run.
    pub approved_by: Option<String>,
    /// When the run was approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// Who finalised the run.
    pub finalised_by: Option<String>,
    /// When the run was finalised.
    pub finalised_at: Option<DateTime<Utc>>,
    /// Who last re-opened the run.
    pub reopened_by: Option<String>,
    /// When the run was last re-opened.
    pub reopened_at: Option<DateTime<Utc>>,
    /// Why the run was last re-opened.
    pub reopen_reason: Option<String>,
    /// Downstream output requests.
    pub outputs: OutputFlags,
    /// Outputs claimed by an in-flight finalise whose trigger has not yet
    /// been confirmed. At most one caller holds each claim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs_pending: Vec<OutputKind>,
    /// Every status change, oldest first.
    pub history: Vec<TransitionRecord>,
}

impl PayRun {
    /// Creates a draft run for a calculated pay period.
    pub fn new(tenant_id: impl Into<String>, period: &PayPeriod, actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            frequency: period.frequency,
            period_number: period.period_number,
            tax_year: period.tax_year,
            period_start: period.start_date,
            period_end: period.end_date,
            cut_off_date: period.cut_off_date,
            pay_date: period.pay_date,
            status: PayRunStatus::Draft,
            version: 0,
            employee_count: 0,
            processed_count: 0,
            exception_count: 0,
            blocking_count: 0,
            totals: RunTotals::default(),
            created_by: actor.to_string(),
            created_at: now,
            calculated_by: None,
            calculated_at: None,
            approved_by: None,
            approved_at: None,
            finalised_by: None,
            finalised_at: None,
            reopened_by: None,
            reopened_at: None,
            reopen_reason: None,
            outputs: OutputFlags::default(),
            outputs_pending: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Rebuilds the pay period the run covers.
    pub fn period(&self) -> PayPeriod {
        PayPeriod {
            frequency: self.frequency,
            period_number: self.period_number,
            tax_year: self.tax_year,
            start_date: self.period_start,
            end_date: self.period_end,
            cut_off_date: self.cut_off_date,
            pay_date: self.pay_date,
        }
    }

    /// Moves the run to `to` and appends a history entry.
    pub fn record_transition(
        &mut self,
        to: PayRunStatus,
        actor: &str,
        at: DateTime<Utc>,
        note: Option<String>,
    ) {
        self.history.push(TransitionRecord {
            from: self.status,
            to,
            actor: actor.to_string(),
            at,
            note,
        });
        self.status = to;
    }

    /// Recomputes totals and counts from the run's lines.
    pub fn apply_lines(&mut self, lines: &[PayRunLine]) {
        self.totals = RunTotals::from_lines(lines);
        self.employee_count = lines.len();
        self.processed_count = lines.iter().filter(|l| l.is_included).count();
        self.exception_count = lines
            .iter()
            .filter(|l| l.is_included)
            .map(PayRunLine::unresolved_exception_count)
            .sum();
        self.blocking_count = lines.iter().filter(|l| l.is_blocking()).count();
    }
}
