//! Pay run persistence.
//!
//! The [`PayRunStore`] trait is the persistence port of the state machine:
//! every transition is one [`RunCommit`] that the store applies atomically
//! after checking the run has not moved since it was read.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::PayElementRegistry;
use crate::error::{EngineError, EngineResult};
use crate::models::{EmployeeSnapshot, PayFrequency, PayRun, PayRunLine, PayRunStatus, TaxYear};

/// The inputs frozen when a run's inputs are locked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInputs {
    /// The roster, ordered by employee number.
    pub employees: Vec<EmployeeSnapshot>,
    /// The element definitions in force at lock time.
    pub elements: PayElementRegistry,
    /// Unpaid leave days keyed by employee id.
    pub unpaid_leave: HashMap<String, Decimal>,
    /// Who locked the inputs.
    pub locked_by: String,
    /// When the inputs were locked.
    pub locked_at: DateTime<Utc>,
}

impl RunInputs {
    /// Unpaid leave days for an employee, zero when none were reported.
    pub fn unpaid_leave_for(&self, employee_id: &str) -> Decimal {
        self.unpaid_leave
            .get(employee_id)
            .copied()
            .unwrap_or_default()
    }
}

/// What a commit does to the run's frozen inputs.
#[derive(Debug, Clone, Default)]
pub enum InputsChange {
    /// Leave them as they are.
    #[default]
    Keep,
    /// Store new inputs.
    Replace(RunInputs),
    /// Discard them.
    Clear,
}

/// One atomic write of a run header, and optionally its lines and inputs.
#[derive(Debug, Clone)]
pub struct RunCommit {
    /// The new header. The store assigns its version.
    pub run: PayRun,
    /// The version the writer read.
    pub expected_version: u64,
    /// The status the writer read.
    pub expected_status: PayRunStatus,
    /// Replaces every line of the run when present.
    pub lines: Option<Vec<PayRunLine>>,
    /// Change to the frozen inputs.
    pub inputs: InputsChange,
}

impl RunCommit {
    /// A header-only commit against the state `read` was loaded in.
    pub fn header(read: &PayRun, run: PayRun) -> Self {
        Self {
            run,
            expected_version: read.version,
            expected_status: read.status,
            lines: None,
            inputs: InputsChange::Keep,
        }
    }

    /// Replaces the run's lines in the same write.
    pub fn with_lines(mut self, lines: Vec<PayRunLine>) -> Self {
        self.lines = Some(lines);
        self
    }

    /// Changes the run's inputs in the same write.
    pub fn with_inputs(mut self, inputs: InputsChange) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Persistence for pay runs, their lines and their frozen inputs.
pub trait PayRunStore: Send + Sync {
    /// Stores a new run. Fails with [`EngineError::DuplicateRun`] when a run
    /// already exists for the tenant, frequency, tax year and period.
    fn insert_run(&self, run: PayRun) -> EngineResult<PayRun>;

    /// Loads a run.
    fn get_run(&self, run_id: Uuid) -> EngineResult<PayRun>;

    /// Every run of a tenant, ordered by tax year, frequency and period.
    fn list_runs(&self, tenant_id: &str) -> EngineResult<Vec<PayRun>>;

    /// The run's lines, ordered by employee number.
    fn lines(&self, run_id: Uuid) -> EngineResult<Vec<PayRunLine>>;

    /// The run's frozen inputs, if locked.
    fn inputs(&self, run_id: Uuid) -> EngineResult<Option<RunInputs>>;

    /// Applies a commit atomically if the stored run still has the expected
    /// version and status. Returns the stored header.
    fn commit(&self, commit: RunCommit) -> EngineResult<PayRun>;

    /// For each employee, the included line of the latest finalised or closed
    /// run of the same tenant, frequency and tax year before `before_period`.
    fn last_finalised_lines(
        &self,
        tenant_id: &str,
        frequency: PayFrequency,
        tax_year: TaxYear,
        before_period: u32,
    ) -> EngineResult<HashMap<String, PayRunLine>>;
}

#[derive(Debug, Default)]
struct StoreState {
    runs: HashMap<Uuid, PayRun>,
    lines: HashMap<Uuid, Vec<PayRunLine>>,
    inputs: HashMap<Uuid, RunInputs>,
}

/// A [`PayRunStore`] held in memory behind a single lock.
#[derive(Debug, Default)]
pub struct InMemoryPayRunStore {
    state: RwLock<StoreState>,
}

impl InMemoryPayRunStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| EngineError::Persistence {
            message: "pay run store lock poisoned".to_string(),
        })
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| EngineError::Persistence {
            message: "pay run store lock poisoned".to_string(),
        })
    }
}

impl PayRunStore for InMemoryPayRunStore {
    fn insert_run(&self, run: PayRun) -> EngineResult<PayRun> {
        let mut state = self.write()?;
        let existing = state.runs.values().find(|r| {
            r.tenant_id == run.tenant_id
                && r.frequency == run.frequency
                && r.tax_year == run.tax_year
                && r.period_number == run.period_number
        });
        if let Some(existing) = existing {
            return Err(EngineError::DuplicateRun {
                frequency: run.frequency.to_string(),
                period_number: run.period_number,
                tax_year: run.tax_year.to_string(),
                existing: existing.id,
            });
        }
        if state.runs.contains_key(&run.id) {
            return Err(EngineError::Persistence {
                message: format!("run id {} already stored", run.id),
            });
        }
        state.runs.insert(run.id, run.clone());
        state.lines.insert(run.id, Vec::new());
        Ok(run)
    }

    fn get_run(&self, run_id: Uuid) -> EngineResult<PayRun> {
        self.read()?
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(EngineError::RunNotFound { run_id })
    }

    fn list_runs(&self, tenant_id: &str) -> EngineResult<Vec<PayRun>> {
        let mut runs: Vec<PayRun> = self
            .read()?
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| {
            (a.tax_year, a.frequency.as_str(), a.period_number).cmp(&(
                b.tax_year,
                b.frequency.as_str(),
                b.period_number,
            ))
        });
        Ok(runs)
    }

    fn lines(&self, run_id: Uuid) -> EngineResult<Vec<PayRunLine>> {
        self.read()?
            .lines
            .get(&run_id)
            .cloned()
            .ok_or(EngineError::RunNotFound { run_id })
    }

    fn inputs(&self, run_id: Uuid) -> EngineResult<Option<RunInputs>> {
        let state = self.read()?;
        if !state.runs.contains_key(&run_id) {
            return Err(EngineError::RunNotFound { run_id });
        }
        Ok(state.inputs.get(&run_id).cloned())
    }

    fn commit(&self, commit: RunCommit) -> EngineResult<PayRun> {
        let mut state = self.write()?;
        let run_id = commit.run.id;
        let stored = state
            .runs
            .get(&run_id)
            .ok_or(EngineError::RunNotFound { run_id })?;

        if stored.version != commit.expected_version {
            return Err(EngineError::ConcurrentModification {
                run_id,
                expected: commit.expected_version,
                actual: stored.version,
            });
        }
        if stored.status != commit.expected_status {
            return Err(EngineError::StateConflict {
                run_id,
                action: format!("move from '{}'", commit.expected_status),
                current: stored.status,
            });
        }

        let mut run = commit.run;
        run.version = commit.expected_version + 1;
        state.runs.insert(run_id, run.clone());
        if let Some(mut lines) = commit.lines {
            lines.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));
            state.lines.insert(run_id, lines);
        }
        match commit.inputs {
            InputsChange::Keep => {}
            InputsChange::Replace(inputs) => {
                state.inputs.insert(run_id, inputs);
            }
            InputsChange::Clear => {
                state.inputs.remove(&run_id);
            }
        }
        Ok(run)
    }

    fn last_finalised_lines(
        &self,
        tenant_id: &str,
        frequency: PayFrequency,
        tax_year: TaxYear,
        before_period: u32,
    ) -> EngineResult<HashMap<String, PayRunLine>> {
        let state = self.read()?;
        let mut runs: Vec<&PayRun> = state
            .runs
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.frequency == frequency
                    && r.tax_year == tax_year
                    && r.period_number < before_period
                    && r.status >= PayRunStatus::Finalised
            })
            .collect();
        runs.sort_by_key(|r| r.period_number);

        let mut latest = HashMap::new();
        for run in runs {
            let lines = state.lines.get(&run.id).into_iter().flatten();
            for line in lines.filter(|l| l.is_included) {
                latest.insert(line.employee_id.clone(), line.clone());
            }
        }
        Ok(latest)
    }
}
