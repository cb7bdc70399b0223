//! The pay run state machine.
//!
//! [`PayRunProcessor`] owns every mutation of a pay run. Each operation reads
//! the authoritative run from the [`PayRunStore`], checks the run is in the
//! status the operation requires, and commits the new header (plus lines and
//! inputs where the step produces them) as one conditional write. A writer
//! that loses a race re-reads and re-validates, up to
//! `max_transition_attempts` times.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calculation::{
    ExceptionContext, ExceptionDetector, GrossToNetInput, PayElementRegistry, calculate_line,
    calculate_pay_period,
};
use crate::config::PayrollConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    BlockingLine, EmployeeSnapshot, ExceptionResolution, OutputFlags, OutputKind, PayElement,
    PayFrequency, PayPeriod, PayRun, PayRunLine, PayRunStatus, TaxYear, YtdFigures,
};

use super::collaborators::{EmployeeDirectory, LeaveService, OutputGenerator};
use super::store::{InputsChange, PayRunStore, RunCommit, RunInputs};

/// A line edit and the run header it was committed with.
#[derive(Debug, Clone)]
pub struct LineUpdate {
    /// The run with recomputed totals.
    pub run: PayRun,
    /// The edited line.
    pub line: PayRunLine,
}

/// Orchestrates pay runs through their lifecycle.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use payrun_engine::config::ConfigLoader;
/// use payrun_engine::models::{PayFrequency, TaxYear};
/// use payrun_engine::payrun::{
///     InMemoryEmployeeDirectory, InMemoryLeaveService, InMemoryPayRunStore, PayRunProcessor,
///     RecordingOutputGenerator,
/// };
///
/// # async fn run() -> payrun_engine::error::EngineResult<()> {
/// let loader = ConfigLoader::load("./config/za")?;
/// let processor = PayRunProcessor::new(
///     loader.config(),
///     Arc::new(InMemoryPayRunStore::new()),
///     Arc::new(InMemoryEmployeeDirectory::new()),
///     Arc::new(InMemoryLeaveService::new()),
///     Arc::new(RecordingOutputGenerator::new()),
/// );
///
/// let run = processor.create_run("acme", PayFrequency::Monthly, 1, TaxYear::new(2025), "payroll.admin")?;
/// processor.lock_inputs(run.id, "payroll.admin")?;
/// let run = processor.calculate(run.id, "payroll.admin").await?;
/// println!("Net pay: {}", run.totals.net_pay);
/// # Ok(())
/// # }
/// ```
pub struct PayRunProcessor {
    config: Arc<PayrollConfig>,
    store: Arc<dyn PayRunStore>,
    directory: Arc<dyn EmployeeDirectory>,
    leave: Arc<dyn LeaveService>,
    outputs: Arc<dyn OutputGenerator>,
    detector: Arc<ExceptionDetector>,
    elements: RwLock<HashMap<String, PayElementRegistry>>,
}

impl PayRunProcessor {
    /// Creates a processor with the built-in exception rules.
    pub fn new(
        config: Arc<PayrollConfig>,
        store: Arc<dyn PayRunStore>,
        directory: Arc<dyn EmployeeDirectory>,
        leave: Arc<dyn LeaveService>,
        outputs: Arc<dyn OutputGenerator>,
    ) -> Self {
        let detector = ExceptionDetector::with_default_rules(config.settings().large_variance_percent);
        Self {
            config,
            store,
            directory,
            leave,
            outputs,
            detector: Arc::new(detector),
            elements: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the exception detector.
    pub fn with_detector(mut self, detector: ExceptionDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    /// The configuration the processor calculates with.
    pub fn config(&self) -> &PayrollConfig {
        &self.config
    }

    // ---- pay elements ----

    /// Adds or replaces a tenant's pay element.
    pub fn register_element(&self, tenant_id: &str, element: PayElement) -> EngineResult<()> {
        require_text("tenant_id", tenant_id)?;
        let code = element.code().to_string();
        let mut registries = self.elements.write().map_err(|_| poisoned())?;
        let replaced = registries
            .entry(tenant_id.to_string())
            .or_default()
            .register(element);
        info!(
            tenant_id,
            code = %code,
            replaced = replaced.is_some(),
            "Pay element registered"
        );
        Ok(())
    }

    /// Marks a tenant's pay element inactive.
    pub fn deactivate_element(&self, tenant_id: &str, code: &str) -> EngineResult<()> {
        let mut registries = self.elements.write().map_err(|_| poisoned())?;
        let registry = registries
            .get_mut(tenant_id)
            .ok_or_else(|| EngineError::PayElementNotFound {
                code: code.trim().to_uppercase(),
            })?;
        registry.deactivate(code)?;
        info!(tenant_id, code, "Pay element deactivated");
        Ok(())
    }

    /// A tenant's pay elements ordered by code.
    pub fn elements(&self, tenant_id: &str) -> EngineResult<Vec<PayElement>> {
        Ok(self.element_registry(tenant_id)?.all().cloned().collect())
    }

    fn element_registry(&self, tenant_id: &str) -> EngineResult<PayElementRegistry> {
        let registries = self.elements.read().map_err(|_| poisoned())?;
        Ok(registries
            .get(tenant_id)
            .map(PayElementRegistry::snapshot)
            .unwrap_or_default())
    }

    // ---- queries ----

    /// Loads a run.
    pub fn get_run(&self, run_id: Uuid) -> EngineResult<PayRun> {
        self.store.get_run(run_id)
    }

    /// A run's lines ordered by employee number, with full bank details.
    pub fn lines(&self, run_id: Uuid) -> EngineResult<Vec<PayRunLine>> {
        self.store.lines(run_id)
    }

    /// Every run of a tenant.
    pub fn list_runs(&self, tenant_id: &str) -> EngineResult<Vec<PayRun>> {
        self.store.list_runs(tenant_id)
    }

    /// The inputs frozen at `inputs_locked`, if any.
    pub fn inputs(&self, run_id: Uuid) -> EngineResult<Option<RunInputs>> {
        self.store.inputs(run_id)
    }

    // ---- lifecycle ----

    /// Creates a draft run for one tenant, frequency and period.
    pub fn create_run(
        &self,
        tenant_id: &str,
        frequency: PayFrequency,
        period_number: u32,
        tax_year: TaxYear,
        actor: &str,
    ) -> EngineResult<PayRun> {
        require_text("tenant_id", tenant_id)?;
        require_text("actor", actor)?;
        self.config.tax_policy(tax_year)?;

        let period = calculate_pay_period(frequency, period_number, tax_year, self.config.settings())?;
        let run = self
            .store
            .insert_run(PayRun::new(tenant_id.trim(), &period, actor, Utc::now()))?;

        info!(
            run_id = %run.id,
            tenant_id = %run.tenant_id,
            frequency = %frequency,
            period_number,
            tax_year = %tax_year,
            actor,
            "Pay run created"
        );
        Ok(run)
    }

    /// `draft → inputs_locked`: freezes the roster, element definitions and leave.
    pub fn lock_inputs(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let read = self.store.get_run(run_id)?;
        require_status(&read, &[PayRunStatus::Draft], "lock inputs")?;

        let inputs = self.build_inputs(&read, actor)?;
        let employee_count = inputs.employees.len();

        let run = self.transition(run_id, "lock inputs", |current| {
            require_status(current, &[PayRunStatus::Draft], "lock inputs")?;
            let mut next = current.clone();
            next.employee_count = employee_count;
            next.record_transition(PayRunStatus::InputsLocked, actor, Utc::now(), None);
            Ok(RunCommit::header(current, next).with_inputs(InputsChange::Replace(inputs.clone())))
        })?;

        info!(run_id = %run.id, employee_count, actor, "Pay run inputs locked");
        Ok(run)
    }

    /// `inputs_locked → draft`: discards the frozen inputs.
    pub fn unlock_inputs(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let run = self.transition(run_id, "unlock inputs", |current| {
            require_status(current, &[PayRunStatus::InputsLocked], "unlock inputs")?;
            let mut next = current.clone();
            next.employee_count = 0;
            next.record_transition(PayRunStatus::Draft, actor, Utc::now(), None);
            Ok(RunCommit::header(current, next).with_inputs(InputsChange::Clear))
        })?;

        info!(run_id = %run.id, actor, "Pay run inputs unlocked");
        Ok(run)
    }

    /// `inputs_locked → calculating → calculated`.
    ///
    /// Re-runnable from `calculating` and `calculated`: every run replaces all
    /// lines. Exclusions and resolutions on the previous lines carry over.
    pub async fn calculate(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let attempts = self.config.settings().max_transition_attempts;
        let mut attempt = 1;
        loop {
            match self.calculate_once(run_id, actor).await {
                Err(err @ EngineError::ConcurrentModification { .. }) if attempt < attempts => {
                    warn!(run_id = %run_id, attempt, error = %err, "Calculation lost a race, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn calculate_once(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        let read = self.store.get_run(run_id)?;
        require_status(
            &read,
            &[
                PayRunStatus::InputsLocked,
                PayRunStatus::Calculating,
                PayRunStatus::Calculated,
            ],
            "calculate",
        )?;

        let inputs = self
            .store
            .inputs(run_id)?
            .ok_or_else(|| EngineError::CalculationError {
                message: format!("pay run {} has no locked inputs", run_id),
            })?;
        let previous_lines = self.store.lines(run_id)?;
        let prior = self.store.last_finalised_lines(
            &read.tenant_id,
            read.frequency,
            read.tax_year,
            read.period_number,
        )?;

        let calculating = if read.status == PayRunStatus::Calculating {
            read
        } else {
            let mut next = read.clone();
            next.record_transition(PayRunStatus::Calculating, actor, Utc::now(), None);
            self.store.commit(RunCommit::header(&read, next))?
        };

        info!(
            run_id = %run_id,
            tenant_id = %calculating.tenant_id,
            employee_count = inputs.employees.len(),
            prior_lines = prior.len(),
            "Calculating pay run"
        );

        let lines = self.compute_lines(&calculating, inputs, prior).await?;
        let lines = carry_over(lines, &previous_lines);

        let now = Utc::now();
        let mut next = calculating.clone();
        next.apply_lines(&lines);
        next.calculated_by = Some(actor.to_string());
        next.calculated_at = Some(now);
        next.record_transition(PayRunStatus::Calculated, actor, now, None);
        let run = self
            .store
            .commit(RunCommit::header(&calculating, next).with_lines(lines))?;

        info!(
            run_id = %run.id,
            processed_count = run.processed_count,
            exception_count = run.exception_count,
            blocking_count = run.blocking_count,
            net_pay = %run.totals.net_pay,
            "Pay run calculated"
        );
        Ok(run)
    }

    async fn compute_lines(
        &self,
        run: &PayRun,
        inputs: RunInputs,
        prior: HashMap<String, PayRunLine>,
    ) -> EngineResult<Vec<PayRunLine>> {
        let batch_size = self.config.settings().calculation_batch_size.max(1);
        let count = inputs.employees.len();
        let context = Arc::new(BatchContext {
            run_id: run.id,
            period: run.period(),
            inputs,
            prior,
            config: Arc::clone(&self.config),
            detector: Arc::clone(&self.detector),
        });

        let mut tasks = JoinSet::new();
        for start in (0..count).step_by(batch_size) {
            let end = (start + batch_size).min(count);
            let context = Arc::clone(&context);
            tasks.spawn_blocking(move || context.calculate_range(start..end));
        }
        debug!(run_id = %run.id, batches = tasks.len(), batch_size, "Dispatched calculation batches");

        let mut lines = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            let batch = joined.map_err(|e| EngineError::CalculationError {
                message: format!("calculation task failed: {}", e),
            })??;
            lines.extend(batch);
        }
        lines.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));
        Ok(lines)
    }

    /// `calculated → review`.
    pub fn submit_for_review(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let run = self.transition(run_id, "submit for review", |current| {
            require_status(current, &[PayRunStatus::Calculated], "submit for review")?;
            let mut next = current.clone();
            next.record_transition(PayRunStatus::Review, actor, Utc::now(), None);
            Ok(RunCommit::header(current, next))
        })?;

        info!(run_id = %run.id, actor, "Pay run submitted for review");
        Ok(run)
    }

    /// `review → pending_approval`. Rejected while blocking exceptions remain.
    pub fn submit_for_approval(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let run = self.transition(run_id, "submit for approval", |current| {
            require_status(current, &[PayRunStatus::Review], "submit for approval")?;
            self.check_blocking(current)?;
            let mut next = current.clone();
            next.record_transition(PayRunStatus::PendingApproval, actor, Utc::now(), None);
            Ok(RunCommit::header(current, next))
        })?;

        info!(run_id = %run.id, actor, "Pay run submitted for approval");
        Ok(run)
    }

    /// `pending_approval → approved`. Re-checks blocking exceptions.
    pub fn approve(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let run = self.transition(run_id, "approve", |current| {
            require_status(current, &[PayRunStatus::PendingApproval], "approve")?;
            self.check_blocking(current)?;
            let now = Utc::now();
            let mut next = current.clone();
            next.approved_by = Some(actor.to_string());
            next.approved_at = Some(now);
            next.record_transition(PayRunStatus::Approved, actor, now, None);
            Ok(RunCommit::header(current, next))
        })?;

        info!(run_id = %run.id, approved_by = actor, net_pay = %run.totals.net_pay, "Pay run approved");
        Ok(run)
    }

    /// `approved → finalising → finalised`.
    ///
    /// Each output not yet requested is first claimed on the run, so only
    /// the caller whose claim commits triggers it. If a trigger fails the
    /// claim is released, the run stays in `finalising` and the call can be
    /// repeated.
    pub fn finalise(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let mut run = self.transition(run_id, "finalise", |current| {
            require_status(
                current,
                &[PayRunStatus::Approved, PayRunStatus::Finalising],
                "finalise",
            )?;
            let mut next = current.clone();
            if current.status == PayRunStatus::Approved {
                next.record_transition(PayRunStatus::Finalising, actor, Utc::now(), None);
            }
            Ok(RunCommit::header(current, next))
        })?;

        for kind in OutputKind::ALL {
            if run.outputs.is_set(kind) {
                continue;
            }
            self.claim_output(run_id, kind)?;
            if let Err(err) = self.outputs.trigger(kind, run_id) {
                warn!(run_id = %run_id, output = %kind, error = %err, "Output trigger failed, run stays finalising");
                if let Err(release) = self.release_output(run_id, kind) {
                    warn!(run_id = %run_id, output = %kind, error = %release, "Output claim not released");
                }
                return Err(err);
            }
            run = self.transition(run_id, "record output request", |current| {
                require_status(current, &[PayRunStatus::Finalising], "record output request")?;
                let mut next = current.clone();
                next.outputs.set(kind);
                next.outputs_pending.retain(|pending| *pending != kind);
                Ok(RunCommit::header(current, next))
            })?;
            debug!(run_id = %run_id, output = %kind, "Output generation requested");
        }

        let run = self.transition(run_id, "finalise", |current| {
            require_status(current, &[PayRunStatus::Finalising], "finalise")?;
            if let Some(kind) = OutputKind::ALL.into_iter().find(|k| !current.outputs.is_set(*k)) {
                return Err(EngineError::OutputInProgress {
                    run_id,
                    output: kind.to_string(),
                });
            }
            let now = Utc::now();
            let mut next = current.clone();
            next.finalised_by = Some(actor.to_string());
            next.finalised_at = Some(now);
            next.record_transition(PayRunStatus::Finalised, actor, now, None);
            Ok(RunCommit::header(current, next))
        })?;

        info!(run_id = %run.id, finalised_by = actor, "Pay run finalised");
        Ok(run)
    }

    /// Records this caller's claim on an output. Fails when the output is
    /// already requested or claimed by another caller.
    fn claim_output(&self, run_id: Uuid, kind: OutputKind) -> EngineResult<PayRun> {
        self.transition(run_id, "claim output", |current| {
            require_status(current, &[PayRunStatus::Finalising], "claim output")?;
            if current.outputs.is_set(kind) || current.outputs_pending.contains(&kind) {
                return Err(EngineError::OutputInProgress {
                    run_id,
                    output: kind.to_string(),
                });
            }
            let mut next = current.clone();
            next.outputs_pending.push(kind);
            Ok(RunCommit::header(current, next))
        })
    }

    fn release_output(&self, run_id: Uuid, kind: OutputKind) -> EngineResult<PayRun> {
        self.transition(run_id, "release output", |current| {
            let mut next = current.clone();
            next.outputs_pending.retain(|pending| *pending != kind);
            Ok(RunCommit::header(current, next))
        })
    }

    /// `finalised → closed`. Terminal.
    pub fn close(&self, run_id: Uuid, actor: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        let run = self.transition(run_id, "close", |current| {
            require_status(current, &[PayRunStatus::Finalised], "close")?;
            let mut next = current.clone();
            next.record_transition(PayRunStatus::Closed, actor, Utc::now(), None);
            Ok(RunCommit::header(current, next))
        })?;

        info!(run_id = %run.id, actor, "Pay run closed");
        Ok(run)
    }

    /// Returns an approved, finalising or finalised run to `calculated`.
    ///
    /// The re-open commits first: output flags and claims are cleared and the
    /// re-open stamp recorded. Outputs the committed-from state had requested
    /// are then invalidated. If invalidation fails the run stays re-opened
    /// and the error is returned.
    pub fn reopen(&self, run_id: Uuid, actor: &str, reason: &str) -> EngineResult<PayRun> {
        require_text("actor", actor)?;
        require_text("reason", reason)?;

        let mut from = None;
        let run = self.transition(run_id, "reopen", |current| {
            require_reopenable(current)?;
            from = Some((
                current.status,
                current.outputs.any() || !current.outputs_pending.is_empty(),
            ));
            let now = Utc::now();
            let mut next = current.clone();
            next.reopened_by = Some(actor.to_string());
            next.reopened_at = Some(now);
            next.reopen_reason = Some(reason.trim().to_string());
            next.outputs = OutputFlags::default();
            next.outputs_pending.clear();
            next.approved_by = None;
            next.approved_at = None;
            next.finalised_by = None;
            next.finalised_at = None;
            next.record_transition(
                PayRunStatus::Calculated,
                actor,
                now,
                Some(reason.trim().to_string()),
            );
            Ok(RunCommit::header(current, next))
        })?;

        let (from_status, had_outputs) = from.ok_or(EngineError::RunNotFound { run_id })?;
        warn!(
            run_id = %run.id,
            reopened_by = actor,
            from = %from_status,
            reason = reason.trim(),
            "Pay run re-opened"
        );

        if had_outputs {
            if let Err(err) = self.outputs.invalidate(run_id) {
                warn!(run_id = %run_id, error = %err, "Output invalidation failed after re-open");
                return Err(err);
            }
            debug!(run_id = %run_id, "Generated outputs invalidated");
        }
        Ok(run)
    }

    // ---- line operations ----

    /// Excludes a line from totals and outputs.
    pub fn exclude_line(
        &self,
        run_id: Uuid,
        line_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> EngineResult<LineUpdate> {
        require_text("actor", actor)?;
        require_text("reason", reason)?;
        let update = self.edit_line(run_id, line_id, "exclude line", |line| {
            line.is_included = false;
            line.exclusion_reason = Some(reason.trim().to_string());
            Ok(())
        })?;

        info!(
            run_id = %run_id,
            line_id = %line_id,
            employee_number = %update.line.employee_number,
            actor,
            "Pay run line excluded"
        );
        Ok(update)
    }

    /// Includes a previously excluded line.
    pub fn include_line(&self, run_id: Uuid, line_id: Uuid, actor: &str) -> EngineResult<LineUpdate> {
        require_text("actor", actor)?;
        let update = self.edit_line(run_id, line_id, "include line", |line| {
            line.is_included = true;
            line.exclusion_reason = None;
            Ok(())
        })?;

        info!(
            run_id = %run_id,
            line_id = %line_id,
            employee_number = %update.line.employee_number,
            actor,
            "Pay run line included"
        );
        Ok(update)
    }

    /// Records a resolution on one exception of a line.
    pub fn resolve_exception(
        &self,
        run_id: Uuid,
        line_id: Uuid,
        exception_id: Uuid,
        note: &str,
        actor: &str,
    ) -> EngineResult<LineUpdate> {
        require_text("actor", actor)?;
        require_text("note", note)?;
        let update = self.edit_line(run_id, line_id, "resolve exception", |line| {
            let exception = line
                .exceptions
                .iter_mut()
                .find(|e| e.id == exception_id)
                .ok_or(EngineError::ExceptionNotFound {
                    line_id,
                    exception_id,
                })?;
            exception.resolution = Some(ExceptionResolution {
                resolved_by: actor.to_string(),
                resolved_at: Utc::now(),
                note: note.trim().to_string(),
            });
            Ok(())
        })?;

        info!(
            run_id = %run_id,
            line_id = %line_id,
            exception_id = %exception_id,
            actor,
            "Pay exception resolved"
        );
        Ok(update)
    }

    fn edit_line<F>(
        &self,
        run_id: Uuid,
        line_id: Uuid,
        action: &str,
        mut edit: F,
    ) -> EngineResult<LineUpdate>
    where
        F: FnMut(&mut PayRunLine) -> EngineResult<()>,
    {
        let mut edited = None;
        let run = self.transition(run_id, action, |current| {
            if !current.status.lines_editable() {
                return Err(EngineError::StateConflict {
                    run_id,
                    action: action.to_string(),
                    current: current.status,
                });
            }
            let mut lines = self.store.lines(run_id)?;
            let line = lines
                .iter_mut()
                .find(|l| l.id == line_id)
                .ok_or(EngineError::LineNotFound { run_id, line_id })?;
            edit(line)?;
            edited = Some(line.clone());

            let mut next = current.clone();
            next.apply_lines(&lines);
            Ok(RunCommit::header(current, next).with_lines(lines))
        })?;

        let line = edited.ok_or(EngineError::LineNotFound { run_id, line_id })?;
        Ok(LineUpdate { run, line })
    }

    // ---- helpers ----

    /// Reads, validates and commits, retrying when another writer got there first.
    fn transition<F>(&self, run_id: Uuid, action: &str, mut build: F) -> EngineResult<PayRun>
    where
        F: FnMut(&PayRun) -> EngineResult<RunCommit>,
    {
        let attempts = self.config.settings().max_transition_attempts;
        let mut attempt = 1;
        loop {
            let current = self.store.get_run(run_id)?;
            let commit = build(&current)?;
            match self.store.commit(commit) {
                Err(err @ EngineError::ConcurrentModification { .. }) if attempt < attempts => {
                    warn!(run_id = %run_id, action, attempt, error = %err, "Pay run changed concurrently, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn check_blocking(&self, run: &PayRun) -> EngineResult<()> {
        let lines = self.store.lines(run.id)?;
        let blocking: Vec<BlockingLine> = lines.iter().filter_map(PayRunLine::as_blocking_line).collect();
        if blocking.is_empty() {
            return Ok(());
        }

        let count = blocking.iter().map(|l| l.kinds.len()).sum();
        warn!(
            run_id = %run.id,
            blocking_lines = blocking.len(),
            blocking_exceptions = count,
            "Pay run blocked by unresolved exceptions"
        );
        Err(EngineError::BlockingExceptions {
            run_id: run.id,
            count,
            lines: blocking,
        })
    }

    fn build_inputs(&self, run: &PayRun, actor: &str) -> EngineResult<RunInputs> {
        let period = run.period();
        let elements = self.element_registry(&run.tenant_id)?;
        let mut employees = self.directory.active_employees(&run.tenant_id, &period)?;

        let mut numbers = HashSet::new();
        for employee in &employees {
            validate_employee(employee, &elements)?;
            if !numbers.insert(employee.employee_number.trim().to_string()) {
                return Err(EngineError::InvalidInput {
                    field: "employee_number".to_string(),
                    message: format!(
                        "employee number {} appears more than once on the roster",
                        employee.employee_number
                    ),
                });
            }
        }
        employees.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));

        let mut unpaid_leave = HashMap::new();
        for employee in &employees {
            let days = self.unpaid_leave(run, employee, &period)?;
            if !days.is_zero() {
                unpaid_leave.insert(employee.employee_id.clone(), days);
            }
        }

        Ok(RunInputs {
            employees,
            elements: elements.snapshot(),
            unpaid_leave,
            locked_by: actor.to_string(),
            locked_at: Utc::now(),
        })
    }

    fn unpaid_leave(
        &self,
        run: &PayRun,
        employee: &EmployeeSnapshot,
        period: &PayPeriod,
    ) -> EngineResult<Decimal> {
        let days = self
            .leave
            .unpaid_leave_days(&run.tenant_id, &employee.employee_id, period)?;
        if days.is_sign_negative() && !days.is_zero() {
            return Err(EngineError::InvalidInput {
                field: "unpaid_leave_days".to_string(),
                message: format!(
                    "employee {} has negative unpaid leave {}",
                    employee.employee_number, days
                ),
            });
        }
        Ok(days)
    }
}

impl std::fmt::Debug for PayRunProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayRunProcessor")
            .field("settings", self.config.settings())
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

/// Shared read-only state for the calculation batches of one run.
struct BatchContext {
    run_id: Uuid,
    period: PayPeriod,
    inputs: RunInputs,
    prior: HashMap<String, PayRunLine>,
    config: Arc<PayrollConfig>,
    detector: Arc<ExceptionDetector>,
}

impl BatchContext {
    fn calculate_range(&self, range: Range<usize>) -> EngineResult<Vec<PayRunLine>> {
        let policy = self.config.tax_policy(self.period.tax_year)?;
        let settings = self.config.settings();
        let no_history = YtdFigures::default();

        self.inputs.employees[range]
            .iter()
            .map(|employee| {
                let prior_line = self.prior.get(&employee.employee_id);
                let mut line = calculate_line(&GrossToNetInput {
                    run_id: self.run_id,
                    employee,
                    unpaid_leave_days: self.inputs.unpaid_leave_for(&employee.employee_id),
                    elements: &self.inputs.elements,
                    prior_ytd: prior_line.map(|l| &l.ytd).unwrap_or(&no_history),
                    period: &self.period,
                    policy,
                    settings,
                })
                .inspect_err(|err| {
                    warn!(
                        run_id = %self.run_id,
                        employee_number = %employee.employee_number,
                        error = %err,
                        "Line calculation failed"
                    );
                })?;

                let exceptions = self.detector.detect(&ExceptionContext {
                    line: &line,
                    employee,
                    period: &self.period,
                    prior_line,
                });
                line.exceptions = exceptions;
                Ok(line)
            })
            .collect()
    }
}

/// Applies exclusions and resolutions from the previous calculation to the new lines.
fn carry_over(mut lines: Vec<PayRunLine>, previous: &[PayRunLine]) -> Vec<PayRunLine> {
    let by_employee: HashMap<&str, &PayRunLine> = previous
        .iter()
        .map(|l| (l.employee_id.as_str(), l))
        .collect();

    for line in &mut lines {
        let Some(old) = by_employee.get(line.employee_id.as_str()) else {
            continue;
        };
        if !old.is_included {
            line.is_included = false;
            line.exclusion_reason = old.exclusion_reason.clone();
        }
        for exception in &mut line.exceptions {
            exception.resolution = old
                .exceptions
                .iter()
                .find(|e| e.kind == exception.kind && e.is_resolved())
                .and_then(|e| e.resolution.clone());
        }
    }
    lines
}

fn validate_employee(employee: &EmployeeSnapshot, elements: &PayElementRegistry) -> EngineResult<()> {
    let label = if employee.employee_number.trim().is_empty() {
        employee.employee_id.clone()
    } else {
        employee.employee_number.clone()
    };
    let missing = |field: &str| EngineError::MissingEmployeeData {
        employee: label.clone(),
        field: field.to_string(),
    };

    if employee.employee_id.trim().is_empty() {
        return Err(missing("employee_id"));
    }
    if employee.employee_number.trim().is_empty() {
        return Err(missing("employee_number"));
    }
    if employee.first_name.trim().is_empty() {
        return Err(missing("first_name"));
    }
    if employee.last_name.trim().is_empty() {
        return Err(missing("last_name"));
    }
    if employee.basic_salary.is_sign_negative() && !employee.basic_salary.is_zero() {
        return Err(missing("basic_salary"));
    }
    for assignment in &employee.elements {
        elements
            .assignable(&assignment.code)
            .map_err(|err| EngineError::InvalidInput {
                field: format!("{}.elements.{}", label, assignment.code.trim().to_uppercase()),
                message: err.to_string(),
            })?;
    }
    Ok(())
}

fn require_status(run: &PayRun, allowed: &[PayRunStatus], action: &str) -> EngineResult<()> {
    if allowed.contains(&run.status) {
        Ok(())
    } else {
        Err(EngineError::StateConflict {
            run_id: run.id,
            action: action.to_string(),
            current: run.status,
        })
    }
}

fn require_reopenable(run: &PayRun) -> EngineResult<()> {
    if run.status.can_reopen() {
        Ok(())
    } else {
        Err(EngineError::StateConflict {
            run_id: run.id,
            action: "reopen".to_string(),
            current: run.status,
        })
    }
}

fn require_text(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput {
            field: field.to_string(),
            message: "must not be blank".to_string(),
        });
    }
    Ok(())
}

fn poisoned() -> EngineError {
    EngineError::Persistence {
        message: "pay element registry lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::models::{BankDetails, ElementAssignment, ExceptionKind, PayElementType, TaxTreatment};
    use crate::payrun::{
        InMemoryEmployeeDirectory, InMemoryLeaveService, InMemoryPayRunStore,
        RecordingOutputGenerator,
    };
    use crate::models::CalculationMethod;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TENANT: &str = "acme";
    const ADMIN: &str = "payroll.admin";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn employee(number: &str, basic: &str) -> EmployeeSnapshot {
        EmployeeSnapshot {
            employee_id: format!("id_{}", number.to_lowercase()),
            employee_number: number.to_string(),
            first_name: "Thandi".to_string(),
            last_name: "Nkosi".to_string(),
            id_number: Some("9001150800087".to_string()),
            tax_number: Some("0123456789".to_string()),
            department: None,
            job_title: None,
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 15),
            start_date: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
            termination_date: None,
            basic_salary: dec(basic),
            uif_exempt: false,
            bank_details: Some(BankDetails {
                bank_name: "First National".to_string(),
                branch_code: "250655".to_string(),
                account_number: "62812345678".to_string(),
                account_holder: "T Nkosi".to_string(),
                account_type: None,
            }),
            elements: vec![],
        }
    }

    struct Harness {
        processor: PayRunProcessor,
        directory: Arc<InMemoryEmployeeDirectory>,
        outputs: Arc<RecordingOutputGenerator>,
    }

    fn harness_with_store(store: Arc<dyn PayRunStore>) -> Harness {
        let config = ConfigLoader::load("./config/za").unwrap().config();
        let directory = Arc::new(InMemoryEmployeeDirectory::new());
        let outputs = Arc::new(RecordingOutputGenerator::new());
        let processor = PayRunProcessor::new(
            config,
            store,
            directory.clone(),
            Arc::new(InMemoryLeaveService::new()),
            outputs.clone(),
        );
        Harness {
            processor,
            directory,
            outputs,
        }
    }

    fn harness() -> Harness {
        harness_with_store(Arc::new(InMemoryPayRunStore::new()))
    }

    async fn calculated_run(h: &Harness, period: u32) -> PayRun {
        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, period, TaxYear::new(2025), ADMIN)
            .unwrap();
        h.processor.lock_inputs(run.id, ADMIN).unwrap();
        h.processor.calculate(run.id, ADMIN).await.unwrap()
    }

    fn approve(h: &Harness, run_id: Uuid) -> PayRun {
        h.processor.submit_for_review(run_id, ADMIN).unwrap();
        h.processor.submit_for_approval(run_id, ADMIN).unwrap();
        h.processor.approve(run_id, "finance.manager").unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "35000")])
            .unwrap();

        let run = calculated_run(&h, 1).await;
        assert_eq!(run.status, PayRunStatus::Calculated);
        assert_eq!(run.employee_count, 1);
        assert_eq!(run.totals.gross_earnings, dec("35000.00"));
        assert_eq!(run.totals.paye, dec("6289.33"));
        assert_eq!(run.totals.net_pay, dec("28533.55"));
        assert_eq!(run.calculated_by.as_deref(), Some(ADMIN));

        let run = approve(&h, run.id);
        assert_eq!(run.approved_by.as_deref(), Some("finance.manager"));

        let run = h.processor.finalise(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::Finalised);
        assert!(run.outputs.payslips_generated);
        assert!(run.outputs.bank_file_generated);
        assert!(run.outputs.journal_generated);
        assert_eq!(h.outputs.triggered().len(), 3);

        let run = h.processor.close(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::Closed);
        let statuses: Vec<PayRunStatus> = run.history.iter().map(|t| t.to).collect();
        assert_eq!(statuses, PayRunStatus::ALL[1..].to_vec());
    }

    #[test]
    fn test_create_run_validation() {
        let h = harness();
        let blank_actor = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), "  ");
        assert!(matches!(blank_actor, Err(EngineError::InvalidInput { .. })));

        let no_table = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2031), ADMIN);
        assert!(matches!(no_table, Err(EngineError::TaxTableNotFound { .. })));

        let bad_period = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 13, TaxYear::new(2025), ADMIN);
        assert!(matches!(bad_period, Err(EngineError::InvalidPeriod { .. })));

        h.processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        let duplicate = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN);
        assert!(matches!(duplicate, Err(EngineError::DuplicateRun { .. })));
    }

    #[test]
    fn test_lock_inputs_rejects_incomplete_employee() {
        let h = harness();
        let mut nameless = employee("EMP002", "20000");
        nameless.last_name = " ".to_string();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000"), nameless])
            .unwrap();

        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        match h.processor.lock_inputs(run.id, ADMIN) {
            Err(EngineError::MissingEmployeeData { employee, field }) => {
                assert_eq!(employee, "EMP002");
                assert_eq!(field, "last_name");
            }
            other => panic!("expected MissingEmployeeData, got {:?}", other),
        }
        assert_eq!(h.processor.get_run(run.id).unwrap().status, PayRunStatus::Draft);
    }

    #[test]
    fn test_lock_inputs_rejects_unknown_element() {
        let h = harness();
        let mut emp = employee("EMP001", "20000");
        emp.elements.push(ElementAssignment::new("TRAVEL"));
        h.directory.set_employees(TENANT, vec![emp]).unwrap();

        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        match h.processor.lock_inputs(run.id, ADMIN) {
            Err(EngineError::InvalidInput { field, .. }) => assert_eq!(field, "EMP001.elements.TRAVEL"),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_locked_inputs_ignore_later_element_changes() {
        let h = harness();
        let travel = PayElement::new(
            "TRAVEL",
            "Travel allowance",
            PayElementType::Earning,
            CalculationMethod::Fixed { amount: dec("1500") },
            TaxTreatment::remuneration(),
        )
        .unwrap();
        h.processor.register_element(TENANT, travel).unwrap();

        let mut emp = employee("EMP001", "20000");
        emp.elements.push(ElementAssignment::new("TRAVEL"));
        h.directory.set_employees(TENANT, vec![emp]).unwrap();

        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        h.processor.lock_inputs(run.id, ADMIN).unwrap();
        h.processor.deactivate_element(TENANT, "travel").unwrap();

        let run = h.processor.calculate(run.id, ADMIN).await.unwrap();
        assert_eq!(run.totals.gross_earnings, dec("21500.00"));
        assert!(!h.processor.elements(TENANT).unwrap()[0].is_active());
    }

    #[tokio::test]
    async fn test_calculate_requires_locked_inputs() {
        let h = harness();
        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        let result = h.processor.calculate(run.id, ADMIN).await;
        assert!(matches!(
            result,
            Err(EngineError::StateConflict {
                current: PayRunStatus::Draft,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unlock_returns_to_draft() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        h.processor.lock_inputs(run.id, ADMIN).unwrap();
        assert!(h.processor.inputs(run.id).unwrap().is_some());

        let run = h.processor.unlock_inputs(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::Draft);
        assert!(h.processor.inputs(run.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocking_exception_gates_approval_until_resolved() {
        let h = harness();
        let mut unbanked = employee("EMP002", "18000");
        unbanked.bank_details = None;
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000"), unbanked])
            .unwrap();

        let run = calculated_run(&h, 1).await;
        assert_eq!(run.blocking_count, 1);
        h.processor.submit_for_review(run.id, ADMIN).unwrap();

        match h.processor.submit_for_approval(run.id, ADMIN) {
            Err(EngineError::BlockingExceptions { count, lines, .. }) => {
                assert_eq!(count, 1);
                assert_eq!(lines[0].employee_number, "EMP002");
                assert_eq!(lines[0].kinds, vec![ExceptionKind::MissingBankDetails]);
            }
            other => panic!("expected BlockingExceptions, got {:?}", other),
        }
        assert_eq!(h.processor.get_run(run.id).unwrap().status, PayRunStatus::Review);

        let line = h.processor.lines(run.id).unwrap().remove(1);
        let exception_id = line.exceptions[0].id;
        let update = h
            .processor
            .resolve_exception(run.id, line.id, exception_id, "paid by cheque", "reviewer")
            .unwrap();
        assert_eq!(update.run.blocking_count, 0);
        assert!(update.line.exceptions[0].is_resolved());

        let run = h.processor.submit_for_approval(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::PendingApproval);
    }

    #[tokio::test]
    async fn test_line_edits_validate_targets() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = calculated_run(&h, 1).await;
        let line = h.processor.lines(run.id).unwrap().remove(0);

        assert!(matches!(
            h.processor.exclude_line(run.id, Uuid::new_v4(), "left", ADMIN),
            Err(EngineError::LineNotFound { .. })
        ));
        assert!(matches!(
            h.processor.exclude_line(run.id, line.id, "", ADMIN),
            Err(EngineError::InvalidInput { .. })
        ));
        assert!(matches!(
            h.processor.resolve_exception(run.id, line.id, Uuid::new_v4(), "ok", ADMIN),
            Err(EngineError::ExceptionNotFound { .. })
        ));

        approve(&h, run.id);
        assert!(matches!(
            h.processor.include_line(run.id, line.id, ADMIN),
            Err(EngineError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_exclusion_survives_recalculation() {
        let h = harness();
        h.directory
            .set_employees(
                TENANT,
                vec![employee("EMP001", "20000"), employee("EMP002", "30000")],
            )
            .unwrap();
        let run = calculated_run(&h, 1).await;
        let line = h.processor.lines(run.id).unwrap().remove(1);

        let update = h
            .processor
            .exclude_line(run.id, line.id, "on hold", ADMIN)
            .unwrap();
        assert_eq!(update.run.processed_count, 1);
        assert_eq!(update.run.totals.gross_earnings, dec("20000.00"));

        let run = h.processor.calculate(run.id, ADMIN).await.unwrap();
        assert_eq!(run.processed_count, 1);
        let lines = h.processor.lines(run.id).unwrap();
        assert!(!lines[1].is_included);
        assert_eq!(lines[1].exclusion_reason.as_deref(), Some("on hold"));

        let update = h.processor.include_line(run.id, lines[1].id, ADMIN).unwrap();
        assert_eq!(update.run.totals.gross_earnings, dec("50000.00"));
    }

    #[tokio::test]
    async fn test_failed_output_leaves_run_finalising() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = calculated_run(&h, 1).await;
        approve(&h, run.id);

        h.outputs.fail_on(OutputKind::BankFile);
        let result = h.processor.finalise(run.id, ADMIN);
        assert!(matches!(result, Err(EngineError::OutputTrigger { .. })));

        let stuck = h.processor.get_run(run.id).unwrap();
        assert_eq!(stuck.status, PayRunStatus::Finalising);
        assert!(stuck.outputs.payslips_generated);
        assert!(!stuck.outputs.bank_file_generated);
        assert!(stuck.outputs_pending.is_empty());

        h.outputs.clear_failures();
        let run = h.processor.finalise(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::Finalised);
        let kinds: Vec<OutputKind> = h.outputs.triggered().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, OutputKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_reopen_finalised_run() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = calculated_run(&h, 1).await;
        approve(&h, run.id);
        h.processor.finalise(run.id, ADMIN).unwrap();

        assert!(matches!(
            h.processor.reopen(run.id, ADMIN, " "),
            Err(EngineError::InvalidInput { .. })
        ));

        let run = h
            .processor
            .reopen(run.id, "finance.manager", "bonus omitted")
            .unwrap();
        assert_eq!(run.status, PayRunStatus::Calculated);
        assert_eq!(run.outputs, OutputFlags::default());
        assert_eq!(run.reopen_reason.as_deref(), Some("bonus omitted"));
        assert!(run.approved_by.is_none());
        assert_eq!(h.outputs.invalidated(), vec![run.id]);
        assert_eq!(
            run.history.last().and_then(|t| t.note.as_deref()),
            Some("bonus omitted")
        );

        approve(&h, run.id);
        h.processor.finalise(run.id, ADMIN).unwrap();
        h.processor.close(run.id, ADMIN).unwrap();
        assert!(matches!(
            h.processor.reopen(run.id, ADMIN, "too late"),
            Err(EngineError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_ytd_accumulates_from_finalised_runs() {
        let h = harness();
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "35000")])
            .unwrap();

        let march = calculated_run(&h, 1).await;
        approve(&h, march.id);
        h.processor.finalise(march.id, ADMIN).unwrap();

        let april = calculated_run(&h, 2).await;
        let line = h.processor.lines(april.id).unwrap().remove(0);
        assert_eq!(line.ytd.gross, dec("70000.00"));
        assert_eq!(line.ytd.paye, dec("12578.66"));
        assert_eq!(line.ytd.net, dec("57067.10"));
    }

    /// Lets another writer bump the run version just before the first commit.
    /// Lets a rival writer commit just before the first commit `when` accepts.
    struct RacingStore {
        inner: InMemoryPayRunStore,
        raced: AtomicBool,
        when: fn(&RunCommit) -> bool,
        rival: fn(&PayRun) -> PayRun,
    }

    impl RacingStore {
        fn new(when: fn(&RunCommit) -> bool, rival: fn(&PayRun) -> PayRun) -> Self {
            Self {
                inner: InMemoryPayRunStore::new(),
                raced: AtomicBool::new(false),
                when,
                rival,
            }
        }
    }

    impl PayRunStore for RacingStore {
        fn insert_run(&self, run: PayRun) -> EngineResult<PayRun> {
            self.inner.insert_run(run)
        }

        fn get_run(&self, run_id: Uuid) -> EngineResult<PayRun> {
            self.inner.get_run(run_id)
        }

        fn list_runs(&self, tenant_id: &str) -> EngineResult<Vec<PayRun>> {
            self.inner.list_runs(tenant_id)
        }

        fn lines(&self, run_id: Uuid) -> EngineResult<Vec<PayRunLine>> {
            self.inner.lines(run_id)
        }

        fn inputs(&self, run_id: Uuid) -> EngineResult<Option<RunInputs>> {
            self.inner.inputs(run_id)
        }

        fn commit(&self, commit: RunCommit) -> EngineResult<PayRun> {
            if (self.when)(&commit) && !self.raced.swap(true, Ordering::SeqCst) {
                let current = self.inner.get_run(commit.run.id)?;
                self.inner
                    .commit(RunCommit::header(&current, (self.rival)(&current)))?;
            }
            self.inner.commit(commit)
        }

        fn last_finalised_lines(
            &self,
            tenant_id: &str,
            frequency: PayFrequency,
            tax_year: TaxYear,
            before_period: u32,
        ) -> EngineResult<HashMap<String, PayRunLine>> {
            self.inner
                .last_finalised_lines(tenant_id, frequency, tax_year, before_period)
        }
    }

    #[test]
    fn test_transition_retries_after_concurrent_write() {
        let h = harness_with_store(Arc::new(RacingStore::new(|_| true, |run| run.clone())));
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = h
            .processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();

        let run = h.processor.lock_inputs(run.id, ADMIN).unwrap();
        assert_eq!(run.status, PayRunStatus::InputsLocked);
        assert_eq!(run.version, 2);
        assert_eq!(run.history.len(), 1);
    }
    #[tokio::test]
    async fn test_reopen_losing_race_to_close_keeps_outputs() {
        let h = harness_with_store(Arc::new(RacingStore::new(
            |commit| {
                commit.expected_status == PayRunStatus::Finalised
                    && commit.run.status == PayRunStatus::Calculated
            },
            |run| {
                let mut closed = run.clone();
                closed.record_transition(PayRunStatus::Closed, "other.admin", Utc::now(), None);
                closed
            },
        )));
        h.directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let run = calculated_run(&h, 1).await;
        approve(&h, run.id);
        h.processor.finalise(run.id, ADMIN).unwrap();

        let result = h.processor.reopen(run.id, "finance.manager", "bonus omitted");
        assert!(matches!(
            result,
            Err(EngineError::StateConflict {
                current: PayRunStatus::Closed,
                ..
            })
        ));
        assert!(h.outputs.invalidated().is_empty());

        let run = h.processor.get_run(run.id).unwrap();
        assert_eq!(run.status, PayRunStatus::Closed);
        assert!(run.outputs.all());
        assert!(run.reopen_reason.is_none());
    }

    struct SlowOutputGenerator {
        inner: RecordingOutputGenerator,
    }

    impl OutputGenerator for SlowOutputGenerator {
        fn trigger(&self, kind: OutputKind, run_id: Uuid) -> EngineResult<()> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.trigger(kind, run_id)
        }

        fn invalidate(&self, run_id: Uuid) -> EngineResult<()> {
            self.inner.invalidate(run_id)
        }
    }

    #[tokio::test]
    async fn test_concurrent_finalise_triggers_each_output_once() {
        let outputs = Arc::new(SlowOutputGenerator {
            inner: RecordingOutputGenerator::new(),
        });
        let directory = Arc::new(InMemoryEmployeeDirectory::new());
        directory
            .set_employees(TENANT, vec![employee("EMP001", "20000")])
            .unwrap();
        let processor = PayRunProcessor::new(
            ConfigLoader::load("./config/za").unwrap().config(),
            Arc::new(InMemoryPayRunStore::new()),
            directory,
            Arc::new(InMemoryLeaveService::new()),
            outputs.clone(),
        );
        let run = processor
            .create_run(TENANT, PayFrequency::Monthly, 1, TaxYear::new(2025), ADMIN)
            .unwrap();
        processor.lock_inputs(run.id, ADMIN).unwrap();
        processor.calculate(run.id, ADMIN).await.unwrap();
        processor.submit_for_review(run.id, ADMIN).unwrap();
        processor.submit_for_approval(run.id, ADMIN).unwrap();
        processor.approve(run.id, "finance.manager").unwrap();

        let (first, second) = std::thread::scope(|scope| {
            let first = scope.spawn(|| processor.finalise(run.id, ADMIN));
            let second = scope.spawn(|| processor.finalise(run.id, "finance.manager"));
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_eq!([&first, &second].iter().filter(|r| r.is_ok()).count(), 1);
        let err = first.as_ref().err().or(second.as_ref().err()).unwrap();
        assert!(err.is_retryable(), "unexpected error: {}", err);

        let kinds: Vec<OutputKind> = outputs.inner.triggered().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds.len(), 3);
        for kind in OutputKind::ALL {
            assert_eq!(kinds.iter().filter(|k| **k == kind).count(), 1, "{} triggered twice", kind);
        }

        let run = processor.get_run(run.id).unwrap();
        assert_eq!(run.status, PayRunStatus::Finalised);
        assert!(run.outputs_pending.is_empty());
    }
}
