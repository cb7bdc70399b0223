//! Ports to the systems a pay run reads from and triggers.
//!
//! The engine never owns employee records, leave balances or payslip
//! rendering. Hosts plug in adapters for these traits; the in-memory
//! implementations here back tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{EmployeeSnapshot, OutputKind, PayPeriod};

/// Source of employee snapshots for a tenant.
pub trait EmployeeDirectory: Send + Sync {
    /// Employees to pay for the period, as they stand now.
    fn active_employees(
        &self,
        tenant_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Vec<EmployeeSnapshot>>;
}

/// Source of unpaid leave taken in a period.
pub trait LeaveService: Send + Sync {
    /// Unpaid leave days the employee took within the period.
    fn unpaid_leave_days(
        &self,
        tenant_id: &str,
        employee_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Decimal>;
}

/// Starts output generation jobs. Generators read the run by id and never
/// write back into it.
pub trait OutputGenerator: Send + Sync {
    /// Requests generation of one output. Returns once the job is accepted.
    fn trigger(&self, kind: OutputKind, run_id: Uuid) -> EngineResult<()>;

    /// Withdraws every output already generated for the run.
    fn invalidate(&self, run_id: Uuid) -> EngineResult<()>;
}

/// An [`EmployeeDirectory`] backed by an in-memory roster per tenant.
///
/// Employees whose termination date falls before the period start are not
/// returned.
#[derive(Debug, Default)]
pub struct InMemoryEmployeeDirectory {
    rosters: RwLock<HashMap<String, Vec<EmployeeSnapshot>>>,
}

impl InMemoryEmployeeDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a tenant's roster.
    pub fn set_employees(&self, tenant_id: &str, employees: Vec<EmployeeSnapshot>) -> EngineResult<()> {
        let mut rosters = self.rosters.write().map_err(|_| poisoned("employee directory"))?;
        rosters.insert(tenant_id.to_string(), employees);
        Ok(())
    }

    /// Adds or replaces one employee by id.
    pub fn upsert_employee(&self, tenant_id: &str, employee: EmployeeSnapshot) -> EngineResult<()> {
        let mut rosters = self.rosters.write().map_err(|_| poisoned("employee directory"))?;
        let roster = rosters.entry(tenant_id.to_string()).or_default();
        match roster.iter_mut().find(|e| e.employee_id == employee.employee_id) {
            Some(existing) => *existing = employee,
            None => roster.push(employee),
        }
        Ok(())
    }
}

impl EmployeeDirectory for InMemoryEmployeeDirectory {
    fn active_employees(
        &self,
        tenant_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Vec<EmployeeSnapshot>> {
        let rosters = self.rosters.read().map_err(|_| poisoned("employee directory"))?;
        Ok(rosters
            .get(tenant_id)
            .map(|roster| {
                roster
                    .iter()
                    .filter(|e| e.start_date <= period.end_date)
                    .filter(|e| e.termination_date.is_none_or(|end| end >= period.start_date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A [`LeaveService`] backed by day counts keyed by tenant, employee and period start.
#[derive(Debug, Default)]
pub struct InMemoryLeaveService {
    unpaid: RwLock<HashMap<(String, String, NaiveDate), Decimal>>,
}

impl InMemoryLeaveService {
    /// Creates a service with no leave recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records unpaid leave for the period starting on `period_start`.
    pub fn set_unpaid_leave(
        &self,
        tenant_id: &str,
        employee_id: &str,
        period_start: NaiveDate,
        days: Decimal,
    ) -> EngineResult<()> {
        let mut unpaid = self.unpaid.write().map_err(|_| poisoned("leave service"))?;
        unpaid.insert(
            (tenant_id.to_string(), employee_id.to_string(), period_start),
            days,
        );
        Ok(())
    }
}

impl LeaveService for InMemoryLeaveService {
    fn unpaid_leave_days(
        &self,
        tenant_id: &str,
        employee_id: &str,
        period: &PayPeriod,
    ) -> EngineResult<Decimal> {
        let unpaid = self.unpaid.read().map_err(|_| poisoned("leave service"))?;
        Ok(unpaid
            .get(&(
                tenant_id.to_string(),
                employee_id.to_string(),
                period.start_date,
            ))
            .copied()
            .unwrap_or_default())
    }
}

/// An [`OutputGenerator`] that records requests instead of producing files.
///
/// Individual outputs can be made to fail, which is how tests exercise a
/// run stuck in `finalising`.
#[derive(Debug, Default)]
pub struct RecordingOutputGenerator {
    triggered: Mutex<Vec<(OutputKind, Uuid)>>,
    invalidated: Mutex<Vec<Uuid>>,
    failing: Mutex<Vec<OutputKind>>,
}

impl RecordingOutputGenerator {
    /// Creates a generator that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes requests for `kind` fail until cleared.
    pub fn fail_on(&self, kind: OutputKind) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(kind);
        }
    }

    /// Accepts every request again.
    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Accepted requests, oldest first.
    pub fn triggered(&self) -> Vec<(OutputKind, Uuid)> {
        self.triggered.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Runs whose outputs were invalidated, oldest first.
    pub fn invalidated(&self) -> Vec<Uuid> {
        self.invalidated.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

impl OutputGenerator for RecordingOutputGenerator {
    fn trigger(&self, kind: OutputKind, run_id: Uuid) -> EngineResult<()> {
        let failing = self.failing.lock().map_err(|_| poisoned("output generator"))?;
        if failing.contains(&kind) {
            return Err(EngineError::OutputTrigger {
                output: kind.to_string(),
                message: "generator unavailable".to_string(),
            });
        }
        drop(failing);

        self.triggered
            .lock()
            .map_err(|_| poisoned("output generator"))?
            .push((kind, run_id));
        Ok(())
    }

    fn invalidate(&self, run_id: Uuid) -> EngineResult<()> {
        self.invalidated
            .lock()
            .map_err(|_| poisoned("output generator"))?
            .push(run_id);
        Ok(())
    }
}

fn poisoned(what: &str) -> EngineError {
    EngineError::Persistence {
        message: format!("{} lock poisoned", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::calculate_pay_period;
    use crate::config::PayrollSettings;
    use crate::models::{PayFrequency, TaxYear};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn april() -> PayPeriod {
        calculate_pay_period(
            PayFrequency::Monthly,
            2,
            TaxYear::new(2025),
            &PayrollSettings::default(),
        )
        .unwrap()
    }

    fn employee(id: &str, start: NaiveDate, end: Option<NaiveDate>) -> EmployeeSnapshot {
        EmployeeSnapshot {
            employee_id: id.to_string(),
            employee_number: id.to_uppercase(),
            first_name: "Test".to_string(),
            last_name: "Employee".to_string(),
            id_number: None,
            tax_number: None,
            department: None,
            job_title: None,
            date_of_birth: None,
            start_date: start,
            termination_date: end,
            basic_salary: dec("10000"),
            uif_exempt: false,
            bank_details: None,
            elements: vec![],
        }
    }

    #[test]
    fn test_directory_filters_by_employment_dates() {
        let directory = InMemoryEmployeeDirectory::new();
        directory
            .set_employees(
                "acme",
                vec![
                    employee("e1", ymd(2020, 1, 1), None),
                    employee("e2", ymd(2025, 5, 1), None),
                    employee("e3", ymd(2020, 1, 1), Some(ymd(2025, 3, 31))),
                    employee("e4", ymd(2020, 1, 1), Some(ymd(2025, 4, 1))),
                ],
            )
            .unwrap();

        let ids: Vec<String> = directory
            .active_employees("acme", &april())
            .unwrap()
            .into_iter()
            .map(|e| e.employee_id)
            .collect();
        assert_eq!(ids, vec!["e1", "e4"]);
        assert!(directory.active_employees("other", &april()).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let directory = InMemoryEmployeeDirectory::new();
        directory
            .upsert_employee("acme", employee("e1", ymd(2020, 1, 1), None))
            .unwrap();
        let mut raised = employee("e1", ymd(2020, 1, 1), None);
        raised.basic_salary = dec("12000");
        directory.upsert_employee("acme", raised).unwrap();

        let roster = directory.active_employees("acme", &april()).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].basic_salary, dec("12000"));
    }

    #[test]
    fn test_leave_is_per_period() {
        let leave = InMemoryLeaveService::new();
        leave
            .set_unpaid_leave("acme", "e1", ymd(2025, 4, 1), dec("1.5"))
            .unwrap();
        assert_eq!(leave.unpaid_leave_days("acme", "e1", &april()).unwrap(), dec("1.5"));
        assert_eq!(leave.unpaid_leave_days("acme", "e2", &april()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_recording_generator_failures() {
        let generator = RecordingOutputGenerator::new();
        let run_id = Uuid::new_v4();
        generator.fail_on(OutputKind::BankFile);

        assert!(generator.trigger(OutputKind::Payslips, run_id).is_ok());
        assert!(matches!(
            generator.trigger(OutputKind::BankFile, run_id),
            Err(EngineError::OutputTrigger { .. })
        ));

        generator.clear_failures();
        assert!(generator.trigger(OutputKind::BankFile, run_id).is_ok());
        generator.invalidate(run_id).unwrap();

        assert_eq!(
            generator.triggered(),
            vec![(OutputKind::Payslips, run_id), (OutputKind::BankFile, run_id)]
        );
        assert_eq!(generator.invalidated(), vec![run_id]);
    }
}
