//! Gross-to-net calculation for one employee.
//!
//! This module turns an employee snapshot, the run's frozen element registry
//! and the employee's prior year-to-date figures into a [`PayRunLine`]:
//! itemized earnings and deductions, PAYE, UIF, SDL, net pay and the updated
//! YTD accumulators. Every statutory step records an [`AuditStep`].

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::{PayrollSettings, TaxPolicy};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AuditStep, EmployeeSnapshot, LineItem, PayElementType, PayPeriod, PayRunLine, TaxTreatment,
    YtdFigures,
};

use super::elements::PayElementRegistry;
use super::paye::calculate_paye;
use super::rounding::round_cents;

/// Code of the basic salary earning.
pub const BASIC_CODE: &str = "BASIC";
/// Code of the PAYE deduction.
pub const PAYE_CODE: &str = "PAYE";
/// Code of the employee UIF deduction.
pub const UIF_CODE: &str = "UIF";
/// Code of the employer UIF contribution.
pub const UIF_EMPLOYER_CODE: &str = "UIF_ER";
/// Code of the skills development levy contribution.
pub const SDL_CODE: &str = "SDL";

/// Everything needed to calculate one employee's line.
#[derive(Debug, Clone, Copy)]
pub struct GrossToNetInput<'a> {
    /// The run the line belongs to.
    pub run_id: Uuid,
    /// The frozen employee snapshot.
    pub employee: &'a EmployeeSnapshot,
    /// Unpaid leave days in the period.
    pub unpaid_leave_days: Decimal,
    /// The run's frozen element definitions.
    pub elements: &'a PayElementRegistry,
    /// YTD figures from the last finalised line in the same tax year.
    pub prior_ytd: &'a YtdFigures,
    /// The pay period.
    pub period: &'a PayPeriod,
    /// The tax year's statutory tables.
    pub policy: &'a TaxPolicy,
    /// Tenant payroll settings.
    pub settings: &'a PayrollSettings,
}

/// Calculates one employee's pay run line.
///
/// The returned line is included and carries no exceptions; exception
/// detection runs over it afterwards.
///
/// # Errors
///
/// Fails when unpaid leave is negative, an assigned element is unknown, or a
/// formula cannot be evaluated.
pub fn calculate_line(input: &GrossToNetInput<'_>) -> EngineResult<PayRunLine> {
    let employee = input.employee;
    let frequency = input.period.frequency;
    let mut steps: Vec<AuditStep> = Vec::new();

    if input.unpaid_leave_days.is_sign_negative() && !input.unpaid_leave_days.is_zero() {
        return Err(EngineError::InvalidInput {
            field: "unpaid_leave_days".to_string(),
            message: format!(
                "employee {} has negative unpaid leave {}",
                employee.employee_number, input.unpaid_leave_days
            ),
        });
    }

    // Step 1: basic salary less unpaid leave
    let working_days = input.settings.working_days.for_frequency(frequency);
    let daily_rate = employee.basic_salary / working_days;
    let leave_deduction = daily_rate * input.unpaid_leave_days;
    let basic_amount = round_cents((employee.basic_salary - leave_deduction).max(Decimal::ZERO));
    steps.push(AuditStep {
        step_number: 1,
        rule_id: "basic_salary".to_string(),
        rule_name: "Basic Salary".to_string(),
        input: serde_json::json!({
            "basic_salary": employee.basic_salary.to_string(),
            "unpaid_leave_days": input.unpaid_leave_days.to_string(),
            "working_days": working_days.to_string(),
        }),
        output: serde_json::json!({ "basic_amount": basic_amount.to_string() }),
        reasoning: format!(
            "{} - ({} / {} x {}) = {}",
            employee.basic_salary,
            employee.basic_salary,
            working_days,
            input.unpaid_leave_days,
            basic_amount
        ),
    });

    let mut earnings = vec![LineItem {
        code: BASIC_CODE.to_string(),
        name: "Basic Salary".to_string(),
        element_type: PayElementType::Earning,
        method: "salary".to_string(),
        rate: None,
        units: None,
        percentage: None,
        amount: basic_amount,
        tax_treatment: TaxTreatment::remuneration(),
    }];
    let mut deductions = Vec::new();
    let mut employer_contributions = Vec::new();

    // Step 2: assigned elements, in assignment order
    for assignment in &employee.elements {
        let item = input
            .elements
            .resolve(assignment, employee.basic_salary)?;
        match item.element_type {
            PayElementType::Earning => earnings.push(item),
            PayElementType::Deduction => deductions.push(item),
            PayElementType::EmployerContribution => employer_contributions.push(item),
        }
    }

    let gross_earnings = sum(&earnings, |_| true);
    let taxable_earnings = sum(&earnings, |t| t.taxable);
    let pre_tax_deductions = sum(&deductions, |t| t.pre_tax);
    let taxable_income = (taxable_earnings - pre_tax_deductions).max(Decimal::ZERO);
    steps.push(AuditStep {
        step_number: 2,
        rule_id: "taxable_income".to_string(),
        rule_name: "Taxable Income".to_string(),
        input: serde_json::json!({
            "earnings": earnings.iter().map(|i| (i.code.clone(), i.amount.to_string())).collect::<Vec<_>>(),
            "pre_tax_deductions": pre_tax_deductions.to_string(),
        }),
        output: serde_json::json!({
            "gross_earnings": gross_earnings.to_string(),
            "taxable_income": taxable_income.to_string(),
        }),
        reasoning: format!(
            "max({} - {}, 0) = {}",
            taxable_earnings, pre_tax_deductions, taxable_income
        ),
    });

    // Step 3: PAYE
    let age = employee.age_on(input.period.tax_year.end_date());
    let paye_result = calculate_paye(taxable_income, frequency, age, input.policy, 3)?;
    let paye = paye_result.paye;
    steps.push(paye_result.audit_step);
    deductions.push(statutory_item(
        PAYE_CODE,
        "PAYE",
        PayElementType::Deduction,
        None,
        paye,
    ));

    // Step 4: UIF
    let uif_policy = &input.policy.uif;
    // Taxable income, less any taxable earning outside UIF remuneration
    let uif_excluded = sum(&earnings, |t| t.taxable && !t.uif_applicable);
    let uif_remuneration = (taxable_income - uif_excluded).max(Decimal::ZERO);
    let ceiling = uif_policy.period_ceiling(frequency);
    let uif_base = uif_remuneration.min(ceiling);
    let (uif_employee, uif_employer) = if employee.uif_exempt {
        (round_cents(Decimal::ZERO), round_cents(Decimal::ZERO))
    } else {
        (
            round_cents(uif_base * uif_policy.employee_rate),
            round_cents(uif_base * uif_policy.employer_rate),
        )
    };
    steps.push(AuditStep {
        step_number: 4,
        rule_id: "uif".to_string(),
        rule_name: "Unemployment Insurance".to_string(),
        input: serde_json::json!({
            "taxable_income": taxable_income.to_string(),
            "uif_excluded": uif_excluded.to_string(),
            "period_ceiling": round_cents(ceiling).to_string(),
            "uif_exempt": employee.uif_exempt,
        }),
        output: serde_json::json!({
            "uif_employee": uif_employee.to_string(),
            "uif_employer": uif_employer.to_string(),
        }),
        reasoning: if employee.uif_exempt {
            "Employee is exempt from UIF".to_string()
        } else {
            format!(
                "min({}, {}) x {} = {}",
                uif_remuneration,
                round_cents(ceiling),
                uif_policy.employee_rate.normalize(),
                uif_employee
            )
        },
    });
    if !employee.uif_exempt {
        deductions.push(statutory_item(
            UIF_CODE,
            "UIF (Employee)",
            PayElementType::Deduction,
            Some(uif_policy.employee_rate),
            uif_employee,
        ));
        employer_contributions.push(statutory_item(
            UIF_EMPLOYER_CODE,
            "UIF (Employer)",
            PayElementType::EmployerContribution,
            Some(uif_policy.employer_rate),
            uif_employer,
        ));
    }

    // Step 5: SDL
    let sdl = if input.settings.sdl_registered {
        round_cents(gross_earnings * input.policy.sdl.rate)
    } else {
        round_cents(Decimal::ZERO)
    };
    steps.push(AuditStep {
        step_number: 5,
        rule_id: "sdl".to_string(),
        rule_name: "Skills Development Levy".to_string(),
        input: serde_json::json!({
            "gross_earnings": gross_earnings.to_string(),
            "sdl_registered": input.settings.sdl_registered,
        }),
        output: serde_json::json!({ "sdl": sdl.to_string() }),
        reasoning: if input.settings.sdl_registered {
            format!(
                "{} x {} = {}",
                gross_earnings,
                input.policy.sdl.rate.normalize(),
                sdl
            )
        } else {
            "Employer is not registered for SDL".to_string()
        },
    });
    if input.settings.sdl_registered {
        employer_contributions.push(statutory_item(
            SDL_CODE,
            "Skills Development Levy",
            PayElementType::EmployerContribution,
            Some(input.policy.sdl.rate),
            sdl,
        ));
    }

    // Step 6: net pay
    let total_deductions = sum(&deductions, |_| true);
    let total_employer_contributions = sum(&employer_contributions, |_| true);
    let net_pay = gross_earnings - total_deductions;
    steps.push(AuditStep {
        step_number: 6,
        rule_id: "net_pay".to_string(),
        rule_name: "Net Pay".to_string(),
        input: serde_json::json!({
            "gross_earnings": gross_earnings.to_string(),
            "total_deductions": total_deductions.to_string(),
        }),
        output: serde_json::json!({ "net_pay": net_pay.to_string() }),
        reasoning: format!("{} - {} = {}", gross_earnings, total_deductions, net_pay),
    });

    let prior = input.prior_ytd;
    let ytd = YtdFigures {
        gross: prior.gross + gross_earnings,
        taxable: prior.taxable + taxable_income,
        paye: prior.paye + paye,
        uif: prior.uif + uif_employee,
        sdl: prior.sdl + sdl,
        net: prior.net + net_pay,
    };

    Ok(PayRunLine {
        id: Uuid::new_v4(),
        run_id: input.run_id,
        employee_id: employee.employee_id.clone(),
        employee_number: employee.employee_number.clone(),
        employee_name: employee.full_name(),
        id_number: employee.id_number.clone(),
        tax_number: employee.tax_number.clone(),
        department: employee.department.clone(),
        job_title: employee.job_title.clone(),
        basic_salary: employee.basic_salary,
        unpaid_leave_days: input.unpaid_leave_days,
        earnings,
        deductions,
        employer_contributions,
        gross_earnings,
        pre_tax_deductions,
        taxable_income,
        paye,
        uif_employee,
        uif_employer,
        sdl,
        total_deductions,
        total_employer_contributions,
        net_pay,
        ytd,
        is_included: true,
        exclusion_reason: None,
        exceptions: Vec::new(),
        bank_details: employee.bank_details.clone(),
        audit_trace: steps,
    })
}

fn sum(items: &[LineItem], include: impl Fn(&TaxTreatment) -> bool) -> Decimal {
    round_cents(
        items
            .iter()
            .filter(|i| include(&i.tax_treatment))
            .map(|i| i.amount)
            .sum(),
    )
}

fn statutory_item(
    code: &str,
    name: &str,
    element_type: PayElementType,
    rate: Option<Decimal>,
    amount: Decimal,
) -> LineItem {
    LineItem {
        code: code.to_string(),
        name: name.to_string(),
        element_type,
        method: "statutory".to_string(),
        rate,
        units: None,
        percentage: None,
        amount,
        tax_treatment: TaxTreatment::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::calculate_pay_period;
    use crate::config::{SdlPolicy, TaxBracket, TaxRebate, UifPolicy};
    use crate::models::{CalculationMethod, ElementAssignment, PayElement, PayFrequency, TaxYear};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn policy(monthly_ceiling: &str) -> TaxPolicy {
        let bracket = |threshold: &str, base_tax: &str, rate: &str| TaxBracket {
            threshold: dec(threshold),
            base_tax: dec(base_tax),
            rate: dec(rate),
        };
        TaxPolicy {
            tax_year: TaxYear::new(2025),
            brackets: vec![
                bracket("0", "0", "0.18"),
                bracket("237100", "42678", "0.26"),
                bracket("370500", "77362", "0.31"),
                bracket("512800", "121475", "0.36"),
                bracket("673000", "179147", "0.39"),
                bracket("857900", "251258", "0.41"),
                bracket("1817000", "644489", "0.45"),
            ],
            rebates: vec![TaxRebate {
                name: "primary".to_string(),
                amount: dec("17235"),
                min_age: 0,
            }],
            uif: UifPolicy {
                employee_rate: dec("0.01"),
                employer_rate: dec("0.01"),
                monthly_ceiling: dec(monthly_ceiling),
            },
            sdl: SdlPolicy { rate: dec("0.01") },
        }
    }

    fn employee(basic: &str) -> EmployeeSnapshot {
        EmployeeSnapshot {
            employee_id: "emp_001".to_string(),
            employee_number: "EMP001".to_string(),
            first_name: "Thandi".to_string(),
            last_name: "Nkosi".to_string(),
            id_number: Some("9001150800087".to_string()),
            tax_number: Some("0123456789".to_string()),
            department: None,
            job_title: None,
            date_of_birth: Some(NaiveDate::from_ymd_opt(1990, 1, 15).unwrap()),
            start_date: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
            termination_date: None,
            basic_salary: dec(basic),
            uif_exempt: false,
            bank_details: None,
            elements: vec![],
        }
    }

    fn registry() -> PayElementRegistry {
        PayElementRegistry::from_elements([
            PayElement::new(
                "PENSION",
                "Pension Fund",
                PayElementType::Deduction,
                CalculationMethod::Percentage {
                    percentage: dec("7.5"),
                },
                TaxTreatment::pre_tax_deduction(),
            )
            .unwrap(),
            PayElement::new(
                "LOAN",
                "Staff Loan",
                PayElementType::Deduction,
                CalculationMethod::Fixed {
                    amount: dec("1000.00"),
                },
                TaxTreatment::default(),
            )
            .unwrap(),
            PayElement::new(
                "MEDAID",
                "Medical Aid (Employer)",
                PayElementType::EmployerContribution,
                CalculationMethod::Fixed {
                    amount: dec("2500.00"),
                },
                TaxTreatment::default(),
            )
            .unwrap(),
            PayElement::new(
                "OT",
                "Overtime",
                PayElementType::Earning,
                CalculationMethod::Hourly {
                    rate: dec("300.00"),
                },
                TaxTreatment::remuneration(),
            )
            .unwrap(),
            PayElement::new(
                "TRAVEL",
                "Travel Allowance",
                PayElementType::Earning,
                CalculationMethod::Fixed {
                    amount: dec("2000.00"),
                },
                TaxTreatment {
                    taxable: true,
                    ..Default::default()
                },
            )
            .unwrap(),
        ])
    }

    fn calculate(
        employee: &EmployeeSnapshot,
        unpaid_leave_days: &str,
        policy: &TaxPolicy,
        settings: &PayrollSettings,
        prior_ytd: &YtdFigures,
    ) -> EngineResult<PayRunLine> {
        let period =
            calculate_pay_period(PayFrequency::Monthly, 1, TaxYear::new(2025), settings).unwrap();
        let elements = registry();
        calculate_line(&GrossToNetInput {
            run_id: Uuid::nil(),
            employee,
            unpaid_leave_days: dec(unpaid_leave_days),
            elements: &elements,
            prior_ytd,
            period: &period,
            policy,
            settings,
        })
    }

    fn item<'a>(items: &'a [LineItem], code: &str) -> &'a LineItem {
        items.iter().find(|i| i.code == code).unwrap()
    }

    #[test]
    fn test_basic_monthly_salary() {
        let line = calculate(
            &employee("35000.00"),
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.gross_earnings, dec("35000.00"));
        assert_eq!(line.taxable_income, dec("35000.00"));
        assert_eq!(line.paye, dec("6289.33"));
        // capped at 17712
        assert_eq!(line.uif_employee, dec("177.12"));
        assert_eq!(line.uif_employer, dec("177.12"));
        assert_eq!(line.sdl, dec("350.00"));
        assert_eq!(line.total_deductions, dec("6466.45"));
        assert_eq!(line.total_employer_contributions, dec("527.12"));
        assert_eq!(line.net_pay, dec("28533.55"));
        assert_eq!(line.employee_name, "Thandi Nkosi");
        assert!(line.is_included);
        assert_eq!(line.audit_trace.len(), 6);
    }

    #[test]
    fn test_uif_below_ceiling_is_one_percent_each() {
        let line = calculate(
            &employee("35000.00"),
            "0",
            &policy("40000"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.uif_employee, dec("350.00"));
        assert_eq!(line.uif_employer, dec("350.00"));
        assert_eq!(item(&line.deductions, UIF_CODE).amount, dec("350.00"));
        assert_eq!(item(&line.employer_contributions, UIF_EMPLOYER_CODE).amount, dec("350.00"));
    }

    #[test]
    fn test_uif_exempt_employee() {
        let mut snapshot = employee("35000.00");
        snapshot.uif_exempt = true;
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.uif_employee, dec("0.00"));
        assert_eq!(line.uif_employer, dec("0.00"));
        assert!(line.deductions.iter().all(|i| i.code != UIF_CODE));
    }

    #[test]
    fn test_not_sdl_registered() {
        let settings = PayrollSettings {
            sdl_registered: false,
            ..Default::default()
        };
        let line = calculate(
            &employee("35000.00"),
            "0",
            &policy("17712"),
            &settings,
            &YtdFigures::default(),
        )
        .unwrap();
        assert_eq!(line.sdl, dec("0.00"));
        assert!(line.employer_contributions.iter().all(|i| i.code != SDL_CODE));
    }

    #[test]
    fn test_pre_tax_deduction_reduces_taxable_income() {
        let mut snapshot = employee("40000.00");
        snapshot.elements = vec![ElementAssignment::new("PENSION")];
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.pre_tax_deductions, dec("3000.00"));
        assert_eq!(line.taxable_income, dec("37000.00"));
        // pension still reduces net pay
        assert_eq!(
            line.net_pay,
            line.gross_earnings - line.paye - line.uif_employee - dec("3000.00")
        );
    }

    #[test]
    fn test_pre_tax_deduction_reduces_uif_below_ceiling() {
        let mut snapshot = employee("15000.00");
        snapshot.elements = vec![ElementAssignment::new("PENSION")];
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.taxable_income, dec("13875.00"));
        // min(13875, 17712) x 1%
        assert_eq!(line.uif_employee, dec("138.75"));
        assert_eq!(line.uif_employer, dec("138.75"));
        assert_eq!(line.sdl, dec("150.00"));
        assert_eq!(line.audit_trace[3].reasoning, "min(13875.00, 17712.00) x 0.01 = 138.75");
    }

    #[test]
    fn test_sdl_applies_to_all_gross_earnings() {
        let mut snapshot = employee("20000.00");
        snapshot.elements = vec![ElementAssignment::new("TRAVEL")];
        let line = calculate(
            &snapshot,
            "0",
            &policy("40000"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.gross_earnings, dec("22000.00"));
        assert_eq!(line.taxable_income, dec("22000.00"));
        assert_eq!(line.sdl, dec("220.00"));
        assert_eq!(item(&line.employer_contributions, SDL_CODE).amount, dec("220.00"));
        // travel is taxable but outside UIF remuneration
        assert_eq!(line.uif_employee, dec("200.00"));
    }

    #[test]
    fn test_basic_salary_audit_shows_leave_deduction_grouped() {
        let line = calculate(
            &employee("21670.00"),
            "2",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(
            line.audit_trace[0].reasoning,
            "21670.00 - (21670.00 / 21.67 x 2) = 19670.00"
        );
    }

    #[test]
    fn test_post_tax_deduction_and_employer_contribution() {
        let mut snapshot = employee("35000.00");
        snapshot.elements = vec![ElementAssignment::new("LOAN"), ElementAssignment::new("MEDAID")];
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.taxable_income, dec("35000.00"));
        assert_eq!(line.total_deductions, dec("7466.45"));
        assert_eq!(line.net_pay, dec("27533.55"));
        assert_eq!(line.total_employer_contributions, dec("3027.12"));
    }

    #[test]
    fn test_additional_earning_is_taxed() {
        let mut snapshot = employee("30000.00");
        snapshot.elements = vec![ElementAssignment {
            hours: Some(dec("10")),
            ..ElementAssignment::new("OT")
        }];
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();

        assert_eq!(line.earnings.len(), 2);
        assert_eq!(line.gross_earnings, dec("33000.00"));
        assert_eq!(line.taxable_income, dec("33000.00"));
    }

    #[test]
    fn test_unpaid_leave_reduces_basic() {
        let settings = PayrollSettings::default();
        let line = calculate(
            &employee("21670.00"),
            "2",
            &policy("17712"),
            &settings,
            &YtdFigures::default(),
        )
        .unwrap();

        // 21670 / 21.67 = 1000 per day
        assert_eq!(item(&line.earnings, BASIC_CODE).amount, dec("19670.00"));
        assert_eq!(line.basic_salary, dec("21670.00"));
        assert_eq!(line.unpaid_leave_days, dec("2"));
    }

    #[test]
    fn test_unpaid_leave_never_below_zero() {
        let line = calculate(
            &employee("5000.00"),
            "30",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();
        assert_eq!(line.gross_earnings, dec("0.00"));
        assert_eq!(line.net_pay, dec("0.00"));
    }

    #[test]
    fn test_negative_unpaid_leave_rejected() {
        let result = calculate(
            &employee("5000.00"),
            "-1",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
    }

    #[test]
    fn test_deductions_exceeding_gross_give_negative_net() {
        let mut snapshot = employee("3000.00");
        snapshot.elements = vec![
            ElementAssignment {
                amount: Some(dec("5000.00")),
                ..ElementAssignment::new("LOAN")
            },
        ];
        let line = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        )
        .unwrap();
        assert!(line.total_deductions > line.gross_earnings);
        assert!(line.net_pay < Decimal::ZERO);
    }

    #[test]
    fn test_ytd_adds_to_prior() {
        let prior = YtdFigures {
            gross: dec("70000.00"),
            taxable: dec("70000.00"),
            paye: dec("12578.66"),
            uif: dec("354.24"),
            sdl: dec("700.00"),
            net: dec("57067.10"),
        };
        let line = calculate(
            &employee("35000.00"),
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &prior,
        )
        .unwrap();

        assert_eq!(line.ytd.gross, dec("105000.00"));
        assert_eq!(line.ytd.paye, dec("18867.99"));
        assert_eq!(line.ytd.uif, dec("531.36"));
        assert_eq!(line.ytd.sdl, dec("1050.00"));
        assert_eq!(line.ytd.net, dec("85600.65"));
    }

    #[test]
    fn test_unknown_element_fails() {
        let mut snapshot = employee("35000.00");
        snapshot.elements = vec![ElementAssignment::new("BONUS")];
        let result = calculate(
            &snapshot,
            "0",
            &policy("17712"),
            &PayrollSettings::default(),
            &YtdFigures::default(),
        );
        assert!(matches!(result, Err(EngineError::PayElementNotFound { .. })));
    }
}
