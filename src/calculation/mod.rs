//! Calculation logic for the payroll run engine.
//!
//! This module contains the pure calculation steps a pay run is built from:
//! pay period derivation, pay element resolution (including formula
//! evaluation), PAYE, the gross-to-net calculation of one employee line,
//! and exception detection over calculated lines. Nothing here touches
//! persistence or run state.

mod elements;
mod exceptions;
mod formula;
mod gross_to_net;
mod pay_period;
mod paye;
mod rounding;

pub use elements::PayElementRegistry;
pub use exceptions::{
    ExceptionContext, ExceptionDetector, ExceptionRule, LargeVarianceRule, MissingBankDetailsRule,
    MissingIdNumberRule, MissingTaxNumberRule, NegativeNetPayRule, NewEmployeeRule,
    SalaryChangeRule, TerminatedRule, ZeroNetPayRule,
};
pub use formula::{FORMULA_VARIABLES, Formula, FormulaContext};
pub use gross_to_net::{
    BASIC_CODE, GrossToNetInput, PAYE_CODE, SDL_CODE, UIF_CODE, UIF_EMPLOYER_CODE, calculate_line,
};
pub use pay_period::calculate_pay_period;
pub use paye::{PayeResult, calculate_paye};
pub use rounding::round_cents;
