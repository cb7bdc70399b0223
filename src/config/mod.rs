//! Configuration loading and management for the payroll run engine.
//!
//! This module loads tenant payroll settings and the statutory tax policy
//! tables (PAYE brackets, rebates, UIF and SDL) that are versioned by tax year.
//!
//! # Example
//!
//! ```no_run
//! use payrun_engine::config::ConfigLoader;
//!
//! let config = ConfigLoader::load("./config/za").unwrap();
//! println!("Pay day: {}", config.settings().pay_day);
//! ```

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    PayrollConfig, PayrollSettings, SdlPolicy, TaxBracket, TaxPolicy, TaxRebate, UifPolicy,
    WorkingDays,
};
