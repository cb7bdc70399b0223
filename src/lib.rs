//! Payroll Run Engine
//!
//! This crate takes a tenant's roster through one pay period: it derives the
//! period dates, resolves pay elements, calculates gross-to-net pay with
//! PAYE, UIF and SDL from versioned tax tables, flags exceptions on each
//! line, and moves the pay run through its approval lifecycle from draft to
//! closed.

#![warn(missing_docs)]

pub mod api;
pub mod calculation;
pub mod config;
pub mod error;
pub mod models;
pub mod payrun;
