//! Pay run orchestration.
//!
//! This module drives a pay run from draft to closed: the
//! [`PayRunProcessor`] state machine, the [`PayRunStore`] persistence port
//! with its optimistic-concurrency commit, and the collaborator ports for
//! employee data, leave and output generation.

mod collaborators;
mod processor;
mod store;

pub use collaborators::{
    EmployeeDirectory, InMemoryEmployeeDirectory, InMemoryLeaveService, LeaveService,
    OutputGenerator, RecordingOutputGenerator,
};
pub use crate::models::OutputKind;
pub use processor::{LineUpdate, PayRunProcessor};
pub use store::{InMemoryPayRunStore, InputsChange, PayRunStore, RunCommit, RunInputs};
