//! Application state for the payroll run API.

use std::sync::Arc;

use crate::payrun::PayRunProcessor;

/// Shared application state.
///
/// Holds the pay run processor every handler drives.
#[derive(Clone)]
pub struct AppState {
    processor: Arc<PayRunProcessor>,
}

impl AppState {
    /// Creates a new application state around a processor.
    pub fn new(processor: PayRunProcessor) -> Self {
        Self::from_shared(Arc::new(processor))
    }

    /// Creates application state around a processor the caller also holds.
    pub fn from_shared(processor: Arc<PayRunProcessor>) -> Self {
        Self { processor }
    }

    /// Returns the processor.
    pub fn processor(&self) -> &PayRunProcessor {
        &self.processor
    }
}
