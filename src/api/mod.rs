//! HTTP API module for the payroll run engine.
//!
//! This module exposes the pay run lifecycle, line operations and the pay
//! element registry as JSON endpoints.

mod handlers;
mod request;
mod response;
mod state;

pub use handlers::create_router;
pub use request::{ActorRequest, CreateRunRequest, ReasonRequest, ResolveExceptionRequest};
pub use response::{ApiError, ApiErrorResponse, LineUpdateResponse};
pub use state::AppState;
