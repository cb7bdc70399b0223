//! HTTP request handlers for the payroll run API.
//!
//! This module contains the handler functions for all API endpoints.

use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{PayElement, PayElementDefinition, PayRun, PayRunLine};
use crate::payrun::{LineUpdate, PayRunProcessor};

use super::request::{ActorRequest, CreateRunRequest, ReasonRequest, ResolveExceptionRequest};
use super::response::{ApiError, ApiErrorResponse, LineUpdateResponse};
use super::state::AppState;

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/tenants/:tenant_id/runs",
            post(create_run_handler).get(list_runs_handler),
        )
        .route(
            "/tenants/:tenant_id/elements",
            post(register_element_handler).get(list_elements_handler),
        )
        .route(
            "/tenants/:tenant_id/elements/:code",
            delete(deactivate_element_handler),
        )
        .route("/runs/:run_id", get(get_run_handler))
        .route("/runs/:run_id/lines", get(list_lines_handler))
        .route("/runs/:run_id/lock-inputs", post(lock_inputs_handler))
        .route("/runs/:run_id/unlock-inputs", post(unlock_inputs_handler))
        .route("/runs/:run_id/calculate", post(calculate_handler))
        .route("/runs/:run_id/submit-for-review", post(submit_for_review_handler))
        .route(
            "/runs/:run_id/submit-for-approval",
            post(submit_for_approval_handler),
        )
        .route("/runs/:run_id/approve", post(approve_handler))
        .route("/runs/:run_id/finalise", post(finalise_handler))
        .route("/runs/:run_id/close", post(close_handler))
        .route("/runs/:run_id/reopen", post(reopen_handler))
        .route(
            "/runs/:run_id/lines/:line_id/exclude",
            post(exclude_line_handler),
        )
        .route(
            "/runs/:run_id/lines/:line_id/include",
            post(include_line_handler),
        )
        .route(
            "/runs/:run_id/lines/:line_id/exceptions/:exception_id/resolve",
            post(resolve_exception_handler),
        )
        .with_state(state)
}

/// Handler for POST /tenants/:tenant_id/runs.
async fn create_run_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    payload: Result<Json<CreateRunRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, tenant_id = %tenant_id, "Create pay run request received");

    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = request.tax_year().and_then(|tax_year| {
        state.processor().create_run(
            &tenant_id,
            request.frequency,
            request.period_number,
            tax_year,
            &request.actor,
        )
    });
    respond(correlation_id, StatusCode::CREATED, result)
}

/// Handler for GET /tenants/:tenant_id/runs.
async fn list_runs_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    respond(
        correlation_id,
        StatusCode::OK,
        state.processor().list_runs(&tenant_id),
    )
}

/// Handler for POST /tenants/:tenant_id/elements.
///
/// The body is validated into a [`PayElement`] so a bad definition surfaces
/// as an engine error rather than a deserialization failure.
async fn register_element_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    payload: Result<Json<PayElementDefinition>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let definition = match parse_body(correlation_id, payload) {
        Ok(definition) => definition,
        Err(response) => return response,
    };

    let result = PayElement::try_from(definition).and_then(|element| {
        state
            .processor()
            .register_element(&tenant_id, element.clone())
            .map(|_| element)
    });
    respond(correlation_id, StatusCode::CREATED, result)
}

/// Handler for GET /tenants/:tenant_id/elements.
async fn list_elements_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    respond(
        correlation_id,
        StatusCode::OK,
        state.processor().elements(&tenant_id),
    )
}

/// Handler for DELETE /tenants/:tenant_id/elements/:code.
async fn deactivate_element_handler(
    State(state): State<AppState>,
    Path((tenant_id, code)): Path<(String, String)>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    match state.processor().deactivate_element(&tenant_id, &code) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(correlation_id, err),
    }
}

/// Handler for GET /runs/:run_id.
async fn get_run_handler(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    respond(correlation_id, StatusCode::OK, state.processor().get_run(run_id))
}

/// Handler for GET /runs/:run_id/lines. Bank details are masked.
async fn list_lines_handler(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    let result = state.processor().lines(run_id).map(|lines| {
        lines
            .iter()
            .map(PayRunLine::for_display)
            .collect::<Vec<_>>()
    });
    respond(correlation_id, StatusCode::OK, result)
}

async fn lock_inputs_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "lock_inputs", |p, actor| {
        p.lock_inputs(run_id, actor)
    })
}

async fn unlock_inputs_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "unlock_inputs", |p, actor| {
        p.unlock_inputs(run_id, actor)
    })
}

/// Handler for POST /runs/:run_id/calculate.
async fn calculate_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, run_id = %run_id, "Calculation request received");

    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let start_time = Instant::now();
    match state.processor().calculate(run_id, &request.actor).await {
        Ok(run) => {
            info!(
                correlation_id = %correlation_id,
                run_id = %run.id,
                employee_count = run.employee_count,
                net_pay = %run.totals.net_pay,
                duration_us = start_time.elapsed().as_micros(),
                "Calculation completed successfully"
            );
            json_response(StatusCode::OK, run)
        }
        Err(err) => error_response(correlation_id, err),
    }
}

async fn submit_for_review_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "submit_for_review", |p, actor| {
        p.submit_for_review(run_id, actor)
    })
}

async fn submit_for_approval_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "submit_for_approval", |p, actor| {
        p.submit_for_approval(run_id, actor)
    })
}

async fn approve_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "approve", |p, actor| {
        p.approve(run_id, actor)
    })
}

async fn finalise_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "finalise", |p, actor| {
        p.finalise(run_id, actor)
    })
}

async fn close_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    run_transition(&state, run_id, payload, "close", |p, actor| {
        p.close(run_id, actor)
    })
}

/// Handler for POST /runs/:run_id/reopen.
async fn reopen_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    payload: Result<Json<ReasonRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, run_id = %run_id, "Re-open request received");

    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(
        correlation_id,
        StatusCode::OK,
        state
            .processor()
            .reopen(run_id, &request.actor, &request.reason),
    )
}

async fn exclude_line_handler(
    State(state): State<AppState>,
    Path((run_id, line_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<ReasonRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let result = state
        .processor()
        .exclude_line(run_id, line_id, &request.reason, &request.actor);
    respond(correlation_id, StatusCode::OK, result.map(masked_update))
}

async fn include_line_handler(
    State(state): State<AppState>,
    Path((run_id, line_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<ActorRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let result = state
        .processor()
        .include_line(run_id, line_id, &request.actor);
    respond(correlation_id, StatusCode::OK, result.map(masked_update))
}

async fn resolve_exception_handler(
    State(state): State<AppState>,
    Path((run_id, line_id, exception_id)): Path<(Uuid, Uuid, Uuid)>,
    payload: Result<Json<ResolveExceptionRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let result = state.processor().resolve_exception(
        run_id,
        line_id,
        exception_id,
        &request.note,
        &request.actor,
    );
    respond(correlation_id, StatusCode::OK, result.map(masked_update))
}

/// Runs a state transition that needs only an actor.
fn run_transition<F>(
    state: &AppState,
    run_id: Uuid,
    payload: Result<Json<ActorRequest>, JsonRejection>,
    action: &str,
    transition: F,
) -> Response
where
    F: FnOnce(&PayRunProcessor, &str) -> EngineResult<PayRun>,
{
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, run_id = %run_id, action, "Transition request received");

    let request = match parse_body(correlation_id, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    respond(
        correlation_id,
        StatusCode::OK,
        transition(state.processor(), &request.actor),
    )
}

fn masked_update(update: LineUpdate) -> LineUpdateResponse {
    LineUpdateResponse {
        line: update.line.for_display(),
        run: update.run,
    }
}

/// Unwraps a JSON body or builds the 400 response for it.
fn parse_body<T>(
    correlation_id: Uuid,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, Response> {
    let rejection = match payload {
        Ok(Json(request)) => return Ok(request),
        Err(rejection) => rejection,
    };

    let error = match rejection {
        JsonRejection::JsonDataError(err) => {
            let body_text = err.body_text();
            warn!(
                correlation_id = %correlation_id,
                error = %body_text,
                "JSON data error"
            );
            if body_text.contains("missing field") {
                ApiError::new("VALIDATION_ERROR", body_text)
            } else {
                ApiError::malformed_json(body_text)
            }
        }
        JsonRejection::JsonSyntaxError(err) => {
            warn!(
                correlation_id = %correlation_id,
                error = %err,
                "JSON syntax error"
            );
            ApiError::malformed_json(format!("Invalid JSON syntax: {}", err))
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::new("MISSING_CONTENT_TYPE", "Content-Type must be application/json")
        }
        _ => ApiError::malformed_json("Failed to parse request body"),
    };
    Err(json_response(StatusCode::BAD_REQUEST, error))
}

fn respond<T: Serialize>(correlation_id: Uuid, status: StatusCode, result: EngineResult<T>) -> Response {
    match result {
        Ok(body) => json_response(status, body),
        Err(err) => error_response(correlation_id, err),
    }
}

fn error_response(correlation_id: Uuid, err: EngineError) -> Response {
    warn!(
        correlation_id = %correlation_id,
        error = %err,
        retryable = err.is_retryable(),
        "Request failed"
    );
    let api_error: ApiErrorResponse = err.into();
    json_response(api_error.status, api_error.error)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Json(body),
    )
        .into_response()
}
