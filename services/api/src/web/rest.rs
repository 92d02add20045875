//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::protocol::{
    AdvanceRequest, AdvanceResponse, Answer, ContainerBody, ElementBody, ErrorsBody, IntentKind,
    PageResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use form_submission_core::{EngineError, FormId, ReferenceError};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        page_handler,
        advance_handler,
    ),
    components(
        schemas(
            AdvanceRequest,
            AdvanceResponse,
            Answer,
            ContainerBody,
            ElementBody,
            ErrorsBody,
            IntentKind,
            PageResponse
        )
    ),
    tags(
        (name = "Form Submission API", description = "Multi-page form submission endpoints.")
    )
)]
pub struct ApiDoc;

/// Builds the API routes over the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/forms/{form_id}/page", get(page_handler))
        .route("/forms/{form_id}/advance", post(advance_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

//=========================================================================================
// Query Parameters
//=========================================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// The submission to resume. Omit it to render the first page.
    submission_id: Option<Uuid>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Render the current page of a form.
///
/// Returns the container to show with the answers and errors stored for it.
/// A completed submission is returned read-only.
#[utoipa::path(
    get,
    path = "/forms/{form_id}/page",
    params(
        ("form_id" = i64, Path, description = "The form to render."),
        PageQuery
    ),
    responses(
        (status = 200, description = "The page to render", body = PageResponse),
        (status = 404, description = "Unknown form or submission"),
        (status = 409, description = "The submission belongs to another form"),
        (status = 410, description = "The submission was abandoned"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn page_handler(
    State(app_state): State<Arc<AppState>>,
    Path(form_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let view = app_state
        .engine
        .current_page(FormId(form_id), query.submission_id)
        .await
        .map_err(engine_error_response)?;

    Ok(Json(PageResponse::from_view(&view, Utc::now())))
}

/// Advance a submission by one page.
///
/// Validates the posted page, runs the form's spam protection and moves the
/// submission forward, back, or to completion. Validation problems and
/// spam vetoes come back as a `rejected` outcome, not as an HTTP error.
#[utoipa::path(
    post,
    path = "/forms/{form_id}/advance",
    request_body = AdvanceRequest,
    params(
        ("form_id" = i64, Path, description = "The form being filled in.")
    ),
    responses(
        (status = 200, description = "The outcome of the transition", body = AdvanceResponse),
        (status = 403, description = "The form is not accepting new submissions"),
        (status = 404, description = "Unknown form or submission"),
        (status = 409, description = "The submission belongs to another form"),
        (status = 410, description = "The submission was abandoned"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn advance_handler(
    State(app_state): State<Arc<AppState>>,
    Path(form_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<AdvanceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let remote_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    let (submission_id, intent, input) = request.into_input(remote_ip);
    let outcome = app_state
        .engine
        .advance(FormId(form_id), submission_id, intent, input)
        .await
        .map_err(engine_error_response)?;

    Ok(Json(AdvanceResponse::from(&outcome)))
}

/// Maps request-level engine failures onto HTTP status codes.
/// Infrastructure faults are logged and answered with a generic body.
fn engine_error_response(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::FormNotFound(_) | EngineError::EmptyForm(_) => StatusCode::NOT_FOUND,
        EngineError::FormClosed(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidReference(reference) => match reference {
            ReferenceError::UnknownSubmission(_) => StatusCode::NOT_FOUND,
            ReferenceError::FormMismatch { .. } | ReferenceError::DanglingContainer { .. } => {
                StatusCode::CONFLICT
            }
            ReferenceError::Abandoned(_) => StatusCode::GONE,
        },
        EngineError::Port(port) => {
            error!("Submission request failed: {:?}", port);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process the submission".to_string(),
            );
        }
    };
    (status, e.to_string())
}
