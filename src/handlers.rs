use crate::errors::AppError;
use crate::lead_sync::LeadSyncService;
use crate::models::*;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lead sagas over the configured store and mailing list.
    pub leads: LeadSyncService,
}

/// Health check endpoint.
///
/// Returns the service status, name and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

fn payload(body: Result<Json<LeadPayload>, JsonRejection>) -> Result<LeadPayload, AppError> {
    body.map(|Json(payload)| payload)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn lead_response(message: &str, lead: Lead) -> Json<LeadResponse> {
    Json(LeadResponse {
        message: message.to_string(),
        lead,
    })
}

/// GET /
///
/// One page of leads in creation order. `page` defaults to 1 and `limit` to 10.
pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<LeadIndex>, AppError> {
    let request = PageRequest::from(params);
    tracing::debug!("GET / - page {} limit {}", request.page, request.limit);

    let page = state.leads.list_leads(request).await?;
    Ok(Json(LeadIndex::new(request, page)))
}

/// POST /leads
///
/// Validates the body, stores the lead and subscribes it to the mailing list.
///
/// # Returns
///
/// * `201` with the created lead, `422` when a field is invalid or the email
///   is taken, `500` when the sync failed and was rolled back.
pub async fn store_lead(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LeadPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<LeadResponse>), AppError> {
    let draft = payload(body)?.validate()?;
    tracing::info!("POST /leads - {}", draft.email());

    let lead = state.leads.create_lead(draft).await?;
    Ok((
        StatusCode::CREATED,
        lead_response("Lead added successfully", lead),
    ))
}

/// PUT /leads/:id
///
/// Replaces every field of the lead and moves its mailing-list membership to
/// the new address.
pub async fn update_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Result<Json<LeadPayload>, JsonRejection>,
) -> Result<Json<LeadResponse>, AppError> {
    let draft = payload(body)?.validate()?;
    tracing::info!("PUT /leads/{}", id);

    let lead = state.leads.update_lead(id, draft).await?;
    Ok(lead_response("Lead updated successfully", lead))
}

/// DELETE /leads/:id
pub async fn destroy_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LeadResponse>, AppError> {
    tracing::info!("DELETE /leads/{}", id);

    let lead = state.leads.delete_lead(id).await?;
    Ok(lead_response("Lead deleted successfully", lead))
}

/// Read-only routes.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(index))
}

/// Routes that change leads and reach out to the mailing-list provider.
pub fn lead_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/leads", post(store_lead))
        .route("/leads/:id", put(update_lead).delete(destroy_lead))
}

/// Every route, without rate limiting or transport layers.
pub fn router(state: Arc<AppState>) -> Router {
    public_routes().merge(lead_routes()).with_state(state)
}
