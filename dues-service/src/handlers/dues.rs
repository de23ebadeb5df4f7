//! Resident-facing endpoints: outstanding debt and payment references.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CancelReferenceResponse, DebtResponse, IssueReferenceRequest, IssueReferenceResponse},
    error::DuesError,
    startup::AppState,
};

pub async fn get_outstanding_debt(
    State(state): State<AppState>,
    Path(resident_id): Path<Uuid>,
) -> Result<Json<DebtResponse>, DuesError> {
    let summary = state.engine.get_outstanding_debt(resident_id).await?;

    Ok(Json(summary.into()))
}

#[tracing::instrument(skip(state, request), fields(resident_id = %resident_id))]
pub async fn issue_reference(
    State(state): State<AppState>,
    Path(resident_id): Path<Uuid>,
    Json(request): Json<IssueReferenceRequest>,
) -> Result<(StatusCode, Json<IssueReferenceResponse>), DuesError> {
    request.validate()?;

    let reference = state
        .engine
        .issue_reference(resident_id, request.charge_ids)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueReferenceResponse {
            message: "Payment reference issued".to_string(),
            reference_code: reference.code,
            amount: reference.amount,
            expires_utc: reference.expires_utc,
        }),
    ))
}

pub async fn cancel_reference(
    State(state): State<AppState>,
    Path((resident_id, code)): Path<(Uuid, String)>,
) -> Result<Json<CancelReferenceResponse>, DuesError> {
    tracing::info!(resident_id = %resident_id, reference_code = %code, "Cancelling reference");

    let reference = state.engine.cancel_reference(resident_id, &code).await?;

    Ok(Json(CancelReferenceResponse {
        message: "Payment reference cancelled".to_string(),
        reference_code: reference.code,
        status: reference.status,
    }))
}
