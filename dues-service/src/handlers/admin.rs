//! Administrator endpoints: residents, dues generation and expiry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ExpireReferencesResponse, GenerateDuesRequest, GenerateDuesResponse,
        RegisterResidentRequest, RegisterResidentResponse, DUES_GENERATED_MESSAGE,
    },
    error::DuesError,
    models::{BillingPeriod, Resident},
    startup::AppState,
};

#[tracing::instrument(skip(state, request))]
pub async fn register_resident(
    State(state): State<AppState>,
    Json(request): Json<RegisterResidentRequest>,
) -> Result<(StatusCode, Json<RegisterResidentResponse>), DuesError> {
    request.validate()?;

    let resident = state.engine.register_resident(request.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResidentResponse {
            message: "Resident registered".to_string(),
            resident_id: resident.resident_id,
            key_number: resident.key_number,
        }),
    ))
}

pub async fn get_resident(
    State(state): State<AppState>,
    Path(resident_id): Path<Uuid>,
) -> Result<Json<Resident>, DuesError> {
    Ok(Json(state.engine.get_resident(resident_id).await?))
}

pub async fn deactivate_resident(
    State(state): State<AppState>,
    Path(resident_id): Path<Uuid>,
) -> Result<Json<Resident>, DuesError> {
    tracing::info!(resident_id = %resident_id, "Deactivating resident");

    Ok(Json(state.engine.deactivate_resident(resident_id).await?))
}

#[tracing::instrument(skip(state, request), fields(amount = %request.amount))]
pub async fn generate_monthly_dues(
    State(state): State<AppState>,
    Json(request): Json<GenerateDuesRequest>,
) -> Result<Json<GenerateDuesResponse>, DuesError> {
    request.validate()?;

    let period = match request.period.as_deref() {
        Some(raw) => raw.parse::<BillingPeriod>()?,
        None => BillingPeriod::containing(state.engine.now()),
    };

    let report = state
        .engine
        .generate_monthly_dues(request.amount, &request.description, period)
        .await?;

    Ok(Json(GenerateDuesResponse {
        message: DUES_GENERATED_MESSAGE.to_string(),
        period: report.period,
        total_cuotas_creadas: report.created,
        skipped: report.skipped,
        failures: report.failures,
    }))
}

pub async fn expire_references(
    State(state): State<AppState>,
) -> Result<Json<ExpireReferencesResponse>, DuesError> {
    let expired = state.engine.expire_stale_references().await?;

    Ok(Json(ExpireReferencesResponse {
        expired: expired.len(),
        reference_codes: expired.into_iter().map(|r| r.code).collect(),
    }))
}
