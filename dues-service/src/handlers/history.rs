use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    dtos::HistoryResponse,
    error::DuesError,
    startup::AppState,
};

pub async fn get_payment_history(
    State(state): State<AppState>,
    Path(resident_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, DuesError> {
    let entries = state.engine.get_payment_history(resident_id).await?;

    Ok(Json(HistoryResponse {
        resident_id,
        items: entries.into_iter().map(Into::into).collect(),
    }))
}
