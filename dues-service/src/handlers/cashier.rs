//! Cashier endpoints: look up a reference and confirm a cash payment.

use axum::{extract::State, Json};
use validator::Validate;

use crate::{
    dtos::{
        CashierSearchRequest, CashierSearchResponse, ConfirmPaymentRequest,
        ConfirmPaymentResponse, PAYMENT_RECORDED_MESSAGE,
    },
    error::DuesError,
    startup::AppState,
};

pub async fn search_reference(
    State(state): State<AppState>,
    Json(request): Json<CashierSearchRequest>,
) -> Result<Json<CashierSearchResponse>, DuesError> {
    request.validate()?;

    let details = state.engine.lookup_reference(&request.reference_code).await?;

    Ok(Json(details.into()))
}

#[tracing::instrument(skip(state, request), fields(reference_code = %request.reference_code, cashier_id = %request.cashier_id))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, DuesError> {
    request.validate()?;

    let payment = state
        .engine
        .redeem_reference(&request.reference_code, &request.cashier_id)
        .await?;

    Ok(Json(ConfirmPaymentResponse {
        message: PAYMENT_RECORDED_MESSAGE.to_string(),
        payment_id: payment.payment_id,
        amount: payment.amount,
        charges_settled: payment.charge_ids.len(),
    }))
}
