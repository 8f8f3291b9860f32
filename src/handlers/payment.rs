use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::PaymentError,
    handlers::AppState,
    models::{
        CancelPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse,
        PaymentStatusResponse, ProviderCallbackRequest,
    },
    services::ProviderOutcome,
};

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>, PaymentError> {
    let transaction = state.payments.initiate(request).await?;

    Ok(Json(InitiatePaymentResponse {
        success: true,
        payment_id: transaction.id,
        public_id: Some(transaction.public_id),
    }))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, PaymentError> {
    Ok(Json(state.payments.status(&payment_id).await?))
}

/// A terminal transaction is answered with `success: false` and a message,
/// not an error status, so the client can show it as-is.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<CancelPaymentResponse>, PaymentError> {
    match state.payments.cancel(&payment_id).await {
        Ok(transaction) => Ok(Json(CancelPaymentResponse {
            success: true,
            message: transaction
                .failure_reason
                .unwrap_or_else(|| "Pagamento cancelado.".to_string()),
        })),
        Err(PaymentError::NotPending { status }) => Ok(Json(CancelPaymentResponse {
            success: false,
            message: format!("Transação não está pendente (estado: {}).", status),
        })),
        Err(e) => Err(e),
    }
}

pub async fn provider_callback(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Json(request): Json<ProviderCallbackRequest>,
) -> Result<Json<CancelPaymentResponse>, PaymentError> {
    let outcome: ProviderOutcome = request.status.parse()?;

    match state
        .payments
        .resolve(&payment_id, outcome, request.reason)
        .await
    {
        Ok(transaction) => Ok(Json(CancelPaymentResponse {
            success: true,
            message: format!("Transação {} atualizada.", transaction.status),
        })),
        Err(PaymentError::NotPending { status }) => Ok(Json(CancelPaymentResponse {
            success: false,
            message: format!("Transação não está pendente (estado: {}).", status),
        })),
        Err(e) => Err(e),
    }
}
