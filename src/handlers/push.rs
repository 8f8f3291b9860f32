use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::PaymentError,
    handlers::AppState,
    models::{
        DevicesResponse, SubscribeRequest, SubscribeResponse, UnsubscribeRequest,
        UnsubscribeResponse,
    },
};

pub async fn subscribe_device(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, PaymentError> {
    if request.user_id.trim().is_empty() {
        return Err(PaymentError::InvalidRequest("userId is required".to_string()));
    }

    let (registration, device_count) = state
        .fanout
        .register_device(&request.user_id, request.subscription, request.device_info)
        .await?;

    Ok(Json(SubscribeResponse {
        success: true,
        device_id: registration.device_id,
        device_count,
    }))
}

pub async fn unsubscribe_device(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<UnsubscribeResponse>, PaymentError> {
    let device_count = if request.all {
        state.fanout.unregister_all(&request.user_id).await?;
        0
    } else if let Some(device_id) = request.device_id.as_deref() {
        state
            .fanout
            .unregister_device(&request.user_id, device_id)
            .await?
    } else if let Some(subscription) = request.subscription.as_ref() {
        state
            .fanout
            .unregister_endpoint(&request.user_id, &subscription.endpoint)
            .await?
    } else {
        return Err(PaymentError::InvalidRequest(
            "deviceId, subscription or all is required".to_string(),
        ));
    };

    Ok(Json(UnsubscribeResponse {
        success: true,
        device_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesQuery {
    pub user_id: String,
}

pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DevicesQuery>,
) -> Result<Json<DevicesResponse>, PaymentError> {
    let devices: Vec<_> = state
        .fanout
        .devices(&query.user_id)
        .await?
        .iter()
        .map(|d| d.public_view())
        .collect();

    Ok(Json(DevicesResponse {
        success: true,
        count: devices.len(),
        devices,
    }))
}
