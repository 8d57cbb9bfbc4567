use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    error::{AppError, Result},
    service::{ReconciliationOutcome, WebhookOutcome},
};

#[derive(Debug, Serialize)]
pub struct InitializePaymentResponse {
    pub authorization_url: String,
    pub reference: String,
}

pub async fn initialize(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(booking_id): Path<i64>,
) -> Result<Json<InitializePaymentResponse>> {
    let session = state
        .service_context
        .payment_service
        .initialize_payment(booking_id, &current_user.as_payer())
        .await?;

    Ok(Json(InitializePaymentResponse {
        authorization_url: session.authorization_url,
        reference: session.reference,
    }))
}

/// Paystack appends `reference`, Flutterwave appends `tx_ref`.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub reference: Option<String>,
    pub tx_ref: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let reference = query.reference.or(query.tx_ref);
    let payment = &state.settings.payment;

    match state
        .service_context
        .payment_service
        .handle_callback(reference.as_deref())
        .await
    {
        Ok(outcome) => match outcome.booking_id() {
            Some(booking_id) => {
                Redirect::to(&format!("{}?booking={}", payment.success_url, booking_id))
            }
            None => {
                if let ReconciliationOutcome::Failed { reason } = &outcome {
                    tracing::info!("Payment callback failed: {}", reason);
                }
                Redirect::to(&payment.failure_url)
            }
        },
        Err(e) => {
            tracing::error!("Payment callback error: {}", e);
            Redirect::to(&payment.failure_url)
        }
    }
}

pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let service = &state.service_context.payment_service;

    // Only the active gateway's endpoint is live.
    if !provider.eq_ignore_ascii_case(service.gateway().provider_name()) {
        return Err(AppError::NotFound(format!("No webhook endpoint for {}", provider)));
    }

    let response = match service.handle_webhook(&headers, &body).await? {
        WebhookOutcome::Rejected => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid webhook" })),
        ),
        WebhookOutcome::Ignored | WebhookOutcome::Processed(_) => {
            (StatusCode::OK, Json(json!({ "status": "success" })))
        }
    };

    Ok(response.into_response())
}

#[derive(Debug, Serialize)]
pub struct ProviderConfigResponse {
    pub provider: &'static str,
    pub public_key: String,
}

pub async fn provider_config(State(state): State<AppState>) -> Json<ProviderConfigResponse> {
    let gateway = &state.service_context.gateway;
    Json(ProviderConfigResponse {
        provider: gateway.provider_name(),
        public_key: gateway.public_key().to_string(),
    })
}
