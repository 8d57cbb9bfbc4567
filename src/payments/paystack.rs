use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;

use crate::{
    config::PaystackConfig,
    error::Result,
    payments::{
        provider::{endpoint, from_subunit, header_str, http_client, to_subunit, GatewayFailure, PaymentProvider},
        types::{
            metadata_from_value, ChargeEvent, Metadata, PaymentRequest, PaymentResponse,
            PaymentVerificationResponse, RefundRequest, RefundResponse, WebhookVerdict,
        },
    },
};

const NAME: &str = "paystack";
const SIGNATURE_HEADER: &str = "x-paystack-signature";
const CHARGE_SUCCESS: &str = "charge.success";

/// Paystack takes and reports amounts in kobo and signs webhooks with
/// HMAC-SHA512 over the raw body, keyed by the secret key.
pub struct PaystackProvider {
    client: Client,
    secret_key: String,
    public_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    callback_url: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: Option<String>,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    amount: i64,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    transaction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merchant_note: Option<&'a str>,
}

#[derive(Deserialize)]
struct RefundData {
    id: Option<Value>,
}

#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: Value,
}

impl PaystackProvider {
    pub fn new(config: &PaystackConfig, timeout: Duration) -> Result<Self> {
        if config.secret_key.is_empty() {
            tracing::warn!("Paystack secret key is not set; every webhook will be rejected");
        }

        Ok(Self {
            client: http_client(timeout)?,
            secret_key: config.secret_key.clone(),
            public_key: config.public_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: std::result::Result<RequestBuilder, GatewayFailure>,
        fallback: &str,
    ) -> std::result::Result<T, GatewayFailure> {
        let response = request?
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayFailure::Transport(e.to_string()))?;

        let http_ok = response.status().is_success();
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayFailure::Transport(e.to_string()))?;

        match envelope {
            Envelope { status: true, data: Some(data), .. } if http_ok => Ok(data),
            Envelope { message, .. } => Err(GatewayFailure::Rejected(
                message.unwrap_or_else(|| fallback.to_string()),
            )),
        }
    }

    /// An empty secret never authenticates; anyone could sign with it.
    fn signature_matches(&self, signature: &str, body: &[u8]) -> bool {
        if self.secret_key.is_empty() {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(self.secret_key.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&provided).is_ok()
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initialize_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        tracing::info!(reference = request.reference(), "[{}] Initializing payment", NAME);

        let Some(amount) = to_subunit(request.amount()) else {
            tracing::error!(reference = request.reference(), "[{}] Amount out of range", NAME);
            return PaymentResponse::failed("Payment amount is out of range");
        };

        let body = InitializeBody {
            email: request.email(),
            amount,
            reference: request.reference(),
            callback_url: request.callback_url(),
            metadata: request.metadata(),
        };
        let call = endpoint(&self.base_url, &["transaction", "initialize"])
            .map(|url| self.client.post(url).json(&body));

        match self.call::<InitializeData>(call, "Failed to initialize payment").await {
            Ok(data) => {
                let reference = data
                    .reference
                    .unwrap_or_else(|| request.reference().to_string());
                tracing::info!(
                    reference = %reference,
                    authorization_url = %data.authorization_url,
                    "[{}] Payment initialized successfully",
                    NAME
                );
                PaymentResponse::succeeded(data.authorization_url, reference)
            }
            Err(GatewayFailure::Rejected(message)) => {
                tracing::error!(
                    reference = request.reference(),
                    error = %message,
                    "[{}] Payment initialization failed",
                    NAME
                );
                PaymentResponse::failed(message)
            }
            Err(GatewayFailure::Transport(error)) => {
                tracing::error!(
                    reference = request.reference(),
                    error = %error,
                    "[{}] Payment initialization exception",
                    NAME
                );
                PaymentResponse::failed("An error occurred while initializing payment")
            }
        }
    }

    async fn verify_payment(&self, reference: &str) -> PaymentVerificationResponse {
        tracing::info!(reference, "[{}] Verifying payment", NAME);

        let call = endpoint(&self.base_url, &["transaction", "verify", reference])
            .map(|url| self.client.get(url));

        match self.call::<VerifyData>(call, "Payment verification failed").await {
            Ok(data) => {
                tracing::info!(reference, status = %data.status, "[{}] Payment verified", NAME);
                PaymentVerificationResponse {
                    success: true,
                    status: data.status,
                    amount: from_subunit(data.amount),
                    reference: data.reference,
                    metadata: metadata_from_value(data.metadata),
                    message: Some("Payment verified successfully".to_string()),
                }
            }
            Err(GatewayFailure::Rejected(message)) => {
                tracing::error!(reference, error = %message, "[{}] Payment verification failed", NAME);
                PaymentVerificationResponse::failed(reference, message)
            }
            Err(GatewayFailure::Transport(error)) => {
                tracing::error!(reference, error = %error, "[{}] Payment verification exception", NAME);
                PaymentVerificationResponse::errored(
                    reference,
                    "An error occurred while verifying payment",
                )
            }
        }
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> WebhookVerdict {
        let authentic = header_str(headers, SIGNATURE_HEADER)
            .map(|signature| self.signature_matches(signature, body))
            .unwrap_or(false);

        if !authentic {
            tracing::error!("[{}] Invalid webhook signature", NAME);
            return WebhookVerdict::Rejected;
        }

        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "[{}] Unreadable webhook payload", NAME);
                return WebhookVerdict::Ignored { event: String::new() };
            }
        };
        tracing::info!(event = %payload.event, "[{}] Webhook received", NAME);

        let status = payload.data.get("status").and_then(Value::as_str);
        if payload.event != CHARGE_SUCCESS || !matches!(status, Some("success" | "successful")) {
            return WebhookVerdict::Ignored { event: payload.event };
        }

        let amount = payload
            .data
            .get("amount")
            .and_then(Value::as_i64)
            .map(from_subunit);

        WebhookVerdict::SuccessfulCharge(ChargeEvent::from_data(&payload.event, &payload.data, amount))
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        tracing::info!(transaction_id = %request.transaction_id, "[{}] Processing refund", NAME);

        let amount = match request.amount {
            Some(amount) => match to_subunit(amount) {
                Some(kobo) => Some(kobo),
                None => return RefundResponse::failed("Refund amount is out of range"),
            },
            None => None,
        };

        let body = RefundBody {
            transaction: &request.transaction_id,
            amount,
            merchant_note: request.reason.as_deref(),
        };
        let call = endpoint(&self.base_url, &["refund"])
            .map(|url| self.client.post(url).json(&body));

        match self.call::<RefundData>(call, "Refund processing failed").await {
            Ok(data) => {
                let refund_id = data.id.map(refund_id_string).unwrap_or_default();
                tracing::info!(
                    transaction_id = %request.transaction_id,
                    refund_id = %refund_id,
                    "[{}] Refund processed successfully",
                    NAME
                );
                RefundResponse::succeeded(refund_id)
            }
            Err(GatewayFailure::Rejected(message)) => {
                tracing::error!(
                    transaction_id = %request.transaction_id,
                    error = %message,
                    "[{}] Refund failed",
                    NAME
                );
                RefundResponse::failed(message)
            }
            Err(GatewayFailure::Transport(error)) => {
                tracing::error!(
                    transaction_id = %request.transaction_id,
                    error = %error,
                    "[{}] Refund exception",
                    NAME
                );
                RefundResponse::failed("An error occurred while processing refund")
            }
        }
    }

    fn public_key(&self) -> Option<&str> {
        Some(self.public_key.as_str()).filter(|k| !k.is_empty())
    }
}

pub(crate) fn refund_id_string(id: Value) -> String {
    match id {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
