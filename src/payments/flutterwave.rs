use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{
    config::FlutterwaveConfig,
    error::Result,
    payments::{
        paystack::refund_id_string,
        provider::{constant_time_eq, endpoint, header_str, http_client, GatewayFailure, PaymentProvider},
        types::{
            decimal_from_value, metadata_from_value, ChargeEvent, Metadata, PaymentRequest,
            PaymentResponse, PaymentVerificationResponse, RefundRequest, RefundResponse,
            WebhookVerdict, SUCCESS_STATUS,
        },
    },
};

const NAME: &str = "flutterwave";
const SIGNATURE_HEADER: &str = "verif-hash";
const CHARGE_COMPLETED: &str = "charge.completed";
/// How Flutterwave spells a settled transaction.
const SETTLED: &str = "successful";

/// Flutterwave takes and reports amounts in the main currency unit and
/// authenticates webhooks by echoing a shared secret hash in `verif-hash`.
pub struct FlutterwaveProvider {
    client: Client,
    secret_key: String,
    public_key: String,
    webhook_hash: String,
    base_url: String,
    currency: String,
    title: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: String,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
struct Customer<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Customizations<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    tx_ref: &'a str,
    #[serde(serialize_with = "serialize_amount")]
    amount: Decimal,
    currency: &'a str,
    redirect_url: &'a str,
    customer: Customer<'a>,
    customizations: Customizations<'a>,
    meta: &'a Metadata,
}

#[derive(Deserialize)]
struct InitializeData {
    link: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    tx_ref: String,
    amount: Value,
    #[serde(default)]
    meta: Option<Value>,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    id: &'a str,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_amount"
    )]
    amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comments: Option<&'a str>,
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

/// Whole amounts go out as JSON integers, fractional ones as the shortest
/// float that reads back as the same decimal.
fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if amount.fract().is_zero() {
        if let Some(whole) = amount.to_i64() {
            return serializer.serialize_i64(whole);
        }
    }
    rust_decimal::serde::float::serialize(amount, serializer)
}

fn serialize_optional_amount<S: Serializer>(
    amount: &Option<Decimal>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match amount {
        Some(amount) => serialize_amount(amount, serializer),
        None => serializer.serialize_none(),
    }
}

/// Maps Flutterwave's settled status onto the canonical success sentinel.
fn canonical_status(status: String) -> String {
    if status == SETTLED {
        SUCCESS_STATUS.to_string()
    } else {
        status
    }
}

impl FlutterwaveProvider {
    pub fn new(config: &FlutterwaveConfig, currency: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            secret_key: config.secret_key.clone(),
            public_key: config.public_key.clone(),
            webhook_hash: config.webhook_hash().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            currency: currency.to_string(),
            title: config.title.clone(),
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
            Envelope { status, data: Some(data), .. } if http_ok && status == "success" => Ok(data),
            Envelope { message, .. } => Err(GatewayFailure::Rejected(
                message.unwrap_or_else(|| fallback.to_string()),
            )),
        }
    }
}

#[async_trait]
impl PaymentProvider for FlutterwaveProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initialize_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        tracing::info!(reference = request.reference(), "[{}] Initializing payment", NAME);

        let body = InitializeBody {
            tx_ref: request.reference(),
            amount: request.amount(),
            currency: &self.currency,
            redirect_url: request.callback_url(),
            customer: Customer { email: request.email() },
            customizations: Customizations { title: &self.title },
            meta: request.metadata(),
        };
        let call = endpoint(&self.base_url, &["payments"])
            .map(|url| self.client.post(url).json(&body));

        match self.call::<InitializeData>(call, "Failed to initialize payment").await {
            Ok(data) => {
                tracing::info!(
                    reference = request.reference(),
                    payment_link = %data.link,
                    "[{}] Payment initialized successfully",
                    NAME
                );
                // Flutterwave does not issue its own reference; tx_ref is ours.
                PaymentResponse::succeeded(data.link, request.reference())
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

        let call = endpoint(&self.base_url, &["transactions", "verify_by_reference"])
            .map(|url| self.client.get(url).query(&[("tx_ref", reference)]));

        match self.call::<VerifyData>(call, "Payment verification failed").await {
            Ok(data) => {
                let Some(amount) = decimal_from_value(&data.amount) else {
                    tracing::error!(reference, amount = %data.amount, "[{}] Unreadable amount", NAME);
                    return PaymentVerificationResponse::errored(
                        reference,
                        "An error occurred while verifying payment",
                    );
                };
                tracing::info!(reference, status = %data.status, "[{}] Payment verified", NAME);
                PaymentVerificationResponse {
                    success: true,
                    status: canonical_status(data.status),
                    amount,
                    reference: data.tx_ref,
                    metadata: metadata_from_value(data.meta),
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
        let authentic = match header_str(headers, SIGNATURE_HEADER) {
            Some(signature) if !self.webhook_hash.is_empty() => {
                constant_time_eq(signature.as_bytes(), self.webhook_hash.as_bytes())
            }
            _ => false,
        };

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
        if payload.event != CHARGE_COMPLETED || status != Some(SETTLED) {
            return WebhookVerdict::Ignored { event: payload.event };
        }

        let amount = payload.data.get("amount").and_then(decimal_from_value);

        WebhookVerdict::SuccessfulCharge(ChargeEvent::from_data(&payload.event, &payload.data, amount))
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        tracing::info!(transaction_id = %request.transaction_id, "[{}] Processing refund", NAME);

        let body = RefundBody {
            id: &request.transaction_id,
            amount: request.amount,
            comments: request.reason.as_deref(),
        };
        let call = endpoint(
            &self.base_url,
            &["transactions", request.transaction_id.as_str(), "refund"],
        )
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
