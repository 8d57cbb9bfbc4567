use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::{AppError, Result};

/// Free-form key/value data that travels to the gateway and comes back on
/// verification and webhooks.
pub type Metadata = Map<String, Value>;

/// The only gateway status that means money has moved.
pub const SUCCESS_STATUS: &str = "success";
/// Gateway answered but did not report the transaction as found/settled.
pub const FAILED_STATUS: &str = "failed";
/// The gateway could not be reached or returned something unreadable.
pub const ERROR_STATUS: &str = "error";

#[derive(Debug, Clone, Validate)]
pub struct PaymentRequest {
    amount: Decimal,
    #[validate(email)]
    email: String,
    #[validate(length(min = 1, max = 100))]
    reference: String,
    #[validate(url)]
    callback_url: String,
    metadata: Metadata,
}

impl PaymentRequest {
    pub fn new(
        amount: Decimal,
        email: impl Into<String>,
        reference: impl Into<String>,
        callback_url: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "Payment amount must be greater than zero".to_string(),
            ));
        }

        let request = Self {
            amount,
            email: email.into(),
            reference: reference.into(),
            callback_url: callback_url.into(),
            metadata,
        };
        request.validate()?;

        Ok(request)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub authorization_url: Option<String>,
    pub reference: Option<String>,
    pub message: Option<String>,
}

impl PaymentResponse {
    pub fn succeeded(authorization_url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            success: true,
            authorization_url: Some(authorization_url.into()),
            reference: Some(reference.into()),
            message: Some("Payment initialized successfully".to_string()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            authorization_url: None,
            reference: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentVerificationResponse {
    pub success: bool,
    pub status: String,
    /// Always in the main currency unit.
    pub amount: Decimal,
    pub reference: String,
    pub metadata: Metadata,
    pub message: Option<String>,
}

impl PaymentVerificationResponse {
    /// The gateway answered and did not report a settled transaction.
    pub fn failed(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::unsuccessful(FAILED_STATUS, reference, message)
    }

    /// The gateway could not be asked.
    pub fn errored(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::unsuccessful(ERROR_STATUS, reference, message)
    }

    fn unsuccessful(status: &str, reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.to_string(),
            amount: Decimal::ZERO,
            reference: reference.into(),
            metadata: Metadata::new(),
            message: Some(message.into()),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.success && self.status == SUCCESS_STATUS
    }

    /// Booking id embedded in the metadata at initialization.
    pub fn booking_id(&self) -> Option<i64> {
        metadata_i64(&self.metadata, "booking_id")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub transaction_id: String,
    /// `None` refunds the full transaction.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn full(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount: None,
            reason: None,
        }
    }

    pub fn partial(transaction_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount: Some(amount),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub message: Option<String>,
}

impl RefundResponse {
    pub fn succeeded(refund_id: impl Into<String>) -> Self {
        Self {
            success: true,
            refund_id: Some(refund_id.into()),
            message: Some("Refund processed successfully".to_string()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            refund_id: None,
            message: Some(message.into()),
        }
    }
}

/// A successful-charge notification, already authenticated, reduced to what
/// reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeEvent {
    pub event: String,
    pub reference: Option<String>,
    pub booking_id: Option<i64>,
    pub amount: Option<Decimal>,
}

impl ChargeEvent {
    /// Reads the reference (`reference` or `tx_ref`) and booking id
    /// (`metadata.booking_id` or `meta.booking_id`) from a webhook `data`
    /// object.
    pub fn from_data(event: &str, data: &Value, amount: Option<Decimal>) -> Self {
        let reference = ["reference", "tx_ref"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_str))
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let booking_id = ["metadata", "meta"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_object))
            .find_map(|meta| metadata_i64(meta, "booking_id"));

        Self {
            event: event.to_string(),
            reference,
            booking_id,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookVerdict {
    /// Signature missing or wrong. Nothing past the signature was read.
    Rejected,
    /// Authentic, but not a successful charge.
    Ignored { event: String },
    SuccessfulCharge(ChargeEvent),
}

impl WebhookVerdict {
    pub fn is_authentic(&self) -> bool {
        !matches!(self, WebhookVerdict::Rejected)
    }

    pub fn is_successful_charge(&self) -> bool {
        matches!(self, WebhookVerdict::SuccessfulCharge(_))
    }
}

/// Integer lookup that tolerates gateways echoing numbers back as strings.
pub fn metadata_i64(metadata: &Metadata, key: &str) -> Option<i64> {
    match metadata.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Gateways send metadata as an object, `null`, or occasionally an empty
/// string. Anything that is not an object becomes an empty map.
pub fn metadata_from_value(value: Option<Value>) -> Metadata {
    match value {
        Some(Value::Object(map)) => map,
        _ => Metadata::new(),
    }
}

/// Exact decimal from a JSON number or numeric string.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
