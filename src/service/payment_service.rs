use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::json;

use crate::{
    domain::{Booking, NewPayment, Payment, PaymentStatus},
    error::{AppError, Result},
    payments::{
        ChargeEvent, Metadata, PaymentGateway, PaymentRequest, RefundRequest, RefundResponse,
        WebhookVerdict,
    },
    repository::{BookingRepository, PaymentRepository},
};

/// The authenticated user starting a checkout.
#[derive(Debug, Clone)]
pub struct Payer {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub authorization_url: String,
    pub reference: String,
    pub payment: Payment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// This call moved the payment to successful and confirmed the booking.
    Confirmed { booking_id: i64, reference: String },
    /// An earlier notification already did; nothing was written.
    AlreadyConfirmed { booking_id: i64, reference: String },
    /// Nothing was written.
    Failed { reason: String },
}

impl ReconciliationOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        ReconciliationOutcome::Failed { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ReconciliationOutcome::Failed { .. })
    }

    pub fn booking_id(&self) -> Option<i64> {
        match self {
            ReconciliationOutcome::Confirmed { booking_id, .. }
            | ReconciliationOutcome::AlreadyConfirmed { booking_id, .. } => Some(*booking_id),
            ReconciliationOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Bad or missing signature; answer 400.
    Rejected,
    /// Authentic but not a successful charge; answer 200 and do nothing.
    Ignored,
    /// Authentic successful charge; answer 200 whatever the outcome.
    Processed(ReconciliationOutcome),
}

/// Drives a payment from initialization to a confirmed booking. Both the
/// browser callback and the gateway webhook end in the same guarded
/// transition, so whichever arrives first wins and the rest are no-ops.
pub struct PaymentService {
    gateway: Arc<PaymentGateway>,
    booking_repo: Arc<dyn BookingRepository>,
    payment_repo: Arc<dyn PaymentRepository>,
    callback_url: String,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<PaymentGateway>,
        booking_repo: Arc<dyn BookingRepository>,
        payment_repo: Arc<dyn PaymentRepository>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            booking_repo,
            payment_repo,
            callback_url: callback_url.into(),
        }
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    /// Starts a checkout for a pending booking owned by `payer`. A pending
    /// payment row is written only once the gateway has accepted.
    pub async fn initialize_payment(&self, booking_id: i64, payer: &Payer) -> Result<CheckoutSession> {
        let booking = self
            .booking_repo
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", booking_id)))?;

        if !booking.is_owned_by(payer.user_id) {
            return Err(AppError::Forbidden);
        }

        if !booking.is_payable() {
            return Err(AppError::BadRequest("This booking cannot be paid for.".to_string()));
        }

        let provider = self.gateway.provider_name();
        let mut metadata = Metadata::new();
        metadata.insert("booking_id".to_string(), json!(booking.id));
        metadata.insert("user_id".to_string(), json!(payer.user_id));
        metadata.insert("provider".to_string(), json!(provider));

        let request = PaymentRequest::new(
            booking.total_price,
            payer.email.clone(),
            generate_reference(booking.id),
            self.callback_url.clone(),
            metadata,
        )?;

        let response = self.gateway.initialize_payment(&request).await;

        let authorization_url = match (response.success, response.authorization_url) {
            (true, Some(url)) if !url.is_empty() => url,
            (true, _) => {
                tracing::error!(
                    booking_id = booking.id,
                    provider,
                    "Gateway accepted payment without an authorization URL"
                );
                return Err(AppError::Payment(
                    "Failed to initialize payment. Please try again.".to_string(),
                ));
            }
            (false, _) => {
                return Err(AppError::Payment(response.message.unwrap_or_else(|| {
                    "Failed to initialize payment. Please try again.".to_string()
                })));
            }
        };

        // The gateway may issue its own reference; that is what later
        // notifications will carry.
        let reference = response
            .reference
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| request.reference().to_string());

        let payment = self
            .payment_repo
            .create(NewPayment {
                booking_id: booking.id,
                amount: booking.total_price,
                payment_method: provider.to_string(),
                payment_reference: reference.clone(),
            })
            .await?;

        tracing::info!(
            booking_id = booking.id,
            reference = %reference,
            provider,
            "Payment initialized"
        );

        Ok(CheckoutSession {
            authorization_url,
            reference,
            payment,
        })
    }

    /// Browser redirect back from the gateway. Verifies with the gateway
    /// before touching any state.
    pub async fn handle_callback(&self, reference: Option<&str>) -> Result<ReconciliationOutcome> {
        let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(ReconciliationOutcome::failed("Payment reference not found."));
        };

        let verification = self.gateway.verify_payment(reference).await;
        if !verification.is_successful() {
            tracing::info!(
                reference,
                status = %verification.status,
                "Payment callback did not verify"
            );
            return Ok(ReconciliationOutcome::failed(
                verification
                    .message
                    .unwrap_or_else(|| "Payment verification failed.".to_string()),
            ));
        }

        if verification.reference != reference {
            tracing::warn!(
                reference,
                verified_reference = %verification.reference,
                "Gateway verified a different reference than the callback carried"
            );
            return Ok(ReconciliationOutcome::failed("Payment verification failed."));
        }

        let Some((payment, booking)) = self.load(reference, verification.booking_id()).await? else {
            return Ok(ReconciliationOutcome::failed("Payment verification failed."));
        };

        if verification.amount != payment.amount {
            tracing::warn!(
                reference,
                expected = %payment.amount,
                verified = %verification.amount,
                "Verified amount differs from the recorded payment amount"
            );
        }

        self.confirm(payment, booking, "callback").await
    }

    /// Gateway webhook. The signature and event type are trusted; there is no
    /// second round trip to the gateway.
    pub async fn handle_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookOutcome> {
        let event = match self.gateway.classify_webhook(headers, body) {
            WebhookVerdict::Rejected => {
                tracing::warn!(provider = self.gateway.provider_name(), "Invalid webhook received");
                return Ok(WebhookOutcome::Rejected);
            }
            WebhookVerdict::Ignored { event } => {
                tracing::debug!(event = %event, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
            WebhookVerdict::SuccessfulCharge(event) => event,
        };

        let outcome = self.reconcile_charge(event).await?;
        Ok(WebhookOutcome::Processed(outcome))
    }

    async fn reconcile_charge(&self, event: ChargeEvent) -> Result<ReconciliationOutcome> {
        let Some(reference) = event.reference.as_deref() else {
            tracing::warn!(event = %event.event, "Successful charge webhook without a reference");
            return Ok(ReconciliationOutcome::failed("Webhook carried no reference"));
        };

        let Some((payment, booking)) = self.load(reference, event.booking_id).await? else {
            return Ok(ReconciliationOutcome::failed("No matching payment for webhook"));
        };

        self.confirm(payment, booking, "webhook").await
    }

    /// Looks up the payment by reference and the booking named in the
    /// gateway metadata, and checks they belong together.
    async fn load(&self, reference: &str, booking_id: Option<i64>) -> Result<Option<(Payment, Booking)>> {
        let Some(booking_id) = booking_id else {
            tracing::warn!(reference, "Verified payment has no booking_id in metadata");
            return Ok(None);
        };

        let Some(payment) = self.payment_repo.find_by_reference(reference).await? else {
            tracing::warn!(reference, booking_id, "No payment recorded for verified reference");
            return Ok(None);
        };

        let Some(booking) = self.booking_repo.find_by_id(booking_id).await? else {
            tracing::warn!(reference, booking_id, "Booking for verified payment not found");
            return Ok(None);
        };

        if payment.booking_id != booking.id {
            tracing::warn!(
                reference,
                booking_id,
                payment_booking_id = payment.booking_id,
                "Payment and metadata disagree on the booking"
            );
            return Ok(None);
        }

        Ok(Some((payment, booking)))
    }

    async fn confirm(&self, payment: Payment, booking: Booking, via: &str) -> Result<ReconciliationOutcome> {
        let reference = payment.payment_reference.clone();

        if payment.status == PaymentStatus::Successful {
            tracing::info!(reference = %reference, via, "Payment already reconciled");
            return Ok(ReconciliationOutcome::AlreadyConfirmed {
                booking_id: booking.id,
                reference,
            });
        }

        if payment.status.is_terminal() {
            tracing::warn!(
                reference = %reference,
                status = payment.status.as_str(),
                via,
                "Notification for a payment that is no longer pending"
            );
            return Ok(ReconciliationOutcome::failed("Payment is no longer pending."));
        }

        if self
            .payment_repo
            .confirm_with_booking(payment.id, booking.id, Utc::now())
            .await?
        {
            tracing::info!(
                booking_id = booking.id,
                reference = %reference,
                provider = self.gateway.provider_name(),
                via,
                "Payment completed successfully"
            );
            return Ok(ReconciliationOutcome::Confirmed {
                booking_id: booking.id,
                reference,
            });
        }

        // Lost the race to a concurrent notification for the same reference.
        let current = self.payment_repo.find_by_id(payment.id).await?;
        match current.map(|p| p.status) {
            Some(PaymentStatus::Successful) => {
                tracing::info!(reference = %reference, via, "Payment reconciled concurrently");
                Ok(ReconciliationOutcome::AlreadyConfirmed {
                    booking_id: booking.id,
                    reference,
                })
            }
            _ => Ok(ReconciliationOutcome::failed("Payment is no longer pending.")),
        }
    }

    /// One-shot refund through the active gateway. Does not change any
    /// payment or booking state.
    pub async fn refund(&self, request: RefundRequest) -> RefundResponse {
        let response = self.gateway.refund(&request).await;
        if response.success {
            tracing::info!(
                transaction_id = %request.transaction_id,
                partial = request.amount.is_some(),
                "Refund accepted by gateway"
            );
        } else {
            tracing::warn!(
                transaction_id = %request.transaction_id,
                message = ?response.message,
                "Refund rejected"
            );
        }
        response
    }
}

/// `BK-{booking}-{unix seconds}-{nonce}`; unique per attempt even when the
/// same booking is retried within one second.
pub fn generate_reference(booking_id: i64) -> String {
    use rand::RngCore;
    let mut nonce = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!("BK-{}-{}-{}", booking_id, Utc::now().timestamp(), hex::encode(nonce))
}
