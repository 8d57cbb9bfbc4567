use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;

use crate::{
    config::Settings,
    error::Result,
    payments::{
        flutterwave::FlutterwaveProvider,
        paystack::PaystackProvider,
        provider::PaymentProvider,
        types::{
            PaymentRequest, PaymentResponse, PaymentVerificationResponse, RefundRequest,
            RefundResponse, WebhookVerdict,
        },
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Paystack,
    Flutterwave,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "paystack" => Some(ProviderKind::Paystack),
            "flutterwave" => Some(ProviderKind::Flutterwave),
            _ => None,
        }
    }
}

/// The one payment entry point the rest of the application sees. The
/// provider is fixed at construction.
#[derive(Clone)]
pub struct PaymentGateway {
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentGateway {
    pub fn new(provider: Arc<dyn PaymentProvider>) -> Self {
        Self { provider }
    }

    /// Builds the provider named by `payment.provider`. Unknown names fall
    /// back to Paystack.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.payment.timeout_secs.max(1));

        let kind = ProviderKind::from_name(&settings.payment.provider).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown payment provider '{}', falling back to paystack",
                settings.payment.provider
            );
            ProviderKind::Paystack
        });

        let provider: Arc<dyn PaymentProvider> = match kind {
            ProviderKind::Paystack => Arc::new(PaystackProvider::new(&settings.paystack, timeout)?),
            ProviderKind::Flutterwave => Arc::new(FlutterwaveProvider::new(
                &settings.flutterwave,
                &settings.payment.currency,
                timeout,
            )?),
        };

        tracing::info!("Payment provider: {}", provider.name());
        Ok(Self::new(provider))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn initialize_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        self.provider.initialize_payment(request).await
    }

    pub async fn verify_payment(&self, reference: &str) -> PaymentVerificationResponse {
        self.provider.verify_payment(reference).await
    }

    /// True only for an authentic successful-charge notification.
    pub fn handle_webhook(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        self.classify_webhook(headers, body).is_successful_charge()
    }

    pub fn classify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> WebhookVerdict {
        self.provider.verify_webhook(headers, body)
    }

    pub async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        self.provider.refund(request).await
    }

    /// Empty when the active provider has no publishable key.
    pub fn public_key(&self) -> &str {
        self.provider.public_key().unwrap_or("")
    }
}
