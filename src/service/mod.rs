pub mod payment_service;

use std::sync::Arc;
use crate::auth::AuthService;
use crate::payments::PaymentGateway;
use crate::repository::*;

pub use payment_service::{
    generate_reference, CheckoutSession, Payer, PaymentService, ReconciliationOutcome,
    WebhookOutcome,
};

pub struct ServiceContext {
    pub booking_repo: Arc<dyn BookingRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub gateway: Arc<PaymentGateway>,
    pub payment_service: Arc<PaymentService>,
    pub auth_service: Arc<AuthService>,
}

impl ServiceContext {
    /// `callback_url` is where the gateway sends the payer's browser after
    /// checkout.
    pub fn new(
        booking_repo: Arc<dyn BookingRepository>,
        payment_repo: Arc<dyn PaymentRepository>,
        gateway: Arc<PaymentGateway>,
        auth_service: Arc<AuthService>,
        callback_url: String,
    ) -> Self {
        let payment_service = Arc::new(PaymentService::new(
            gateway.clone(),
            booking_repo.clone(),
            payment_repo.clone(),
            callback_url,
        ));

        Self {
            booking_repo,
            payment_repo,
            gateway,
            payment_service,
            auth_service,
        }
    }
}
