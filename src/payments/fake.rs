//! In-process stand-in for a payment gateway, used by tests to drive the
//! reconciliation flow deterministically.

use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::payments::{
    provider::PaymentProvider,
    types::{
        PaymentRequest, PaymentResponse, PaymentVerificationResponse, RefundRequest,
        RefundResponse, WebhookVerdict,
    },
};

pub struct FakeProvider {
    initialize: Mutex<PaymentResponse>,
    verify: Mutex<Option<PaymentVerificationResponse>>,
    webhook: Mutex<WebhookVerdict>,
    refund: Mutex<RefundResponse>,
    initialize_requests: Mutex<Vec<PaymentRequest>>,
    verify_calls: Mutex<Vec<String>>,
    refund_requests: Mutex<Vec<RefundRequest>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            initialize: Mutex::new(PaymentResponse::failed("not configured")),
            verify: Mutex::new(None),
            webhook: Mutex::new(WebhookVerdict::Rejected),
            refund: Mutex::new(RefundResponse::failed("not configured")),
            initialize_requests: Mutex::new(Vec::new()),
            verify_calls: Mutex::new(Vec::new()),
            refund_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_initialize(&self, response: PaymentResponse) {
        *self.initialize.lock().unwrap() = response;
    }

    pub fn set_verify(&self, response: PaymentVerificationResponse) {
        *self.verify.lock().unwrap() = Some(response);
    }

    pub fn set_webhook(&self, verdict: WebhookVerdict) {
        *self.webhook.lock().unwrap() = verdict;
    }

    pub fn set_refund(&self, response: RefundResponse) {
        *self.refund.lock().unwrap() = response;
    }

    pub fn initialize_requests(&self) -> Vec<PaymentRequest> {
        self.initialize_requests.lock().unwrap().clone()
    }

    pub fn verify_calls(&self) -> Vec<String> {
        self.verify_calls.lock().unwrap().clone()
    }

    pub fn refund_requests(&self) -> Vec<RefundRequest> {
        self.refund_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn initialize_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        self.initialize_requests.lock().unwrap().push(request.clone());
        self.initialize.lock().unwrap().clone()
    }

    async fn verify_payment(&self, reference: &str) -> PaymentVerificationResponse {
        self.verify_calls.lock().unwrap().push(reference.to_string());
        self.verify
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| PaymentVerificationResponse::failed(reference, "Transaction not found"))
    }

    fn verify_webhook(&self, _headers: &HeaderMap, _body: &[u8]) -> WebhookVerdict {
        self.webhook.lock().unwrap().clone()
    }

    async fn refund(&self, request: &RefundRequest) -> RefundResponse {
        self.refund_requests.lock().unwrap().push(request.clone());
        self.refund.lock().unwrap().clone()
    }

    fn public_key(&self) -> Option<&str> {
        Some("pk_fake")
    }
}
