use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use reqwest::Url;
use rust_decimal::Decimal;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::payments::types::{
    PaymentRequest, PaymentResponse, PaymentVerificationResponse, RefundRequest, RefundResponse,
    WebhookVerdict,
};

/// One payment gateway. Implementations never return errors: every transport
/// or gateway failure comes back as a response whose `success` is false.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize_payment(&self, request: &PaymentRequest) -> PaymentResponse;

    async fn verify_payment(&self, reference: &str) -> PaymentVerificationResponse;

    /// Authenticates a webhook against the exact raw body, then classifies it.
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> WebhookVerdict;

    async fn refund(&self, request: &RefundRequest) -> RefundResponse;

    /// Publishable key for client-side checkout, if the gateway has one.
    fn public_key(&self) -> Option<&str> {
        None
    }
}

/// Why a gateway call did not produce usable data.
#[derive(Debug)]
pub(crate) enum GatewayFailure {
    /// The gateway answered with a failure; carries its message.
    Rejected(String),
    /// Network error, timeout, or an unreadable body.
    Transport(String),
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// `base_url` with `segments` appended, each percent-encoded as one path
/// segment so caller-supplied references cannot change the endpoint.
pub(crate) fn endpoint(base_url: &str, segments: &[&str]) -> std::result::Result<Url, GatewayFailure> {
    let mut url = Url::parse(base_url)
        .map_err(|e| GatewayFailure::Transport(format!("Invalid gateway URL {}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| GatewayFailure::Transport(format!("Invalid gateway URL {}", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Main unit to integer subunit (e.g. NGN to kobo), truncating anything
/// below one subunit. `None` if the result does not fit in an `i64`.
pub fn to_subunit(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|v| v.trunc())
        .and_then(|v| v.to_i64())
}

pub fn from_subunit(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn converts_to_kobo_exactly() {
        assert_eq!(to_subunit(Decimal::new(100050, 2)), Some(100050));
        assert_eq!(to_subunit(Decimal::new(50075, 2)), Some(50075));
        assert_eq!(to_subunit(Decimal::new(150000, 0)), Some(15000000));
        // 0.29 * 100 drifts to 28.999… in binary floating point.
        assert_eq!(to_subunit(Decimal::new(29, 2)), Some(29));
    }

    #[test]
    fn truncates_fractional_subunits() {
        assert_eq!(to_subunit(Decimal::new(10009, 3)), Some(1000));
    }

    #[test]
    fn subunit_round_trip_returns_original_amount() {
        let amount = Decimal::new(100050, 2);
        let kobo = to_subunit(amount).unwrap();
        let back = from_subunit(kobo);
        assert_eq!(back, amount);
        assert_eq!(back.to_string(), "1000.50");
        assert_eq!(from_subunit(250000), Decimal::new(2500, 0));
    }

    #[test]
    fn overflowing_amount_is_not_representable() {
        assert_eq!(to_subunit(Decimal::MAX), None);
    }

    #[test]
    fn endpoint_appends_segments_to_base_path() {
        let url = endpoint("https://api.flutterwave.com/v3", &["transactions", "4975363", "refund"]).unwrap();
        assert_eq!(url.as_str(), "https://api.flutterwave.com/v3/transactions/4975363/refund");

        let url = endpoint("http://127.0.0.1:8080", &["refund"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/refund");
    }

    #[test]
    fn endpoint_escapes_reserved_characters() {
        let url = endpoint("https://api.paystack.co", &["transaction", "verify", "../refund?x=1#y"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.paystack.co/transaction/verify/..%2Frefund%3Fx=1%23y"
        );
        assert_eq!(url.path_segments().map(|s| s.count()), Some(3));
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn endpoint_rejects_unusable_base() {
        assert!(endpoint("not a url", &["refund"]).is_err());
        assert!(endpoint("mailto:billing@example.com", &["refund"]).is_err());
    }

    #[test]
    fn blank_headers_are_treated_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-sig", HeaderValue::from_static("  "));
        assert_eq!(header_str(&headers, "x-sig"), None);
        headers.insert("x-sig", HeaderValue::from_static("abc"));
        assert_eq!(header_str(&headers, "X-Sig"), Some("abc"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"secret"));
    }
}
