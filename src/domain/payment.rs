use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub booking_id: i64,
    pub amount: Decimal,
    /// Name of the gateway that took the payment (`paystack`, `flutterwave`).
    pub payment_method: String,
    pub payment_reference: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "successful" => Some(PaymentStatus::Successful),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Successful and failed payments never change status again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// A payment row about to be inserted, created once a gateway has accepted
/// the initialization.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: i64,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [PaymentStatus::Pending, PaymentStatus::Successful, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("Completed"), None);
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Successful.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
