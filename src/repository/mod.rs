use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::domain::*;
use crate::error::Result;

pub mod booking_repository;
pub mod payment_repository;

pub use booking_repository::SqliteBookingRepository;
pub use payment_repository::SqlitePaymentRepository;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: CreateBookingRequest) -> Result<Booking>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Booking>>;
    async fn update_status(&self, id: i64, status: BookingStatus) -> Result<Booking>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: NewPayment) -> Result<Payment>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn find_by_booking(&self, booking_id: i64) -> Result<Vec<Payment>>;
    /// Moves a pending payment to `status`. Terminal payments are rejected
    /// with `AppError::Conflict`.
    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment>;
    /// Marks a pending payment successful and confirms its booking in one
    /// transaction. Returns `false` without writing anything if the payment
    /// was no longer pending when the update ran.
    async fn confirm_with_booking(
        &self,
        payment_id: i64,
        booking_id: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<bool>;
}
