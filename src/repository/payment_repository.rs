use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{BookingStatus, NewPayment, Payment, PaymentStatus},
    error::{AppError, Result},
    repository::PaymentRepository,
};

#[derive(FromRow)]
struct PaymentRow {
    id: i64,
    booking_id: i64,
    amount: String,
    payment_method: String,
    payment_reference: String,
    status: String,
    paid_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            amount: Decimal::from_str(&row.amount)
                .map_err(|e| AppError::Database(format!("Invalid payment amount: {}", e)))?,
            payment_method: row.payment_method,
            payment_reference: row.payment_reference,
            status: PaymentStatus::from_str(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid payment status: {}", row.status)))?,
            paid_at: row.paid_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<Payment> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                booking_id, amount, payment_method, payment_reference,
                status, paid_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
            "#
        )
        .bind(payment.booking_id)
        .bind(payment.amount.to_string())
        .bind(&payment.payment_method)
        .bind(&payment.payment_reference)
        .bind(PaymentStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                format!("Payment reference {} already exists", payment.payment_reference),
            ),
            other => AppError::Database(other.to_string()),
        })?;

        let id = result.last_insert_rowid();
        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, booking_id, amount, payment_method, payment_reference,
                   status, paid_at, created_at, updated_at
            FROM payments
            WHERE id = ?
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, booking_id, amount, payment_method, payment_reference,
                   status, paid_at, created_at, updated_at
            FROM payments
            WHERE payment_reference = ?
            "#
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_booking(&self, booking_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, booking_id, amount, payment_method, payment_reference,
                   status, paid_at, created_at, updated_at
            FROM payments
            WHERE booking_id = ?
            ORDER BY created_at DESC, id DESC
            "#
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }

    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment> {
        let now = Utc::now().naive_utc();

        // Only pending rows may move; the guard keeps terminal states terminal.
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?,
                paid_at = COALESCE(?, paid_at),
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#
        )
        .bind(status.as_str())
        .bind(paid_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let payment = self.find_by_id(id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Payment {} not found", id))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Payment {} is already {}",
                id,
                payment.status.as_str()
            )));
        }

        Ok(payment)
    }

    async fn confirm_with_booking(
        &self,
        payment_id: i64,
        booking_id: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        let payment_update = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?, paid_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#
        )
        .bind(PaymentStatus::Successful.as_str())
        .bind(paid_at.naive_utc())
        .bind(now)
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

        if payment_update.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let booking_update = sqlx::query(
            r#"
            UPDATE bookings
            SET status = ?, updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(BookingStatus::Confirmed.as_str())
        .bind(now)
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        if booking_update.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Booking {} not found", booking_id)));
        }

        tx.commit().await?;
        Ok(true)
    }
}
