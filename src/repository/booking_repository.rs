use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::{Booking, BookingStatus, CreateBookingRequest},
    error::{AppError, Result},
    repository::BookingRepository,
};

#[derive(FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    property_id: i64,
    check_in: NaiveDate,
    check_out: NaiveDate,
    guests: i64,
    total_price: String,
    status: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteBookingRepository {
    pool: SqlitePool,
}

impl SqliteBookingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_booking(row: BookingRow) -> Result<Booking> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            property_id: row.property_id,
            check_in: row.check_in,
            check_out: row.check_out,
            guests: row.guests,
            total_price: Decimal::from_str(&row.total_price)
                .map_err(|e| AppError::Database(format!("Invalid total price: {}", e)))?,
            status: BookingStatus::from_str(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid booking status: {}", row.status)))?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

#[async_trait]
impl BookingRepository for SqliteBookingRepository {
    async fn create(&self, booking: CreateBookingRequest) -> Result<Booking> {
        if booking.check_out <= booking.check_in {
            return Err(AppError::Validation(
                "Check-out must be after check-in".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                user_id, property_id, check_in, check_out, guests,
                total_price, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(booking.user_id)
        .bind(booking.property_id)
        .bind(booking.check_in)
        .bind(booking.check_out)
        .bind(booking.guests)
        .bind(booking.total_price.to_string())
        .bind(BookingStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created booking".to_string())
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT id, user_id, property_id, check_in, check_out, guests,
                   total_price, status, created_at, updated_at
            FROM bookings
            WHERE id = ?
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_booking(r)?)),
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: i64, status: BookingStatus) -> Result<Booking> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = ?, updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Booking {} not found", id)));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated booking".to_string())
        })
    }
}
