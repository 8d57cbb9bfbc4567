use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use staybook::{
    domain::{Booking, BookingStatus, CreateBookingRequest, NewPayment, Payment, PaymentStatus},
    error::AppError,
    payments::{
        ChargeEvent, FakeProvider, Metadata, PaymentGateway, PaymentResponse,
        PaymentVerificationResponse, RefundRequest, RefundResponse, WebhookVerdict,
    },
    repository::{
        BookingRepository, PaymentRepository, SqliteBookingRepository, SqlitePaymentRepository,
    },
    service::{Payer, PaymentService, ReconciliationOutcome, WebhookOutcome},
};

const CALLBACK_URL: &str = "http://localhost:8080/payments/callback";

struct Harness {
    provider: Arc<FakeProvider>,
    service: Arc<PaymentService>,
    bookings: Arc<SqliteBookingRepository>,
    payments: Arc<SqlitePaymentRepository>,
}

async fn test_pool() -> anyhow::Result<SqlitePool> {
    // One connection so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

async fn harness() -> anyhow::Result<Harness> {
    harness_on(test_pool().await?)
}

fn harness_on(pool: SqlitePool) -> anyhow::Result<Harness> {
    let provider = Arc::new(FakeProvider::new());
    let gateway = Arc::new(PaymentGateway::new(provider.clone()));
    let bookings = Arc::new(SqliteBookingRepository::new(pool.clone()));
    let payments = Arc::new(SqlitePaymentRepository::new(pool));

    let service = Arc::new(PaymentService::new(
        gateway,
        bookings.clone(),
        payments.clone(),
        CALLBACK_URL,
    ));

    Ok(Harness {
        provider,
        service,
        bookings,
        payments,
    })
}

fn guest(user_id: i64) -> Payer {
    Payer {
        user_id,
        email: "guest@example.com".to_string(),
    }
}

async fn create_booking(h: &Harness, user_id: i64, total: i64) -> anyhow::Result<Booking> {
    let booking = h
        .bookings
        .create(CreateBookingRequest {
            user_id,
            property_id: 3,
            check_in: NaiveDate::from_ymd_opt(2025, 12, 20).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 12, 23).unwrap(),
            guests: 2,
            total_price: Decimal::new(total, 0),
        })
        .await?;
    Ok(booking)
}

async fn create_payment(h: &Harness, booking: &Booking, reference: &str) -> anyhow::Result<Payment> {
    let payment = h
        .payments
        .create(NewPayment {
            booking_id: booking.id,
            amount: booking.total_price,
            payment_method: "fake".to_string(),
            payment_reference: reference.to_string(),
        })
        .await?;
    Ok(payment)
}

fn verified(reference: &str, booking_id: i64, amount: i64) -> PaymentVerificationResponse {
    let mut metadata = Metadata::new();
    metadata.insert("booking_id".to_string(), json!(booking_id));

    PaymentVerificationResponse {
        success: true,
        status: "success".to_string(),
        amount: Decimal::new(amount, 0),
        reference: reference.to_string(),
        metadata,
        message: Some("Payment verified successfully".to_string()),
    }
}

fn charge(reference: &str, booking_id: i64) -> WebhookVerdict {
    WebhookVerdict::SuccessfulCharge(ChargeEvent {
        event: "charge.success".to_string(),
        reference: Some(reference.to_string()),
        booking_id: Some(booking_id),
        amount: Some(Decimal::new(150000, 0)),
    })
}

async fn payment_status(h: &Harness, reference: &str) -> anyhow::Result<PaymentStatus> {
    let payment = h.payments.find_by_reference(reference).await?.unwrap();
    Ok(payment.status)
}

async fn booking_status(h: &Harness, id: i64) -> anyhow::Result<BookingStatus> {
    let booking = h.bookings.find_by_id(id).await?.unwrap();
    Ok(booking.status)
}

#[tokio::test]
async fn initialize_records_pending_payment() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    h.provider
        .set_initialize(PaymentResponse::succeeded("https://checkout.test/abc", "gw-ref-1"));

    let session = h.service.initialize_payment(booking.id, &guest(1)).await?;

    assert_eq!(session.authorization_url, "https://checkout.test/abc");
    assert_eq!(session.reference, "gw-ref-1");
    assert_eq!(session.payment.status, PaymentStatus::Pending);
    assert_eq!(session.payment.amount, Decimal::new(150000, 0));
    assert_eq!(session.payment.payment_method, "fake");
    assert_eq!(session.payment.payment_reference, "gw-ref-1");

    let sent = h.provider.initialize_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].amount(), Decimal::new(150000, 0));
    assert_eq!(sent[0].email(), "guest@example.com");
    assert_eq!(sent[0].callback_url(), CALLBACK_URL);
    assert!(sent[0].reference().starts_with(&format!("BK-{}-", booking.id)));
    assert_eq!(sent[0].metadata()["booking_id"], json!(booking.id));
    assert_eq!(sent[0].metadata()["user_id"], json!(1));
    assert_eq!(sent[0].metadata()["provider"], json!("fake"));

    // The booking itself is untouched until the payment is reconciled.
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn initialize_failure_writes_nothing() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    h.provider.set_initialize(PaymentResponse::failed("Invalid key"));

    let err = h
        .service
        .initialize_payment(booking.id, &guest(1))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Payment(ref msg) if msg == "Invalid key"));
    assert!(h.payments.find_by_booking(booking.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn initialize_checks_booking_before_calling_gateway() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    h.provider
        .set_initialize(PaymentResponse::succeeded("https://checkout.test/abc", "gw-ref-1"));

    let missing = h.service.initialize_payment(999, &guest(1)).await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let foreign = h
        .service
        .initialize_payment(booking.id, &guest(2))
        .await
        .unwrap_err();
    assert!(matches!(foreign, AppError::Forbidden));

    h.bookings.update_status(booking.id, BookingStatus::Cancelled).await?;
    let cancelled = h
        .service
        .initialize_payment(booking.id, &guest(1))
        .await
        .unwrap_err();
    assert!(matches!(cancelled, AppError::BadRequest(_)));

    assert!(h.provider.initialize_requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn callback_confirms_booking_once() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;
    h.provider.set_verify(verified(&reference, booking.id, 150000));

    let first = h.service.handle_callback(Some(reference.as_str())).await?;
    assert_eq!(
        first,
        ReconciliationOutcome::Confirmed {
            booking_id: booking.id,
            reference: reference.clone(),
        }
    );

    let paid = h.payments.find_by_reference(&reference).await?.unwrap();
    assert_eq!(paid.status, PaymentStatus::Successful);
    assert!(paid.paid_at.is_some());
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Confirmed);

    let second = h.service.handle_callback(Some(reference.as_str())).await?;
    assert_eq!(
        second,
        ReconciliationOutcome::AlreadyConfirmed {
            booking_id: booking.id,
            reference: reference.clone(),
        }
    );

    let unchanged = h.payments.find_by_reference(&reference).await?.unwrap();
    assert_eq!(unchanged.paid_at, paid.paid_at);
    assert_eq!(h.provider.verify_calls(), vec![reference.clone(), reference]);
    Ok(())
}

#[tokio::test]
async fn concurrent_notifications_transition_once() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;
    h.provider.set_verify(verified(&reference, booking.id, 150000));

    let (a, b) = tokio::join!(
        h.service.handle_callback(Some(reference.as_str())),
        h.service.handle_callback(Some(reference.as_str())),
    );
    let outcomes = [a?, b?];

    let confirmed = outcomes
        .iter()
        .filter(|o| matches!(o, ReconciliationOutcome::Confirmed { .. }))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, ReconciliationOutcome::AlreadyConfirmed { .. }))
        .count();

    assert_eq!(confirmed, 1);
    assert_eq!(already, 1);
    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Successful);
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Confirmed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_notifications_on_shared_database_transition_once() -> anyhow::Result<()> {
    // A file database so each notification can hold its own connection.
    let dir = tempfile::tempdir()?;
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("staybook.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let h = harness_on(pool.clone())?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;
    h.provider.set_verify(verified(&reference, booking.id, 150000));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = h.service.clone();
            let reference = reference.clone();
            tokio::spawn(async move { service.handle_callback(Some(reference.as_str())).await })
        })
        .collect();

    let mut confirmed = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await?? {
            ReconciliationOutcome::Confirmed { booking_id, .. } => {
                assert_eq!(booking_id, booking.id);
                confirmed += 1;
            }
            ReconciliationOutcome::AlreadyConfirmed { booking_id, .. } => {
                assert_eq!(booking_id, booking.id);
                already += 1;
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(already, 7);
    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Successful);
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Confirmed);
    assert_eq!(h.provider.verify_calls().len(), 8);

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn callback_without_reference_fails_without_gateway_call() -> anyhow::Result<()> {
    let h = harness().await?;

    assert!(!h.service.handle_callback(None).await?.is_success());
    assert!(!h.service.handle_callback(Some("  ")).await?.is_success());
    assert!(h.provider.verify_calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn unverified_callback_changes_nothing() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;

    // Fake gateway answers "not found" by default.
    let outcome = h.service.handle_callback(Some(reference.as_str())).await?;
    assert!(matches!(outcome, ReconciliationOutcome::Failed { .. }));

    // Reachable gateway, but the charge was abandoned.
    let mut abandoned = verified(&reference, booking.id, 150000);
    abandoned.status = "abandoned".to_string();
    h.provider.set_verify(abandoned);
    assert!(!h.service.handle_callback(Some(reference.as_str())).await?.is_success());

    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Pending);
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn callback_rejects_mismatched_records() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let other = create_booking(&h, 1, 90000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;

    // Gateway verified a different reference than the one in the callback.
    h.provider.set_verify(verified("BK-other", booking.id, 150000));
    assert!(!h.service.handle_callback(Some(reference.as_str())).await?.is_success());

    // Metadata names a booking the payment does not belong to.
    h.provider.set_verify(verified(&reference, other.id, 150000));
    assert!(!h.service.handle_callback(Some(reference.as_str())).await?.is_success());

    // Metadata names a booking that does not exist.
    h.provider.set_verify(verified(&reference, 999, 150000));
    assert!(!h.service.handle_callback(Some(reference.as_str())).await?.is_success());

    // Verified reference with no payment row.
    h.provider.set_verify(verified("BK-unknown", booking.id, 150000));
    assert!(!h.service.handle_callback(Some("BK-unknown")).await?.is_success());

    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Pending);
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Pending);
    assert_eq!(booking_status(&h, other.id).await?, BookingStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn failed_payments_stay_failed() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    let payment = create_payment(&h, &booking, &reference).await?;
    h.payments.update_status(payment.id, PaymentStatus::Failed, None).await?;
    h.provider.set_verify(verified(&reference, booking.id, 150000));

    let outcome = h.service.handle_callback(Some(reference.as_str())).await?;

    assert!(!outcome.is_success());
    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Failed);
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn webhook_outcomes() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    let reference = format!("BK-{}-1700000000", booking.id);
    create_payment(&h, &booking, &reference).await?;
    let headers = HeaderMap::new();
    let body = b"{}";

    assert_eq!(h.service.handle_webhook(&headers, body).await?, WebhookOutcome::Rejected);

    h.provider.set_webhook(WebhookVerdict::Ignored {
        event: "transfer.success".to_string(),
    });
    assert_eq!(h.service.handle_webhook(&headers, body).await?, WebhookOutcome::Ignored);
    assert_eq!(payment_status(&h, &reference).await?, PaymentStatus::Pending);

    h.provider.set_webhook(charge(&reference, booking.id));
    assert_eq!(
        h.service.handle_webhook(&headers, body).await?,
        WebhookOutcome::Processed(ReconciliationOutcome::Confirmed {
            booking_id: booking.id,
            reference: reference.clone(),
        })
    );
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Confirmed);

    // Gateways redeliver; the second delivery is a no-op.
    assert_eq!(
        h.service.handle_webhook(&headers, body).await?,
        WebhookOutcome::Processed(ReconciliationOutcome::AlreadyConfirmed {
            booking_id: booking.id,
            reference,
        })
    );

    // Webhooks trust the signature and never call back to the gateway.
    assert!(h.provider.verify_calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_processed_but_fails() -> anyhow::Result<()> {
    let h = harness().await?;
    let booking = create_booking(&h, 1, 150000).await?;
    h.provider.set_webhook(charge("BK-unknown", booking.id));

    let outcome = h.service.handle_webhook(&HeaderMap::new(), b"{}").await?;

    assert!(matches!(
        outcome,
        WebhookOutcome::Processed(ReconciliationOutcome::Failed { .. })
    ));
    assert_eq!(booking_status(&h, booking.id).await?, BookingStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn refund_delegates_to_gateway() -> anyhow::Result<()> {
    let h = harness().await?;
    h.provider.set_refund(RefundResponse::succeeded("rf_1"));

    let response = h
        .service
        .refund(RefundRequest::partial("txn_1", Decimal::new(50075, 2)).with_reason("guest cancelled"))
        .await;

    assert!(response.success);
    assert_eq!(response.refund_id.as_deref(), Some("rf_1"));

    let sent = h.provider.refund_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].transaction_id, "txn_1");
    assert_eq!(sent[0].amount, Some(Decimal::new(50075, 2)));
    Ok(())
}
