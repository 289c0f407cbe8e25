//! Ledger store against PostgreSQL
//!
//! Requires Docker. Run with `cargo test -p test_utils -- --ignored`.

use rust_decimal_macros::dec;
use std::sync::Arc;

use core_kernel::{Currency, HealthCheckable, RoomId};
use domain_booking::{
    GatewayRegistry, LedgerStatus, LedgerStore, PaymentMethod, PaymentRequest, PaymentService,
    PaymentServiceConfig, RoomBalanceService, TransactionCategory,
};
use test_utils::{
    assert_booking_totals, assert_payment_completed, assert_running_balances, get_shared_test_database,
    TestBookingBuilder,
};

async fn services() -> (Arc<dyn LedgerStore>, Arc<PaymentService>, RoomBalanceService) {
    let db = get_shared_test_database().await;
    let store: Arc<dyn LedgerStore> = db.store();
    let payments = PaymentService::new(store.clone(), GatewayRegistry::new(), PaymentServiceConfig::default());
    let rooms = RoomBalanceService::new(store.clone(), Currency::USD);
    (store, Arc::new(payments), rooms)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_store_reports_healthy() {
    let db = get_shared_test_database().await;
    assert!(db.store().health_check().await.is_healthy());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_booking_ledger_survives_round_trip() {
    let (store, _, _) = services().await;
    let booking = TestBookingBuilder::new()
        .with_charge(dec!(240))
        .with_payment(dec!(100))
        .overdue()
        .build();

    store.create_booking(booking.clone()).await.unwrap();
    let loaded = store.get_booking(booking.id).await.unwrap();

    assert_booking_totals(&loaded, dec!(240), dec!(100), dec!(140));
    assert_eq!(loaded.payment_status(), LedgerStatus::Overdue);
    assert_eq!(loaded.guest_name, booking.guest_name);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_concurrent_payments_serialize_on_booking() {
    let (store, payments, rooms) = services().await;
    let room = RoomId::new();
    let booking = store
        .create_booking(TestBookingBuilder::new().in_room(room).build())
        .await
        .unwrap();
    payments
        .add_charge(booking.id, dec!(100), TransactionCategory::Rent, "Rent")
        .await
        .unwrap();

    let first = {
        let payments = payments.clone();
        tokio::spawn(async move {
            payments
                .process_payment(PaymentRequest::new(booking.id, dec!(50), PaymentMethod::Cash))
                .await
        })
    };
    let second = {
        let payments = payments.clone();
        tokio::spawn(async move {
            payments
                .process_payment(PaymentRequest::new(booking.id, dec!(30), PaymentMethod::Card))
                .await
        })
    };
    assert_payment_completed(&first.await.unwrap());
    assert_payment_completed(&second.await.unwrap());

    let loaded = store.get_booking(booking.id).await.unwrap();
    assert_booking_totals(&loaded, dec!(100), dec!(80), dec!(20));

    let lines = rooms.room_history(room).await.unwrap();
    assert_eq!(lines.len(), 3);
    assert_running_balances(&lines);
    assert!(!rooms.reconcile_room(room).await.unwrap().diverged);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_concurrent_refunds_respect_original() {
    let (store, payments, _) = services().await;
    let booking = store
        .create_booking(TestBookingBuilder::new().with_charge(dec!(100)).build())
        .await
        .unwrap();
    let original = payments
        .process_payment(PaymentRequest::new(booking.id, dec!(100), PaymentMethod::Cash))
        .await
        .payment
        .unwrap();

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let payments = payments.clone();
            tokio::spawn(async move { payments.refund_payment(original.id, dec!(60)).await })
        })
        .collect();
    let mut succeeded = 0;
    for attempt in attempts {
        if attempt.await.unwrap().success {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 1);
    let loaded = store.get_booking(booking.id).await.unwrap();
    assert_booking_totals(&loaded, dec!(100), dec!(40), dec!(60));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_payment_history_is_most_recent_first() {
    let (store, payments, _) = services().await;
    let booking = store
        .create_booking(TestBookingBuilder::new().with_charge(dec!(90)).build())
        .await
        .unwrap();

    for amount in [dec!(10), dec!(20), dec!(30)] {
        let result = payments
            .process_payment(PaymentRequest::new(booking.id, amount, PaymentMethod::Cash))
            .await;
        assert_payment_completed(&result);
    }

    let history = payments.payment_history(booking.id).await.unwrap();
    let amounts: Vec<_> = history.iter().map(|p| p.amount.amount()).collect();
    assert_eq!(amounts, vec![dec!(30), dec!(20), dec!(10)]);
}
