//! Custom Test Assertions
//!
//! Ledger-aware assertions with failure messages that show the totals
//! involved.

use rust_decimal::Decimal;

use core_kernel::Money;
use domain_booking::{
    booking::derive_payment_status, Booking, FailureKind, LedgerStatus, PaymentResult,
    PaymentStatus, RoomTransaction,
};

/// Asserts a Money value in the same currency with an exact amount
pub fn assert_money_eq(actual: &Money, expected: &Money) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );
    assert_eq!(
        actual.amount(),
        expected.amount(),
        "Amount mismatch: actual={}, expected={}",
        actual,
        expected
    );
}

/// Asserts the balance identity and the derived status of a booking
pub fn assert_ledger_consistent(booking: &Booking) {
    let expected_balance = booking
        .total_charges()
        .checked_sub(&booking.total_payments())
        .expect("ledger totals share a currency");
    assert_eq!(
        booking.current_balance(),
        expected_balance,
        "Balance {} is not charges {} minus payments {}",
        booking.current_balance(),
        booking.total_charges(),
        booking.total_payments()
    );

    let derived = derive_payment_status(&booking.total_payments(), &booking.current_balance());
    let status = booking.payment_status();
    let overdue_allowed = status == LedgerStatus::Overdue && booking.current_balance().is_positive();
    assert!(
        status == derived || overdue_allowed,
        "Status {:?} does not follow from payments {} and balance {}",
        status,
        booking.total_payments(),
        booking.current_balance()
    );
}

/// Asserts the three ledger totals of a booking
pub fn assert_booking_totals(booking: &Booking, charges: Decimal, payments: Decimal, balance: Decimal) {
    assert_eq!(booking.total_charges().amount(), charges, "total_charges");
    assert_eq!(booking.total_payments().amount(), payments, "total_payments");
    assert_eq!(booking.current_balance().amount(), balance, "current_balance");
    assert_ledger_consistent(booking);
}

/// Asserts a successful result carrying a COMPLETED payment
pub fn assert_payment_completed(result: &PaymentResult) {
    assert!(result.success, "Expected success, got: {}", result.message);
    let payment = result.payment.as_ref().expect("successful result carries a payment");
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.processed_at.is_some(), "completed payment has no processed_at");
}

/// Asserts a failed result of the given kind whose message contains `fragment`
pub fn assert_payment_failed(result: &PaymentResult, kind: FailureKind, fragment: &str) {
    assert!(!result.success, "Expected failure, got: {}", result.message);
    assert_eq!(result.failure, Some(kind), "message: {}", result.message);
    assert!(
        result.message.contains(fragment),
        "Message {:?} does not contain {:?}",
        result.message,
        fragment
    );
}

/// Asserts that every line's running balance is the signed sum of the
/// lines up to and including it
pub fn assert_running_balances(transactions: &[RoomTransaction]) {
    let Some(first) = transactions.first() else {
        return;
    };
    let mut balance = Money::zero(first.amount.currency());
    for (index, line) in transactions.iter().enumerate() {
        balance = balance
            .checked_add(&line.signed_amount())
            .expect("room lines share a currency");
        assert_eq!(
            line.running_balance,
            Some(balance),
            "Line {} ({} {}) has running balance {:?}, expected {}",
            index,
            line.transaction_type.code(),
            line.amount,
            line.running_balance,
            balance
        );
    }
}
