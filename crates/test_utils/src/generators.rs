//! Property-Based Test Generators
//!
//! proptest strategies for amounts, ledger operations, and room ledger
//! lines that respect the ledger's sign rules.

use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::{Currency, Money, RoomId};
use domain_booking::{RoomTransaction, TransactionCategory, TransactionType};

/// Positive amounts with two decimal places, 0.01 to 10,000.00
pub fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

pub fn usd_money_strategy() -> impl Strategy<Value = Money> {
    amount_strategy().prop_map(|amount| Money::new(amount, Currency::USD))
}

/// One step applied to a booking ledger
#[derive(Debug, Clone)]
pub enum LedgerOp {
    Charge(Decimal),
    Pay(Decimal),
    /// Refund of this fraction of the most recent payment, in percent
    Refund(u8),
}

pub fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        amount_strategy().prop_map(LedgerOp::Charge),
        amount_strategy().prop_map(LedgerOp::Pay),
        (1u8..=100).prop_map(LedgerOp::Refund),
    ]
}

pub fn ledger_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<LedgerOp>> {
    prop::collection::vec(ledger_op_strategy(), 1..max_len)
}

pub fn transaction_type_strategy() -> impl Strategy<Value = TransactionType> {
    prop_oneof![
        Just(TransactionType::Payment),
        Just(TransactionType::Charge),
        Just(TransactionType::Refund),
        Just(TransactionType::Fee),
        Just(TransactionType::Deposit),
    ]
}

pub fn category_strategy() -> impl Strategy<Value = TransactionCategory> {
    prop_oneof![
        Just(TransactionCategory::Rent),
        Just(TransactionCategory::Utilities),
        Just(TransactionCategory::Damages),
        Just(TransactionCategory::Deposit),
        Just(TransactionCategory::LateFee),
        Just(TransactionCategory::Other),
    ]
}

/// A valid USD line for `room_id`; REFUND lines get a negative amount
pub fn room_transaction_strategy(room_id: RoomId) -> impl Strategy<Value = RoomTransaction> {
    (transaction_type_strategy(), amount_strategy(), category_strategy()).prop_map(
        move |(kind, amount, category)| {
            let signed = if kind == TransactionType::Refund { -amount } else { amount };
            RoomTransaction::new(room_id, kind.code(), Money::new(signed, Currency::USD), kind)
                .expect("sign follows the transaction type")
                .with_category(category)
        },
    )
}
