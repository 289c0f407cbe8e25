//! Room balance aggregation and reconciliation
//!
//! A room's balance is derived from its transaction history. The bookings
//! that occupy the room carry their own ledgers; reconciliation checks the
//! two views agree and reports when they do not.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

use core_kernel::{Currency, Money, RoomId};

use crate::booking::Booking;
use crate::error::BookingError;
use crate::ports::LedgerStore;
use crate::transaction::{derive_room_balance, RoomLedgerSummary, RoomTransaction};

/// Derived room balance compared against the booking ledgers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub room_id: RoomId,
    /// Sum of the room's signed transaction amounts
    pub derived_balance: Money,
    /// Sum of `current_balance` over the room's active bookings
    pub ledger_balance: Money,
    /// `derived_balance - ledger_balance`
    pub difference: Money,
    pub diverged: bool,
    pub transaction_count: usize,
}

impl ReconciliationReport {
    /// Builds a report from a room's transactions and bookings.
    ///
    /// Inactive bookings are ignored. Bookings in another currency are an
    /// error rather than silently skipped.
    pub fn build(
        room_id: RoomId,
        currency: Currency,
        transactions: &[RoomTransaction],
        bookings: &[Booking],
    ) -> Result<Self, BookingError> {
        let derived_balance = derive_room_balance(currency, transactions)?;
        let ledger_balance = bookings
            .iter()
            .filter(|b| b.is_active)
            .try_fold(Money::zero(currency), |acc, b| acc.checked_add(&b.current_balance()))?;
        let difference = derived_balance.checked_sub(&ledger_balance)?;

        Ok(Self {
            room_id,
            derived_balance,
            ledger_balance,
            difference,
            diverged: !difference.is_zero(),
            transaction_count: transactions.len(),
        })
    }
}

/// Room-level view over the ledger store
pub struct RoomBalanceService {
    store: Arc<dyn LedgerStore>,
    currency: Currency,
}

impl RoomBalanceService {
    pub fn new(store: Arc<dyn LedgerStore>, currency: Currency) -> Self {
        Self { store, currency }
    }

    /// Appends a manual ledger line (deposits, adjustments)
    #[instrument(skip(self, transaction), fields(room_id = %transaction.room_id, kind = transaction.transaction_type.code()))]
    pub async fn record_transaction(&self, transaction: RoomTransaction) -> Result<RoomTransaction, BookingError> {
        if transaction.amount.currency() != self.currency {
            return Err(BookingError::invalid_amount(format!(
                "room ledger is kept in {}, got {}",
                self.currency,
                transaction.amount.currency()
            )));
        }
        let stored = self.store.append_transaction(transaction).await?;
        info!(
            transaction_id = %stored.id,
            amount = %stored.amount,
            running_balance = ?stored.running_balance.map(|b| b.to_string()),
            "Room transaction recorded"
        );
        Ok(stored)
    }

    /// Current room balance, derived from the full history
    pub async fn room_balance(&self, room_id: RoomId) -> Result<Money, BookingError> {
        let transactions = self.store.transactions_for_room(room_id).await?;
        derive_room_balance(self.currency, &transactions)
    }

    pub async fn room_summary(&self, room_id: RoomId) -> Result<RoomLedgerSummary, BookingError> {
        let transactions = self.store.transactions_for_room(room_id).await?;
        RoomLedgerSummary::from_transactions(room_id, self.currency, &transactions)
    }

    pub async fn room_history(&self, room_id: RoomId) -> Result<Vec<RoomTransaction>, BookingError> {
        Ok(self.store.transactions_for_room(room_id).await?)
    }

    /// Compares the derived room balance with the room's booking ledgers
    #[instrument(skip(self))]
    pub async fn reconcile_room(&self, room_id: RoomId) -> Result<ReconciliationReport, BookingError> {
        let transactions = self.store.transactions_for_room(room_id).await?;
        let bookings = self.store.bookings_for_room(room_id).await?;
        let report = ReconciliationReport::build(room_id, self.currency, &transactions, &bookings)?;

        if report.diverged {
            error!(
                target: "ledger::integrity",
                room_id = %room_id,
                derived = %report.derived_balance,
                ledger = %report.ledger_balance,
                difference = %report.difference,
                "Room balance diverges from booking ledgers"
            );
        }
        Ok(report)
    }

    /// Reconciles every room with at least one transaction
    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>, BookingError> {
        let rooms = self.store.rooms_with_transactions().await?;
        let mut reports = Vec::with_capacity(rooms.len());
        for room_id in rooms {
            reports.push(self.reconcile_room(room_id).await?);
        }

        let diverged = reports.iter().filter(|r| r.diverged).count();
        info!(rooms = reports.len(), diverged, "Reconciliation finished");
        Ok(reports)
    }
}
