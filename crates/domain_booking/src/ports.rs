//! Booking Domain Ports
//!
//! The `LedgerStore` port is everything the payment core needs from
//! persistence. Adapters:
//!
//! - **PostgreSQL** (`infra_db::PostgresLedgerStore`): row locks inside a
//!   database transaction
//! - **In-memory** ([`mock::InMemoryLedgerStore`]): per-booking async mutex,
//!   for tests and local runs
//!
//! # Units of work
//!
//! [`LedgerStore::settle_payment`] and [`LedgerStore::mutate_booking`] are
//! the only operations that change a booking's ledger. Each one locks the
//! booking, applies the change through the domain model, and persists the
//! booking together with the payment (and optional room journal line) as
//! one all-or-nothing step. Calls against the same booking are serialized;
//! calls against different bookings are not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

use core_kernel::{
    BookingId, Currency, DomainPort, HealthCheckable, Money, PaymentId, PortError, RoomId,
};

use crate::booking::{Booking, BookingMutation};
use crate::error::BookingError;
use crate::payment::{Payment, PaymentMethod, PaymentRoute, PaymentStatus};
use crate::transaction::RoomTransaction;

/// Aggregate view over active payments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatistics {
    pub pending_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    /// Counts keyed by payment-method code
    pub by_method: BTreeMap<String, u64>,
    /// Net sum of completed device-routed payments, refunds included
    pub completed_device_total: Money,
    /// Most recent first
    pub recent_payments: Vec<Payment>,
}

impl PaymentStatistics {
    /// Computes statistics from a set of payments; inactive ones are skipped
    pub fn from_payments(
        currency: Currency,
        payments: &[Payment],
        recent_limit: usize,
    ) -> Result<Self, BookingError> {
        let mut stats = Self {
            pending_count: 0,
            completed_count: 0,
            failed_count: 0,
            by_method: BTreeMap::new(),
            completed_device_total: Money::zero(currency),
            recent_payments: Vec::new(),
        };

        let mut active: Vec<&Payment> = payments.iter().filter(|p| p.is_active).collect();
        for payment in &active {
            match payment.status {
                PaymentStatus::Pending => stats.pending_count += 1,
                PaymentStatus::Completed => stats.completed_count += 1,
                PaymentStatus::Failed => stats.failed_count += 1,
            }
            *stats
                .by_method
                .entry(payment.method.code().to_string())
                .or_insert(0) += 1;

            if payment.is_completed()
                && payment.route == PaymentRoute::Device
                && payment.amount.currency() == currency
            {
                stats.completed_device_total =
                    stats.completed_device_total.checked_add(&payment.amount)?;
            }
        }

        sort_most_recent_first(&mut active);
        stats.recent_payments = active.into_iter().take(recent_limit).cloned().collect();
        Ok(stats)
    }

    /// Number of active payments tendered with `method`
    pub fn count_for(&self, method: &PaymentMethod) -> u64 {
        self.by_method.get(method.code()).copied().unwrap_or(0)
    }

    pub fn total_count(&self) -> u64 {
        self.pending_count + self.completed_count + self.failed_count
    }
}

fn sort_most_recent_first(payments: &mut [&Payment]) {
    payments.sort_by_key(|p| Reverse((p.created_at, *p.id.as_uuid())));
}

/// Persistence port for bookings, payments and room transactions
#[async_trait]
pub trait LedgerStore: DomainPort + HealthCheckable {
    async fn create_booking(&self, booking: Booking) -> Result<Booking, PortError>;

    /// Returns `PortError::NotFound` with entity type `"Booking"` when absent
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError>;

    async fn bookings_for_room(&self, room_id: RoomId) -> Result<Vec<Booking>, PortError>;

    /// Applies `mutation` to the booking under its lock.
    ///
    /// `journal`, when given, is appended to the room ledger in the same
    /// unit of work.
    async fn mutate_booking(
        &self,
        booking_id: BookingId,
        mutation: BookingMutation,
        journal: Option<RoomTransaction>,
    ) -> Result<Booking, PortError>;

    /// Returns `PortError::NotFound` with entity type `"Payment"` when absent
    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError>;

    /// Inserts or updates a payment without touching any booking.
    ///
    /// Used for PENDING and FAILED device payments. A payment already stored
    /// as COMPLETED or FAILED is never overwritten: `PortError::Conflict`.
    async fn save_payment(&self, payment: &Payment) -> Result<(), PortError>;

    /// Records a COMPLETED payment and applies it to its booking atomically.
    ///
    /// A payment is applied at most once: settling one whose stored copy is
    /// already terminal fails with `PortError::Conflict`.
    /// For a refund (`refunded_payment_id` set) the store rejects with
    /// `PortError::Conflict` when the refunds against the original would
    /// exceed the original amount. Returns the updated booking.
    async fn settle_payment(
        &self,
        payment: &Payment,
        journal: Option<RoomTransaction>,
    ) -> Result<Booking, PortError>;

    /// Active payments for a booking, most recent first
    async fn payment_history(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError>;

    async fn payment_statistics(
        &self,
        currency: Currency,
        recent_limit: usize,
    ) -> Result<PaymentStatistics, PortError>;

    /// FAILED payments plus PENDING ones created before `stale_before`
    async fn payments_needing_attention(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PortError>;

    /// Appends a room ledger line, assigning its running balance
    async fn append_transaction(
        &self,
        transaction: RoomTransaction,
    ) -> Result<RoomTransaction, PortError>;

    /// A room's transactions in append order
    async fn transactions_for_room(&self, room_id: RoomId) -> Result<Vec<RoomTransaction>, PortError>;

    async fn rooms_with_transactions(&self) -> Result<Vec<RoomId>, PortError>;
}

/// Checks a refund against what has already been refunded from `original`
pub fn ensure_refund_within_original(
    original: &Payment,
    prior_refunds: &[&Payment],
    refund: &Payment,
) -> Result<(), PortError> {
    let currency = original.amount.currency();
    let already = prior_refunds
        .iter()
        .filter(|p| p.is_completed() && p.is_active && p.id != refund.id)
        .try_fold(Money::zero(currency), |acc, p| acc.checked_add(&p.amount.abs()))
        .map_err(|e| PortError::validation(e.to_string()))?;
    let total = already
        .checked_add(&refund.amount.abs())
        .map_err(|e| PortError::validation(e.to_string()))?;

    if total.amount() > original.amount.amount() {
        return Err(PortError::conflict(format!(
            "refunds against payment {} would total {}, exceeding {}",
            original.id, total, original.amount
        )));
    }
    Ok(())
}

/// In-memory adapter
///
/// Keeps everything in maps guarded by `tokio::sync::RwLock`. Ledger units
/// of work additionally hold a per-booking `tokio::sync::Mutex`, dropped
/// from the lock table once no caller holds or waits on it.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Mutex, RwLock};

    use core_kernel::{AdapterHealth, HealthCheckResult};

    #[derive(Debug, Default)]
    pub struct InMemoryLedgerStore {
        bookings: RwLock<HashMap<BookingId, Booking>>,
        payments: RwLock<HashMap<PaymentId, Payment>>,
        transactions: RwLock<Vec<RoomTransaction>>,
        booking_locks: Mutex<HashMap<BookingId, Arc<Mutex<()>>>>,
        booking_writes: AtomicUsize,
        fail_settlements: AtomicBool,
        reject_ledger_applies: AtomicBool,
    }

    impl InMemoryLedgerStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-populates with bookings for testing
        pub async fn with_bookings(bookings: Vec<Booking>) -> Self {
            let store = Self::new();
            {
                let mut map = store.bookings.write().await;
                for booking in bookings {
                    map.insert(booking.id, booking);
                }
            }
            store
        }

        /// Number of booking writes since creation
        pub fn booking_write_count(&self) -> usize {
            self.booking_writes.load(Ordering::SeqCst)
        }

        /// Makes subsequent ledger units of work fail with a connection error
        pub fn set_fail_settlements(&self, fail: bool) {
            self.fail_settlements.store(fail, Ordering::SeqCst);
        }

        /// Makes subsequent `settle_payment` calls fail with a connection
        /// error while plain payment saves keep working
        pub fn set_reject_ledger_applies(&self, reject: bool) {
            self.reject_ledger_applies.store(reject, Ordering::SeqCst);
        }

        /// Bookings with a live entry in the lock table
        pub async fn tracked_lock_count(&self) -> usize {
            self.booking_locks.lock().await.len()
        }

        pub async fn payment_count(&self) -> usize {
            self.payments.read().await.len()
        }

        pub async fn all_payments(&self) -> Vec<Payment> {
            self.payments.read().await.values().cloned().collect()
        }

        async fn lock_for(&self, booking_id: BookingId) -> Arc<Mutex<()>> {
            let mut locks = self.booking_locks.lock().await;
            Arc::clone(locks.entry(booking_id).or_default())
        }

        async fn release_lock(&self, booking_id: BookingId, lock: Arc<Mutex<()>>) {
            let mut locks = self.booking_locks.lock().await;
            // Only the table and this handle remain
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&booking_id);
            }
        }

        async fn ensure_not_terminal(&self, payment_id: PaymentId) -> Result<(), PortError> {
            match self.payments.read().await.get(&payment_id) {
                Some(stored) if stored.status != PaymentStatus::Pending => Err(PortError::conflict(format!(
                    "payment {} is already in a terminal state",
                    payment_id
                ))),
                _ => Ok(()),
            }
        }

        fn check_available(&self) -> Result<(), PortError> {
            if self.fail_settlements.load(Ordering::SeqCst) {
                return Err(PortError::connection("in-memory store unavailable"));
            }
            Ok(())
        }

        async fn load_booking(&self, booking_id: BookingId) -> Result<Booking, PortError> {
            self.bookings
                .read()
                .await
                .get(&booking_id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Booking", booking_id))
        }

        async fn mutate_locked(
            &self,
            booking_id: BookingId,
            mutation: BookingMutation,
            journal: Option<RoomTransaction>,
        ) -> Result<Booking, PortError> {
            self.check_available()?;
            let mut booking = self.load_booking(booking_id).await?;
            mutation
                .apply(&mut booking)
                .map_err(|e| PortError::validation(e.to_string()))?;

            self.commit(booking.clone(), None, journal).await?;
            Ok(booking)
        }

        async fn save_locked(&self, payment: &Payment) -> Result<(), PortError> {
            self.check_available()?;
            if !self.bookings.read().await.contains_key(&payment.booking_id) {
                return Err(PortError::not_found("Booking", payment.booking_id));
            }
            self.ensure_not_terminal(payment.id).await?;
            self.payments.write().await.insert(payment.id, payment.clone());
            Ok(())
        }

        async fn settle_locked(
            &self,
            payment: &Payment,
            journal: Option<RoomTransaction>,
        ) -> Result<Booking, PortError> {
            self.check_available()?;
            if self.reject_ledger_applies.load(Ordering::SeqCst) {
                return Err(PortError::connection("in-memory ledger rejected the apply"));
            }
            let mut booking = self.load_booking(payment.booking_id).await?;
            self.ensure_not_terminal(payment.id).await?;
            // Yield between read and write so interleavings are exercised
            tokio::task::yield_now().await;

            if let Some(original_id) = payment.refunded_payment_id {
                let payments = self.payments.read().await;
                let original = payments
                    .get(&original_id)
                    .ok_or_else(|| PortError::not_found("Payment", original_id))?;
                let prior: Vec<&Payment> = payments
                    .values()
                    .filter(|p| p.refunded_payment_id == Some(original_id))
                    .collect();
                ensure_refund_within_original(original, &prior, payment)?;
            }

            booking
                .add_payment(payment.amount)
                .map_err(|e| PortError::validation(e.to_string()))?;

            self.commit(booking.clone(), Some(payment), journal).await?;
            Ok(booking)
        }

        async fn commit(
            &self,
            booking: Booking,
            payment: Option<&Payment>,
            journal: Option<RoomTransaction>,
        ) -> Result<(), PortError> {
            let mut transactions = self.transactions.write().await;
            let journal = journal
                .map(|line| stamp_running_balance(&transactions, line))
                .transpose()?;

            if let Some(payment) = payment {
                self.payments.write().await.insert(payment.id, payment.clone());
            }
            self.bookings.write().await.insert(booking.id, booking);
            self.booking_writes.fetch_add(1, Ordering::SeqCst);
            if let Some(line) = journal {
                transactions.push(line);
            }
            Ok(())
        }
    }

    fn stamp_running_balance(
        transactions: &[RoomTransaction],
        mut line: RoomTransaction,
    ) -> Result<RoomTransaction, PortError> {
        let balance = transactions
            .iter()
            .filter(|t| t.room_id == line.room_id)
            .try_fold(Money::zero(line.amount.currency()), |acc, t| {
                acc.checked_add(&t.signed_amount())
            })
            .and_then(|balance| balance.checked_add(&line.signed_amount()))
            .map_err(|e| PortError::validation(e.to_string()))?;
        line.running_balance = Some(balance);
        Ok(line)
    }

    impl DomainPort for InMemoryLedgerStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryLedgerStore {
        async fn health_check(&self) -> HealthCheckResult {
            let status = if self.fail_settlements.load(Ordering::SeqCst) {
                AdapterHealth::Unhealthy
            } else {
                AdapterHealth::Healthy
            };
            HealthCheckResult {
                adapter_id: "in-memory-ledger".to_string(),
                status,
                latency_ms: 0,
                message: None,
                checked_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for InMemoryLedgerStore {
        async fn create_booking(&self, booking: Booking) -> Result<Booking, PortError> {
            let mut bookings = self.bookings.write().await;
            if bookings.contains_key(&booking.id) {
                return Err(PortError::conflict(format!("booking {} already exists", booking.id)));
            }
            bookings.insert(booking.id, booking.clone());
            Ok(booking)
        }

        async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
            self.load_booking(id).await
        }

        async fn bookings_for_room(&self, room_id: RoomId) -> Result<Vec<Booking>, PortError> {
            let mut bookings: Vec<Booking> = self
                .bookings
                .read()
                .await
                .values()
                .filter(|b| b.room_id == room_id)
                .cloned()
                .collect();
            bookings.sort_by_key(|b| b.check_in_date);
            Ok(bookings)
        }

        async fn mutate_booking(
            &self,
            booking_id: BookingId,
            mutation: BookingMutation,
            journal: Option<RoomTransaction>,
        ) -> Result<Booking, PortError> {
            let lock = self.lock_for(booking_id).await;
            let result = {
                let _guard = lock.lock().await;
                self.mutate_locked(booking_id, mutation, journal).await
            };
            self.release_lock(booking_id, lock).await;
            result
        }

        async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
            self.payments
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Payment", id))
        }

        async fn save_payment(&self, payment: &Payment) -> Result<(), PortError> {
            let lock = self.lock_for(payment.booking_id).await;
            let result = {
                let _guard = lock.lock().await;
                self.save_locked(payment).await
            };
            self.release_lock(payment.booking_id, lock).await;
            result
        }

        async fn settle_payment(
            &self,
            payment: &Payment,
            journal: Option<RoomTransaction>,
        ) -> Result<Booking, PortError> {
            if payment.status != PaymentStatus::Completed {
                return Err(PortError::validation(format!(
                    "payment {} is {} and cannot be settled",
                    payment.id,
                    payment.status.code()
                )));
            }

            let lock = self.lock_for(payment.booking_id).await;
            let result = {
                let _guard = lock.lock().await;
                self.settle_locked(payment, journal).await
            };
            self.release_lock(payment.booking_id, lock).await;
            result
        }

        async fn payment_history(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
            let payments = self.payments.read().await;
            let mut history: Vec<&Payment> = payments
                .values()
                .filter(|p| p.booking_id == booking_id && p.is_active)
                .collect();
            sort_most_recent_first(&mut history);
            Ok(history.into_iter().cloned().collect())
        }

        async fn payment_statistics(
            &self,
            currency: Currency,
            recent_limit: usize,
        ) -> Result<PaymentStatistics, PortError> {
            let payments: Vec<Payment> = self.payments.read().await.values().cloned().collect();
            PaymentStatistics::from_payments(currency, &payments, recent_limit)
                .map_err(|e| PortError::transformation(e.to_string()))
        }

        async fn payments_needing_attention(
            &self,
            stale_before: DateTime<Utc>,
        ) -> Result<Vec<Payment>, PortError> {
            let payments = self.payments.read().await;
            let mut flagged: Vec<&Payment> = payments
                .values()
                .filter(|p| p.is_active)
                .filter(|p| match p.status {
                    PaymentStatus::Failed => true,
                    PaymentStatus::Pending => p.created_at < stale_before,
                    PaymentStatus::Completed => false,
                })
                .collect();
            sort_most_recent_first(&mut flagged);
            Ok(flagged.into_iter().cloned().collect())
        }

        async fn append_transaction(
            &self,
            transaction: RoomTransaction,
        ) -> Result<RoomTransaction, PortError> {
            let mut transactions = self.transactions.write().await;
            let line = stamp_running_balance(&transactions, transaction)?;
            transactions.push(line.clone());
            Ok(line)
        }

        async fn transactions_for_room(&self, room_id: RoomId) -> Result<Vec<RoomTransaction>, PortError> {
            Ok(self
                .transactions
                .read()
                .await
                .iter()
                .filter(|t| t.room_id == room_id)
                .cloned()
                .collect())
        }

        async fn rooms_with_transactions(&self) -> Result<Vec<RoomId>, PortError> {
            let mut rooms: Vec<RoomId> = Vec::new();
            for t in self.transactions.read().await.iter() {
                if !rooms.contains(&t.room_id) {
                    rooms.push(t.room_id);
                }
            }
            Ok(rooms)
        }
    }
}
