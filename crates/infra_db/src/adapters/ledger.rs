//! PostgreSQL Ledger Adapter
//!
//! Implements [`LedgerStore`] on top of [`LedgerRepository`]. Every ledger
//! unit of work runs in one database transaction that starts by taking the
//! booking's row lock (`SELECT ... FOR UPDATE`), so concurrent settlements
//! against one booking queue behind each other while other bookings
//! proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, instrument};

use core_kernel::{
    AdapterHealth, BookingId, Currency, DomainPort, GuestId, HealthCheckResult, HealthCheckable,
    Money, PaymentId, PortError, RoomId, TransactionId,
};
use domain_booking::ports::ensure_refund_within_original;
use domain_booking::{
    Booking, BookingMutation, BookingStatus, LedgerStatus, LedgerStore, Payment, PaymentFrequency,
    PaymentMethod, PaymentRoute, PaymentStatistics, PaymentStatus, RoomTransaction,
    TransactionCategory, TransactionType,
};

use crate::error::DatabaseError;
use crate::repositories::ledger::{BookingRow, LedgerRepository, PaymentRow, RoomTransactionRow};

/// PostgreSQL-backed implementation of [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    repository: LedgerRepository,
}

impl PostgresLedgerStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            repository: LedgerRepository::new(pool),
        }
    }

    pub fn repository(&self) -> &LedgerRepository {
        &self.repository
    }
}

impl DomainPort for PostgresLedgerStore {}

#[async_trait]
impl HealthCheckable for PostgresLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.repository.pool())
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
        };
        HealthCheckResult {
            adapter_id: "postgres-ledger".to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn create_booking(&self, booking: Booking) -> Result<Booking, PortError> {
        self.repository.insert_booking(&booking_to_row(&booking)).await?;
        debug!("Booking created");
        Ok(booking)
    }

    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
        row_to_booking(self.repository.get_booking(*id.as_uuid()).await?)
    }

    async fn bookings_for_room(&self, room_id: RoomId) -> Result<Vec<Booking>, PortError> {
        self.repository
            .bookings_for_room(*room_id.as_uuid())
            .await?
            .into_iter()
            .map(row_to_booking)
            .collect()
    }

    #[instrument(skip(self, journal))]
    async fn mutate_booking(
        &self,
        booking_id: BookingId,
        mutation: BookingMutation,
        journal: Option<RoomTransaction>,
    ) -> Result<Booking, PortError> {
        let mut tx = self.repository.begin().await?;

        let mut booking = row_to_booking(LedgerRepository::lock_booking(&mut tx, *booking_id.as_uuid()).await?)?;
        mutation
            .apply(&mut booking)
            .map_err(|e| PortError::validation(e.to_string()))?;

        LedgerRepository::update_booking(&mut tx, &booking_to_row(&booking)).await?;
        if let Some(line) = journal {
            LedgerRepository::append_transaction(&mut tx, &transaction_to_row(&line)).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(booking)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        row_to_payment(self.repository.get_payment(*id.as_uuid()).await?)
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id, status = payment.status.code()))]
    async fn save_payment(&self, payment: &Payment) -> Result<(), PortError> {
        let mut tx = self.repository.begin().await?;
        LedgerRepository::upsert_payment(&mut tx, &payment_to_row(payment)).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, payment, journal), fields(payment_id = %payment.id, booking_id = %payment.booking_id))]
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

        let mut tx = self.repository.begin().await?;
        let mut booking = row_to_booking(
            LedgerRepository::lock_booking(&mut tx, *payment.booking_id.as_uuid()).await?,
        )?;

        // Refunds of one original share its booking, so the booking lock
        // already serializes them.
        if let Some(original_id) = payment.refunded_payment_id {
            let original = row_to_payment(
                LedgerRepository::get_payment_in(&mut tx, *original_id.as_uuid()).await?,
            )?;
            let prior = LedgerRepository::refunds_of(&mut tx, *original_id.as_uuid())
                .await?
                .into_iter()
                .map(row_to_payment)
                .collect::<Result<Vec<_>, _>>()?;
            let prior: Vec<&Payment> = prior.iter().collect();
            ensure_refund_within_original(&original, &prior, payment)?;
        }

        booking
            .add_payment(payment.amount)
            .map_err(|e| PortError::validation(e.to_string()))?;

        LedgerRepository::upsert_payment(&mut tx, &payment_to_row(payment)).await?;
        LedgerRepository::update_booking(&mut tx, &booking_to_row(&booking)).await?;
        if let Some(line) = journal {
            LedgerRepository::append_transaction(&mut tx, &transaction_to_row(&line)).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        debug!(balance = %booking.current_balance(), "Payment settled");
        Ok(booking)
    }

    async fn payment_history(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
        self.repository
            .payments_for_booking(*booking_id.as_uuid())
            .await?
            .into_iter()
            .map(row_to_payment)
            .collect()
    }

    async fn payment_statistics(
        &self,
        currency: Currency,
        recent_limit: usize,
    ) -> Result<PaymentStatistics, PortError> {
        let mut stats = PaymentStatistics {
            pending_count: 0,
            completed_count: 0,
            failed_count: 0,
            by_method: BTreeMap::new(),
            completed_device_total: Money::zero(currency),
            recent_payments: Vec::new(),
        };

        for row in self.repository.payment_counts().await? {
            let count = u64::try_from(row.count).unwrap_or(0);
            match parse_code(&row.status, PaymentStatus::from_code)? {
                PaymentStatus::Pending => stats.pending_count += count,
                PaymentStatus::Completed => stats.completed_count += count,
                PaymentStatus::Failed => stats.failed_count += count,
            }
            *stats
                .by_method
                .entry(PaymentMethod::from(row.method).code().to_string())
                .or_insert(0) += count;
        }

        let total = self.repository.completed_device_total(currency.code()).await?;
        stats.completed_device_total = Money::new(total, currency);

        let limit = i64::try_from(recent_limit).unwrap_or(i64::MAX);
        stats.recent_payments = self
            .repository
            .recent_payments(limit)
            .await?
            .into_iter()
            .map(row_to_payment)
            .collect::<Result<_, _>>()?;
        Ok(stats)
    }

    async fn payments_needing_attention(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PortError> {
        self.repository
            .payments_needing_attention(stale_before)
            .await?
            .into_iter()
            .map(row_to_payment)
            .collect()
    }

    async fn append_transaction(
        &self,
        transaction: RoomTransaction,
    ) -> Result<RoomTransaction, PortError> {
        let mut tx = self.repository.begin().await?;
        let balance = LedgerRepository::append_transaction(&mut tx, &transaction_to_row(&transaction)).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        let currency = transaction.amount.currency();
        Ok(RoomTransaction {
            running_balance: Some(Money::new(balance, currency)),
            ..transaction
        })
    }

    async fn transactions_for_room(&self, room_id: RoomId) -> Result<Vec<RoomTransaction>, PortError> {
        self.repository
            .transactions_for_room(*room_id.as_uuid())
            .await?
            .into_iter()
            .map(row_to_transaction)
            .collect()
    }

    async fn rooms_with_transactions(&self) -> Result<Vec<RoomId>, PortError> {
        Ok(self
            .repository
            .rooms_with_transactions()
            .await?
            .into_iter()
            .map(RoomId::from_uuid)
            .collect())
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn parse_code<T>(code: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, PortError> {
    parse(code).ok_or_else(|| PortError::transformation(format!("unknown stored code '{}'", code)))
}

fn parse_currency(code: &str) -> Result<Currency, PortError> {
    Currency::from_str(code).map_err(|e| PortError::transformation(e.to_string()))
}

fn booking_to_row(booking: &Booking) -> BookingRow {
    BookingRow {
        booking_id: *booking.id.as_uuid(),
        room_id: *booking.room_id.as_uuid(),
        guest_id: *booking.guest_id.as_uuid(),
        room_label: booking.room_label.clone(),
        guest_name: booking.guest_name.clone(),
        check_in_date: booking.check_in_date,
        check_out_date: booking.check_out_date,
        expected_check_out_date: booking.expected_check_out_date,
        nightly_rate: booking.nightly_rate.amount(),
        currency: booking.currency().code().to_string(),
        payment_frequency: booking.payment_frequency.code().to_string(),
        total_charges: booking.total_charges().amount(),
        total_payments: booking.total_payments().amount(),
        current_balance: booking.current_balance().amount(),
        payment_status: booking.payment_status().code().to_string(),
        number_of_nights: i32::try_from(booking.number_of_nights).unwrap_or(i32::MAX),
        booking_status: booking.booking_status.code().to_string(),
        special_instructions: booking.special_instructions.clone(),
        notes: booking.notes.clone(),
        is_active: booking.is_active,
        created_at: booking.created_at,
        updated_at: booking.updated_at,
    }
}

fn row_to_booking(row: BookingRow) -> Result<Booking, PortError> {
    let currency = parse_currency(&row.currency)?;
    let frequency = parse_code(&row.payment_frequency, PaymentFrequency::from_code)?;
    let status = parse_code(&row.payment_status, LedgerStatus::from_code)?;
    let booking_status = parse_code(&row.booking_status, BookingStatus::from_code)?;

    let mut booking = Booking::check_in(
        RoomId::from_uuid(row.room_id),
        GuestId::from_uuid(row.guest_id),
        row.check_in_date,
        Money::new(row.nightly_rate, currency),
        frequency,
    )
    .restore_ledger(
        Money::new(row.total_charges, currency),
        Money::new(row.total_payments, currency),
        status,
    )
    .map_err(|e| PortError::transformation(e.to_string()))?;

    booking.id = BookingId::from_uuid(row.booking_id);
    booking.room_label = row.room_label;
    booking.guest_name = row.guest_name;
    booking.check_out_date = row.check_out_date;
    booking.expected_check_out_date = row.expected_check_out_date;
    booking.number_of_nights = u32::try_from(row.number_of_nights).unwrap_or(0);
    booking.booking_status = booking_status;
    booking.special_instructions = row.special_instructions;
    booking.notes = row.notes;
    booking.is_active = row.is_active;
    booking.created_at = row.created_at;
    booking.updated_at = row.updated_at;
    Ok(booking)
}

fn payment_to_row(payment: &Payment) -> PaymentRow {
    PaymentRow {
        payment_id: *payment.id.as_uuid(),
        booking_id: *payment.booking_id.as_uuid(),
        amount: payment.amount.amount(),
        currency: payment.amount.currency().code().to_string(),
        method: payment.method.code().to_string(),
        route: payment.route.code().to_string(),
        status: payment.status.code().to_string(),
        customer_email: payment.customer_email.clone(),
        description: payment.description.clone(),
        processed_at: payment.processed_at,
        device_type: payment.device_type.clone(),
        device_id: payment.device_id.clone(),
        upp_transaction_id: payment.upp_transaction_id.clone(),
        stripe_payment_intent_id: payment.stripe_payment_intent_id.clone(),
        metadata: payment.metadata.clone(),
        refunded_payment_id: payment.refunded_payment_id.map(|id| *id.as_uuid()),
        is_active: payment.is_active,
        created_at: payment.created_at,
        updated_at: payment.updated_at,
    }
}

fn row_to_payment(row: PaymentRow) -> Result<Payment, PortError> {
    let currency = parse_currency(&row.currency)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.payment_id),
        booking_id: BookingId::from_uuid(row.booking_id),
        amount: Money::new(row.amount, currency),
        method: PaymentMethod::from(row.method),
        route: parse_code(&row.route, PaymentRoute::from_code)?,
        status: parse_code(&row.status, PaymentStatus::from_code)?,
        customer_email: row.customer_email,
        description: row.description,
        processed_at: row.processed_at,
        device_type: row.device_type,
        device_id: row.device_id,
        upp_transaction_id: row.upp_transaction_id,
        stripe_payment_intent_id: row.stripe_payment_intent_id,
        metadata: row.metadata,
        refunded_payment_id: row.refunded_payment_id.map(PaymentId::from_uuid),
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn transaction_to_row(line: &RoomTransaction) -> RoomTransactionRow {
    RoomTransactionRow {
        transaction_id: *line.id.as_uuid(),
        room_id: *line.room_id.as_uuid(),
        description: line.description.clone(),
        amount: line.amount.amount(),
        currency: line.amount.currency().code().to_string(),
        transaction_type: line.transaction_type.code().to_string(),
        category: line.category.map(|c| c.code().to_string()),
        paid_by: line.paid_by.clone(),
        collected_by: line.collected_by.clone(),
        running_balance: line.running_balance.map(|b| b.amount()),
        reference_number: line.reference_number.clone(),
        notes: line.notes.clone(),
        created_at: line.created_at,
    }
}

fn row_to_transaction(row: RoomTransactionRow) -> Result<RoomTransaction, PortError> {
    let currency = parse_currency(&row.currency)?;
    Ok(RoomTransaction {
        id: TransactionId::from_uuid(row.transaction_id),
        room_id: RoomId::from_uuid(row.room_id),
        description: row.description,
        amount: Money::new(row.amount, currency),
        transaction_type: parse_code(&row.transaction_type, TransactionType::from_code)?,
        category: row
            .category
            .as_deref()
            .map(|c| parse_code(c, TransactionCategory::from_code))
            .transpose()?,
        paid_by: row.paid_by,
        collected_by: row.collected_by,
        running_balance: row.running_balance.map(|b| Money::new(b, currency)),
        reference_number: row.reference_number,
        notes: row.notes,
        created_at: row.created_at,
    })
}
