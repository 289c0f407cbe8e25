//! Ledger repository implementation
//!
//! Row-level access to `bookings`, `payments` and `room_transactions`.
//! Methods that take a `&mut PgConnection` run inside the caller's
//! transaction; the adapter composes them into units of work.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::DatabaseError;

const BOOKING_COLUMNS: &str = r#"
    booking_id, room_id, guest_id, room_label, guest_name,
    check_in_date, check_out_date, expected_check_out_date,
    nightly_rate, currency, payment_frequency,
    total_charges, total_payments, current_balance, payment_status,
    number_of_nights, booking_status, special_instructions, notes,
    is_active, created_at, updated_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    payment_id, booking_id, amount, currency, method, route, status,
    customer_email, description, processed_at, device_type, device_id,
    upp_transaction_id, stripe_payment_intent_id, metadata,
    refunded_payment_id, is_active, created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, room_id, description, amount, currency,
    transaction_type, category, paid_by, collected_by, running_balance,
    reference_number, notes, created_at
"#;

/// Signed contribution of a room transaction to the room balance
const SIGNED_AMOUNT: &str =
    "CASE WHEN transaction_type IN ('PAYMENT', 'DEPOSIT', 'REFUND') THEN -amount ELSE amount END";

/// Repository for the booking ledger tables
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DatabaseError> {
        Ok(self.pool.begin().await?)
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    pub async fn insert_booking(&self, row: &BookingRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, room_id, guest_id, room_label, guest_name,
                check_in_date, check_out_date, expected_check_out_date,
                nightly_rate, currency, payment_frequency,
                total_charges, total_payments, current_balance, payment_status,
                number_of_nights, booking_status, special_instructions, notes,
                is_active, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            "#,
        )
        .bind(row.booking_id)
        .bind(row.room_id)
        .bind(row.guest_id)
        .bind(&row.room_label)
        .bind(&row.guest_name)
        .bind(row.check_in_date)
        .bind(row.check_out_date)
        .bind(row.expected_check_out_date)
        .bind(row.nightly_rate)
        .bind(&row.currency)
        .bind(&row.payment_frequency)
        .bind(row.total_charges)
        .bind(row.total_payments)
        .bind(row.current_balance)
        .bind(&row.payment_status)
        .bind(row.number_of_nights)
        .bind(&row.booking_status)
        .bind(&row.special_instructions)
        .bind(&row.notes)
        .bind(row.is_active)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<BookingRow, DatabaseError> {
        let sql = format!("SELECT {} FROM bookings WHERE booking_id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Booking", booking_id))
    }

    /// Loads a booking and holds its row lock until the transaction ends
    pub async fn lock_booking(
        conn: &mut PgConnection,
        booking_id: Uuid,
    ) -> Result<BookingRow, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE booking_id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Booking", booking_id))
    }

    pub async fn bookings_for_room(&self, room_id: Uuid) -> Result<Vec<BookingRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE room_id = $1 ORDER BY check_in_date",
            BOOKING_COLUMNS
        );
        Ok(sqlx::query_as::<_, BookingRow>(&sql)
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Writes back the mutable part of a booking
    pub async fn update_booking(conn: &mut PgConnection, row: &BookingRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                total_charges = $2,
                total_payments = $3,
                current_balance = $4,
                payment_status = $5,
                check_out_date = $6,
                number_of_nights = $7,
                booking_status = $8,
                is_active = $9,
                updated_at = $10
            WHERE booking_id = $1
            "#,
        )
        .bind(row.booking_id)
        .bind(row.total_charges)
        .bind(row.total_payments)
        .bind(row.current_balance)
        .bind(&row.payment_status)
        .bind(row.check_out_date)
        .bind(row.number_of_nights)
        .bind(&row.booking_status)
        .bind(row.is_active)
        .bind(row.updated_at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Booking", row.booking_id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentRow, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE payment_id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))
    }

    pub async fn get_payment_in(
        conn: &mut PgConnection,
        payment_id: Uuid,
    ) -> Result<PaymentRow, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE payment_id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))
    }

    /// Refunds already recorded against `original_id`
    pub async fn refunds_of(
        conn: &mut PgConnection,
        original_id: Uuid,
    ) -> Result<Vec<PaymentRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE refunded_payment_id = $1",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(original_id)
            .fetch_all(conn)
            .await?)
    }

    /// Inserts a payment, or moves an existing PENDING one to its new state.
    ///
    /// Payments already in a terminal state are left untouched and reported
    /// as a conflict.
    pub async fn upsert_payment(conn: &mut PgConnection, row: &PaymentRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, booking_id, amount, currency, method, route, status,
                customer_email, description, processed_at, device_type, device_id,
                upp_transaction_id, stripe_payment_intent_id, metadata,
                refunded_payment_id, is_active, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (payment_id) DO UPDATE SET
                status = EXCLUDED.status,
                processed_at = EXCLUDED.processed_at,
                upp_transaction_id = EXCLUDED.upp_transaction_id,
                stripe_payment_intent_id = EXCLUDED.stripe_payment_intent_id,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            WHERE payments.status = 'PENDING'
            "#,
        )
        .bind(row.payment_id)
        .bind(row.booking_id)
        .bind(row.amount)
        .bind(&row.currency)
        .bind(&row.method)
        .bind(&row.route)
        .bind(&row.status)
        .bind(&row.customer_email)
        .bind(&row.description)
        .bind(row.processed_at)
        .bind(&row.device_type)
        .bind(&row.device_id)
        .bind(&row.upp_transaction_id)
        .bind(&row.stripe_payment_intent_id)
        .bind(&row.metadata)
        .bind(row.refunded_payment_id)
        .bind(row.is_active)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::DuplicateEntry(format!(
                "payment {} is already in a terminal state",
                row.payment_id
            )));
        }
        Ok(())
    }

    /// Active payments for a booking, most recent first
    pub async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE booking_id = $1 AND is_active \
             ORDER BY created_at DESC, payment_id DESC",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn recent_payments(&self, limit: i64) -> Result<Vec<PaymentRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE is_active \
             ORDER BY created_at DESC, payment_id DESC LIMIT $1",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Active payment counts grouped by status and method
    pub async fn payment_counts(&self) -> Result<Vec<PaymentCountRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PaymentCountRow>(
            r#"
            SELECT status, method, COUNT(*) AS count
            FROM payments
            WHERE is_active
            GROUP BY status, method
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Net amount of completed device-routed payments in `currency`
    pub async fn completed_device_total(&self, currency: &str) -> Result<Decimal, DatabaseError> {
        Ok(sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payments
            WHERE is_active AND status = 'COMPLETED' AND route = 'DEVICE' AND currency = $1
            "#,
        )
        .bind(currency)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn payments_needing_attention(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<PaymentRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE is_active AND (status = 'FAILED' OR (status = 'PENDING' AND created_at < $1)) \
             ORDER BY created_at DESC, payment_id DESC",
            PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Room transactions
    // ------------------------------------------------------------------

    /// Appends a room transaction, stamping its running balance.
    ///
    /// Appends to one room are serialized with a transaction-scoped
    /// advisory lock keyed on the room id.
    pub async fn append_transaction(
        conn: &mut PgConnection,
        row: &RoomTransactionRow,
    ) -> Result<Decimal, DatabaseError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(row.room_id)
            .execute(&mut *conn)
            .await?;

        let sql = format!(
            "SELECT COALESCE(SUM({}), 0) FROM room_transactions WHERE room_id = $1",
            SIGNED_AMOUNT
        );
        let prior: Decimal = sqlx::query_scalar(&sql)
            .bind(row.room_id)
            .fetch_one(&mut *conn)
            .await?;
        let running_balance = prior + signed(&row.transaction_type, row.amount);

        sqlx::query(
            r#"
            INSERT INTO room_transactions (
                transaction_id, room_id, description, amount, currency,
                transaction_type, category, paid_by, collected_by, running_balance,
                reference_number, notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.transaction_id)
        .bind(row.room_id)
        .bind(&row.description)
        .bind(row.amount)
        .bind(&row.currency)
        .bind(&row.transaction_type)
        .bind(&row.category)
        .bind(&row.paid_by)
        .bind(&row.collected_by)
        .bind(running_balance)
        .bind(&row.reference_number)
        .bind(&row.notes)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(running_balance)
    }

    /// A room's transactions in append order
    pub async fn transactions_for_room(&self, room_id: Uuid) -> Result<Vec<RoomTransactionRow>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM room_transactions WHERE room_id = $1 ORDER BY seq",
            TRANSACTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, RoomTransactionRow>(&sql)
            .bind(room_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn rooms_with_transactions(&self) -> Result<Vec<Uuid>, DatabaseError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            "SELECT room_id FROM room_transactions GROUP BY room_id ORDER BY MIN(seq)",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

fn signed(transaction_type: &str, amount: Decimal) -> Decimal {
    match transaction_type {
        "PAYMENT" | "DEPOSIT" | "REFUND" => -amount,
        _ => amount,
    }
}

/// Database row for a booking
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BookingRow {
    pub booking_id: Uuid,
    pub room_id: Uuid,
    pub guest_id: Uuid,
    pub room_label: Option<String>,
    pub guest_name: Option<String>,
    pub check_in_date: DateTime<Utc>,
    pub check_out_date: Option<DateTime<Utc>>,
    pub expected_check_out_date: Option<DateTime<Utc>>,
    pub nightly_rate: Decimal,
    pub currency: String,
    pub payment_frequency: String,
    pub total_charges: Decimal,
    pub total_payments: Decimal,
    pub current_balance: Decimal,
    pub payment_status: String,
    pub number_of_nights: i32,
    pub booking_status: String,
    pub special_instructions: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for a payment
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub route: String,
    pub status: String,
    pub customer_email: Option<String>,
    pub description: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub upp_transaction_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub refunded_payment_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for a room transaction
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RoomTransactionRow {
    pub transaction_id: Uuid,
    pub room_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: String,
    pub category: Option<String>,
    pub paid_by: Option<String>,
    pub collected_by: Option<String>,
    pub running_balance: Option<Decimal>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PaymentCountRow {
    pub status: String,
    pub method: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_amount_matches_sql_rule() {
        assert_eq!(signed("CHARGE", dec!(10)), dec!(10));
        assert_eq!(signed("FEE", dec!(5)), dec!(5));
        assert_eq!(signed("PAYMENT", dec!(10)), dec!(-10));
        assert_eq!(signed("DEPOSIT", dec!(10)), dec!(-10));
        assert_eq!(signed("REFUND", dec!(-10)), dec!(10));
    }
}
