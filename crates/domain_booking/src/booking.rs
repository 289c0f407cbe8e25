//! Booking ledger
//!
//! A `Booking` is one guest's occupancy of one room together with its
//! running financial state. The ledger totals are private: they change only
//! through [`Booking::add_charge`] and [`Booking::add_payment`], which always
//! recompute the balance and payment status in the same step.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{BookingId, Currency, GuestId, Money, RoomId};
use crate::error::BookingError;

/// Occupancy lifecycle of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn code(&self) -> &'static str {
        match self {
            BookingStatus::Active => "ACTIVE",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ACTIVE" => Some(BookingStatus::Active),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// Payment standing of a booking's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// Balance owed and nothing paid yet
    Pending,
    /// Balance owed after at least one payment
    Partial,
    /// Nothing owed
    Paid,
    /// Flagged by the overdue sweep
    Overdue,
}

impl LedgerStatus {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDING",
            LedgerStatus::Partial => "PARTIAL",
            LedgerStatus::Paid => "PAID",
            LedgerStatus::Overdue => "OVERDUE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(LedgerStatus::Pending),
            "PARTIAL" => Some(LedgerStatus::Partial),
            "PAID" => Some(LedgerStatus::Paid),
            "OVERDUE" => Some(LedgerStatus::Overdue),
            _ => None,
        }
    }
}

/// How often rent is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl PaymentFrequency {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentFrequency::Daily => "DAILY",
            PaymentFrequency::Weekly => "WEEKLY",
            PaymentFrequency::Monthly => "MONTHLY",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DAILY" => Some(PaymentFrequency::Daily),
            "WEEKLY" => Some(PaymentFrequency::Weekly),
            "MONTHLY" => Some(PaymentFrequency::Monthly),
            _ => None,
        }
    }

    /// Human readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentFrequency::Daily => "Daily",
            PaymentFrequency::Weekly => "Weekly",
            PaymentFrequency::Monthly => "Monthly",
        }
    }
}

/// Derives the ledger status from the payment total and balance.
///
/// This is the only place the PENDING/PARTIAL/PAID rule lives. OVERDUE is
/// never produced here.
pub fn derive_payment_status(total_payments: &Money, current_balance: &Money) -> LedgerStatus {
    if !current_balance.is_positive() {
        LedgerStatus::Paid
    } else if total_payments.is_positive() {
        LedgerStatus::Partial
    } else {
        LedgerStatus::Pending
    }
}

/// A booking and its ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier
    pub id: BookingId,
    /// Occupied room
    pub room_id: RoomId,
    /// Guest who owes the balance
    pub guest_id: GuestId,
    /// Room number or label used in payment descriptions
    pub room_label: Option<String>,
    /// Guest display name used in payment descriptions
    pub guest_name: Option<String>,
    pub check_in_date: DateTime<Utc>,
    /// Set at check-out
    pub check_out_date: Option<DateTime<Utc>>,
    pub expected_check_out_date: Option<DateTime<Utc>>,
    /// Rent per night; its currency is the booking's currency
    pub nightly_rate: Money,
    pub payment_frequency: PaymentFrequency,
    total_charges: Money,
    total_payments: Money,
    current_balance: Money,
    payment_status: LedgerStatus,
    pub number_of_nights: u32,
    pub booking_status: BookingStatus,
    pub special_instructions: Option<String>,
    pub notes: Option<String>,
    /// Soft-delete flag
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Opens a booking at check-in with an empty ledger
    pub fn check_in(
        room_id: RoomId,
        guest_id: GuestId,
        check_in_date: DateTime<Utc>,
        nightly_rate: Money,
        payment_frequency: PaymentFrequency,
    ) -> Self {
        let now = Utc::now();
        let currency = nightly_rate.currency();

        Self {
            id: BookingId::new_v7(),
            room_id,
            guest_id,
            room_label: None,
            guest_name: None,
            check_in_date,
            check_out_date: None,
            expected_check_out_date: None,
            nightly_rate,
            payment_frequency,
            total_charges: Money::zero(currency),
            total_payments: Money::zero(currency),
            current_balance: Money::zero(currency),
            payment_status: LedgerStatus::Pending,
            number_of_nights: 0,
            booking_status: BookingStatus::Active,
            special_instructions: None,
            notes: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_room_label(mut self, label: impl Into<String>) -> Self {
        self.room_label = Some(label.into());
        self
    }

    pub fn with_guest_name(mut self, name: impl Into<String>) -> Self {
        self.guest_name = Some(name.into());
        self
    }

    pub fn with_expected_check_out(mut self, date: DateTime<Utc>) -> Self {
        self.expected_check_out_date = Some(date);
        self
    }

    /// Rebuilds the ledger from persisted totals.
    ///
    /// The balance is recomputed rather than trusted; a stored OVERDUE flag
    /// survives only while money is still owed.
    pub fn restore_ledger(
        mut self,
        total_charges: Money,
        total_payments: Money,
        stored_status: LedgerStatus,
    ) -> Result<Self, BookingError> {
        self.current_balance = total_charges.checked_sub(&total_payments)?;
        self.total_charges = total_charges;
        self.total_payments = total_payments;
        self.payment_status = stored_status;
        self.recompute();
        Ok(self)
    }

    pub fn currency(&self) -> Currency {
        self.nightly_rate.currency()
    }

    pub fn total_charges(&self) -> Money {
        self.total_charges
    }

    pub fn total_payments(&self) -> Money {
        self.total_payments
    }

    /// Raw balance; negative when the guest is in credit
    pub fn current_balance(&self) -> Money {
        self.current_balance
    }

    /// Balance for display, never below zero
    pub fn display_balance(&self) -> Money {
        self.current_balance.clamp_non_negative()
    }

    pub fn payment_status(&self) -> LedgerStatus {
        self.payment_status
    }

    pub fn is_overdue(&self) -> bool {
        self.payment_status == LedgerStatus::Overdue
    }

    /// Accrues a charge against the booking
    pub fn add_charge(&mut self, amount: Money) -> Result<(), BookingError> {
        if !amount.is_positive() {
            return Err(BookingError::invalid_amount(format!(
                "charge must be positive, got {}",
                amount
            )));
        }
        let total_charges = self.total_charges.checked_add(&amount)?;
        let current_balance = total_charges.checked_sub(&self.total_payments)?;

        self.total_charges = total_charges;
        self.current_balance = current_balance;
        self.recompute();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a settled payment; a negative amount is a refund
    pub fn add_payment(&mut self, amount: Money) -> Result<(), BookingError> {
        if amount.is_zero() {
            return Err(BookingError::invalid_amount("payment amount cannot be zero"));
        }
        let total_payments = self.total_payments.checked_add(&amount)?;
        let current_balance = self.total_charges.checked_sub(&total_payments)?;

        self.total_payments = total_payments;
        self.current_balance = current_balance;
        self.recompute();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Charges `nights` at the nightly rate
    pub fn charge_nights(&mut self, nights: u32) -> Result<Money, BookingError> {
        if nights == 0 {
            return Err(BookingError::invalid_amount("cannot charge zero nights"));
        }
        let charge = self.nightly_rate.checked_mul(Decimal::from(nights))?;
        self.add_charge(charge)?;
        Ok(charge)
    }

    /// Whole nights from check-in to check-out, or to `now` while occupied
    pub fn calculate_nights(&mut self, now: DateTime<Utc>) -> u32 {
        let end = self.check_out_date.unwrap_or(now);
        let days = (end - self.check_in_date).num_days().max(0);
        self.number_of_nights = u32::try_from(days).unwrap_or(u32::MAX);
        self.number_of_nights
    }

    /// Flags the booking as overdue; only meaningful while money is owed
    pub fn mark_overdue(&mut self) -> Result<(), BookingError> {
        if !self.current_balance.is_positive() {
            return Err(BookingError::invalid_transition(
                self.payment_status,
                LedgerStatus::Overdue,
            ));
        }
        self.payment_status = LedgerStatus::Overdue;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn check_out(&mut self, at: DateTime<Utc>) -> Result<(), BookingError> {
        self.transition_to(BookingStatus::Completed)?;
        self.check_out_date = Some(at);
        self.calculate_nights(at);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), BookingError> {
        self.transition_to(BookingStatus::Cancelled)
    }

    /// Soft-deletes the booking
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// `"Room 12 - Jane Doe"`, falling back to the booking id
    pub fn display_name(&self) -> String {
        match (&self.room_label, &self.guest_name) {
            (Some(room), Some(guest)) => format!("Room {} - {}", room, guest),
            (Some(room), None) => format!("Room {}", room),
            _ => self.id.to_string(),
        }
    }

    fn transition_to(&mut self, target: BookingStatus) -> Result<(), BookingError> {
        if self.booking_status != BookingStatus::Active {
            return Err(BookingError::invalid_transition(self.booking_status, target));
        }
        self.booking_status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn recompute(&mut self) {
        let derived = derive_payment_status(&self.total_payments, &self.current_balance);
        // OVERDUE sticks until the balance is cleared
        if !(self.payment_status == LedgerStatus::Overdue && derived != LedgerStatus::Paid) {
            self.payment_status = derived;
        }
    }
}

/// A ledger mutation applied by the store under the booking's lock
#[derive(Debug, Clone, PartialEq)]
pub enum BookingMutation {
    AddCharge(Money),
    MarkOverdue,
    CheckOut(DateTime<Utc>),
    Cancel,
    Deactivate,
}

impl BookingMutation {
    pub fn apply(&self, booking: &mut Booking) -> Result<(), BookingError> {
        match self {
            BookingMutation::AddCharge(amount) => booking.add_charge(*amount),
            BookingMutation::MarkOverdue => booking.mark_overdue(),
            BookingMutation::CheckOut(at) => booking.check_out(*at),
            BookingMutation::Cancel => booking.cancel(),
            BookingMutation::Deactivate => {
                booking.deactivate();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn booking() -> Booking {
        Booking::check_in(
            RoomId::new(),
            GuestId::new(),
            Utc::now(),
            usd(dec!(40.00)),
            PaymentFrequency::Weekly,
        )
    }

    #[test]
    fn test_new_booking_has_empty_ledger() {
        let b = booking();
        assert!(b.total_charges().is_zero());
        assert!(b.total_payments().is_zero());
        assert!(b.current_balance().is_zero());
        assert_eq!(b.payment_status(), LedgerStatus::Pending);
        assert_eq!(b.booking_status, BookingStatus::Active);
    }

    #[test]
    fn test_partial_then_paid() {
        let mut b = booking();
        b.add_charge(usd(dec!(200.00))).unwrap();
        assert_eq!(b.payment_status(), LedgerStatus::Pending);

        b.add_payment(usd(dec!(50.00))).unwrap();
        assert_eq!(b.current_balance(), usd(dec!(150.00)));
        assert_eq!(b.payment_status(), LedgerStatus::Partial);

        b.add_payment(usd(dec!(150.00))).unwrap();
        assert_eq!(b.current_balance(), usd(dec!(0.00)));
        assert_eq!(b.payment_status(), LedgerStatus::Paid);
    }

    #[test]
    fn test_non_positive_charge_rejected() {
        let mut b = booking();
        assert!(matches!(b.add_charge(usd(dec!(0))), Err(BookingError::InvalidAmount(_))));
        assert!(matches!(b.add_charge(usd(dec!(-5))), Err(BookingError::InvalidAmount(_))));
        assert!(b.total_charges().is_zero());
    }

    #[test]
    fn test_charge_in_other_currency_rejected() {
        let mut b = booking();
        let result = b.add_charge(Money::new(dec!(10), Currency::EUR));
        assert!(matches!(result, Err(BookingError::Money(_))));
        assert!(b.total_charges().is_zero());
    }

    #[test]
    fn test_refund_moves_status_back_to_partial() {
        let mut b = booking();
        b.add_charge(usd(dec!(100))).unwrap();
        b.add_payment(usd(dec!(100))).unwrap();
        assert_eq!(b.payment_status(), LedgerStatus::Paid);

        b.add_payment(usd(dec!(-25))).unwrap();
        assert_eq!(b.total_payments(), usd(dec!(75)));
        assert_eq!(b.current_balance(), usd(dec!(25)));
        assert_eq!(b.payment_status(), LedgerStatus::Partial);
    }

    #[test]
    fn test_overpayment_keeps_raw_negative_balance() {
        let mut b = booking();
        b.add_charge(usd(dec!(30))).unwrap();
        b.add_payment(usd(dec!(50))).unwrap();
        assert_eq!(b.current_balance(), usd(dec!(-20)));
        assert!(b.display_balance().is_zero());
        assert_eq!(b.payment_status(), LedgerStatus::Paid);
    }

    #[test]
    fn test_overdue_survives_partial_payment() {
        let mut b = booking();
        b.add_charge(usd(dec!(100))).unwrap();
        b.mark_overdue().unwrap();

        b.add_payment(usd(dec!(40))).unwrap();
        assert_eq!(b.payment_status(), LedgerStatus::Overdue);

        b.add_payment(usd(dec!(60))).unwrap();
        assert_eq!(b.payment_status(), LedgerStatus::Paid);
    }

    #[test]
    fn test_cannot_mark_paid_booking_overdue() {
        let mut b = booking();
        assert!(b.mark_overdue().is_err());
        assert_eq!(b.payment_status(), LedgerStatus::Pending);
    }

    #[test]
    fn test_charge_nights_uses_nightly_rate() {
        let mut b = booking();
        let charged = b.charge_nights(7).unwrap();
        assert_eq!(charged, usd(dec!(280.00)));
        assert_eq!(b.total_charges(), usd(dec!(280.00)));
    }

    #[test]
    fn test_calculate_nights_open_and_closed() {
        let mut b = booking();
        let now = b.check_in_date + Duration::days(3) + Duration::hours(5);
        assert_eq!(b.calculate_nights(now), 3);

        b.check_out(b.check_in_date + Duration::days(5)).unwrap();
        assert_eq!(b.number_of_nights, 5);
        assert_eq!(b.booking_status, BookingStatus::Completed);
    }

    #[test]
    fn test_cannot_cancel_completed_booking() {
        let mut b = booking();
        b.check_out(Utc::now()).unwrap();
        assert!(matches!(
            b.cancel(),
            Err(BookingError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_restore_ledger_recomputes_balance() {
        let b = booking()
            .restore_ledger(usd(dec!(300)), usd(dec!(120)), LedgerStatus::Overdue)
            .unwrap();
        assert_eq!(b.current_balance(), usd(dec!(180)));
        assert_eq!(b.payment_status(), LedgerStatus::Overdue);

        let settled = booking()
            .restore_ledger(usd(dec!(300)), usd(dec!(300)), LedgerStatus::Overdue)
            .unwrap();
        assert_eq!(settled.payment_status(), LedgerStatus::Paid);
    }

    #[test]
    fn test_display_name() {
        let b = booking().with_room_label("12").with_guest_name("Jane Doe");
        assert_eq!(b.display_name(), "Room 12 - Jane Doe");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Charge(i64),
        Pay(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..5_000_000).prop_map(Op::Charge),
            (-5_000_000i64..5_000_000)
                .prop_filter("non-zero", |v| *v != 0)
                .prop_map(Op::Pay),
        ]
    }

    proptest! {
        #[test]
        fn balance_always_equals_charges_minus_payments(ops in prop::collection::vec(op(), 1..40)) {
            let mut b = Booking::check_in(
                RoomId::new(),
                GuestId::new(),
                Utc::now(),
                Money::from_minor(5000, Currency::USD),
                PaymentFrequency::Daily,
            );

            for op in ops {
                match op {
                    Op::Charge(cents) => b.add_charge(Money::from_minor(cents, Currency::USD)).unwrap(),
                    Op::Pay(cents) => b.add_payment(Money::from_minor(cents, Currency::USD)).unwrap(),
                }
                let expected = b.total_charges().checked_sub(&b.total_payments()).unwrap();
                prop_assert_eq!(b.current_balance(), expected);
                prop_assert_eq!(
                    b.payment_status(),
                    derive_payment_status(&b.total_payments(), &b.current_balance())
                );
            }
        }
    }
}
