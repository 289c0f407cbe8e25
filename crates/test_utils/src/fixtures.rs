//! Pre-built Test Fixtures
//!
//! Ready-to-use amounts, dates, and guest details. Names and emails come
//! from `fake` so that payment descriptions vary between runs.

use chrono::{DateTime, TimeZone, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{Currency, GuestId, Money, RoomId};
use domain_booking::{Booking, PaymentFrequency};

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    /// Standard nightly rate
    pub fn nightly_rate() -> Money {
        Self::usd(dec!(80.00))
    }

    pub fn usd_zero() -> Money {
        Money::zero(Currency::USD)
    }

    /// EUR amount for currency mismatch tests
    pub fn eur(amount: Decimal) -> Money {
        Money::new(amount, Currency::EUR)
    }
}

/// Fixture for guest-facing strings
pub struct GuestFixtures;

impl GuestFixtures {
    pub fn name() -> String {
        Name().fake()
    }

    pub fn email() -> String {
        SafeEmail().fake()
    }

    pub fn room_label() -> String {
        (100u16..450).fake::<u16>().to_string()
    }
}

/// Fixture for dates
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Fixed check-in (March 1, 2024)
    pub fn check_in() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Two weeks after [`TemporalFixtures::check_in`]
    pub fn expected_check_out() -> DateTime<Utc> {
        Self::check_in() + chrono::Duration::days(14)
    }
}

/// Fixture for bookings
pub struct BookingFixtures;

impl BookingFixtures {
    /// Active USD booking with an empty ledger
    pub fn checked_in() -> Booking {
        Self::in_room(RoomId::new())
    }

    pub fn in_room(room_id: RoomId) -> Booking {
        Booking::check_in(
            room_id,
            GuestId::new(),
            TemporalFixtures::check_in(),
            MoneyFixtures::nightly_rate(),
            PaymentFrequency::Daily,
        )
        .with_room_label(GuestFixtures::room_label())
        .with_guest_name(GuestFixtures::name())
        .with_expected_check_out(TemporalFixtures::expected_check_out())
    }

    /// Booking owing `charge` USD with nothing paid
    pub fn with_charge(charge: Decimal) -> Booking {
        let mut booking = Self::checked_in();
        if charge > Decimal::ZERO {
            booking
                .add_charge(MoneyFixtures::usd(charge))
                .expect("fixture charge is positive");
        }
        booking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_booking::{BookingStatus, LedgerStatus};

    #[test]
    fn test_checked_in_booking_is_empty() {
        let booking = BookingFixtures::checked_in();

        assert_eq!(booking.booking_status, BookingStatus::Active);
        assert!(booking.total_charges().is_zero());
        assert_eq!(booking.payment_status(), LedgerStatus::Pending);
        assert!(booking.guest_name.is_some());
    }

    #[test]
    fn test_with_charge_owes_the_charge() {
        let booking = BookingFixtures::with_charge(dec!(200));

        assert_eq!(booking.current_balance(), MoneyFixtures::usd(dec!(200)));
        assert_eq!(booking.currency(), Currency::USD);
    }

    #[test]
    fn test_guest_email_looks_like_an_email() {
        assert!(GuestFixtures::email().contains('@'));
    }
}
