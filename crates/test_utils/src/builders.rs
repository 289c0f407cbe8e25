//! Test Data Builders
//!
//! Builds bookings whose ledger already holds charges and payments, so
//! tests only spell out the totals they care about.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use core_kernel::{GuestId, Money, RoomId};
use domain_booking::{Booking, BookingStatus, PaymentFrequency};

use crate::fixtures::{GuestFixtures, MoneyFixtures, TemporalFixtures};

/// Builder for constructing test bookings
pub struct TestBookingBuilder {
    room_id: RoomId,
    guest_id: GuestId,
    guest_name: Option<String>,
    room_label: Option<String>,
    check_in: DateTime<Utc>,
    nightly_rate: Money,
    frequency: PaymentFrequency,
    charges: Vec<Decimal>,
    payments: Vec<Decimal>,
    overdue: bool,
    status: BookingStatus,
    active: bool,
}

impl Default for TestBookingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBookingBuilder {
    pub fn new() -> Self {
        Self {
            room_id: RoomId::new(),
            guest_id: GuestId::new(),
            guest_name: Some(GuestFixtures::name()),
            room_label: Some(GuestFixtures::room_label()),
            check_in: TemporalFixtures::check_in(),
            nightly_rate: MoneyFixtures::nightly_rate(),
            frequency: PaymentFrequency::Daily,
            charges: Vec::new(),
            payments: Vec::new(),
            overdue: false,
            status: BookingStatus::Active,
            active: true,
        }
    }

    pub fn in_room(mut self, room_id: RoomId) -> Self {
        self.room_id = room_id;
        self
    }

    pub fn for_guest(mut self, guest_id: GuestId) -> Self {
        self.guest_id = guest_id;
        self
    }

    pub fn with_guest_name(mut self, name: impl Into<String>) -> Self {
        self.guest_name = Some(name.into());
        self
    }

    pub fn without_guest_name(mut self) -> Self {
        self.guest_name = None;
        self
    }

    pub fn with_room_label(mut self, label: impl Into<String>) -> Self {
        self.room_label = Some(label.into());
        self
    }

    pub fn checked_in_at(mut self, at: DateTime<Utc>) -> Self {
        self.check_in = at;
        self
    }

    /// Sets the nightly rate; its currency becomes the booking currency
    pub fn with_nightly_rate(mut self, rate: Money) -> Self {
        self.nightly_rate = rate;
        self
    }

    pub fn with_frequency(mut self, frequency: PaymentFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Adds a charge in the booking currency
    pub fn with_charge(mut self, amount: Decimal) -> Self {
        self.charges.push(amount);
        self
    }

    /// Adds a settled payment in the booking currency
    pub fn with_payment(mut self, amount: Decimal) -> Self {
        self.payments.push(amount);
        self
    }

    pub fn overdue(mut self) -> Self {
        self.overdue = true;
        self
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Builds the booking.
    ///
    /// # Panics
    ///
    /// Panics if a seeded amount is rejected by the ledger.
    pub fn build(self) -> Booking {
        let currency = self.nightly_rate.currency();
        let mut booking = Booking::check_in(
            self.room_id,
            self.guest_id,
            self.check_in,
            self.nightly_rate,
            self.frequency,
        );
        booking.guest_name = self.guest_name;
        booking.room_label = self.room_label;

        for charge in self.charges {
            booking
                .add_charge(Money::new(charge, currency))
                .expect("seeded charge must be accepted");
        }
        for payment in self.payments {
            booking
                .add_payment(Money::new(payment, currency))
                .expect("seeded payment must be accepted");
        }
        if self.overdue {
            booking.mark_overdue().expect("overdue needs an owed balance");
        }

        booking.booking_status = self.status;
        booking.is_active = self.active;
        booking
    }
}
