//! Core Kernel - Foundational types for the rental ledger
//!
//! This crate provides the building blocks shared by the booking domain and
//! its infrastructure:
//! - Money types with exact decimal arithmetic
//! - Strongly-typed identifiers for bookings, payments, rooms and guests
//! - Port infrastructure (errors, health checks) for swappable adapters

pub mod money;
pub mod identifiers;
pub mod error;
pub mod ports;

pub use money::{Money, Currency, MoneyError};
pub use identifiers::{BookingId, PaymentId, RoomId, GuestId, TransactionId};
pub use error::CoreError;
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth,
};
