//! Booking Domain - Ledger and Payment Core
//!
//! This crate owns the financial state of a room booking and the protocol
//! for moving money against it.
//!
//! # Booking Ledger
//!
//! Every booking keeps three running totals that are only ever changed
//! together:
//!
//! - `total_charges`: rent and fees accrued
//! - `total_payments`: settled money received (refunds reduce it)
//! - `current_balance = total_charges - total_payments`
//!
//! The booking's payment status is recomputed from those totals on every
//! mutation (see [`booking::derive_payment_status`]).
//!
//! # Payment Routing
//!
//! A payment instruction is either *traditional* (cash, card, transfer),
//! settled on submission, or *device-routed*, settled only after a
//! registered [`gateway::PaymentGateway`] confirms it. Only completed
//! payments reach the ledger.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_booking::{PaymentService, PaymentRequest, PaymentMethod};
//!
//! let service = PaymentService::new(store, gateways, PaymentServiceConfig::default());
//!
//! let result = service
//!     .process_payment(PaymentRequest::new(booking_id, dec!(50.00), PaymentMethod::Cash))
//!     .await;
//! assert!(result.success);
//! ```

pub mod booking;
pub mod payment;
pub mod transaction;
pub mod reconciliation;
pub mod gateway;
pub mod ports;
pub mod adapters;
pub mod service;
pub mod error;

pub use booking::{Booking, BookingMutation, BookingStatus, LedgerStatus, PaymentFrequency};
pub use payment::{Payment, PaymentMethod, PaymentRoute, PaymentStatus, PaymentResult};
pub use transaction::{RoomTransaction, RoomLedgerSummary, TransactionType, TransactionCategory};
pub use reconciliation::{ReconciliationReport, RoomBalanceService};
pub use gateway::{
    PaymentGateway, GatewayOutcome, GatewayRegistry, DeviceRegistration, SupportedCurrencies,
};
pub use ports::{LedgerStore, PaymentStatistics};
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::InMemoryLedgerStore;
pub use adapters::{UppHttpGateway, UppConfig};
pub use service::{PaymentService, PaymentServiceConfig, PaymentRequest};
pub use error::{BookingError, FailureKind};
