//! Payment records
//!
//! A `Payment` is one money movement against one booking. Positive amounts
//! are money received, negative amounts are refunds. A payment leaves
//! `Pending` exactly once, to `Completed` or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use core_kernel::{BookingId, Money, PaymentId};
use crate::booking::Booking;
use crate::error::{BookingError, FailureKind};
use crate::gateway::GatewayOutcome;

/// How the payment was tendered.
///
/// The set is open: gateways can be registered for method codes that have
/// no dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    /// Universal Payment Protocol device
    UppDevice,
    Other(String),
}

impl PaymentMethod {
    pub const UPP_DEVICE: &'static str = "UPP_DEVICE";

    pub fn code(&self) -> &str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Transfer => "TRANSFER",
            PaymentMethod::UppDevice => Self::UPP_DEVICE,
            PaymentMethod::Other(code) => code,
        }
    }
}

impl From<String> for PaymentMethod {
    fn from(code: String) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "CASH" => PaymentMethod::Cash,
            "CARD" => PaymentMethod::Card,
            "TRANSFER" => PaymentMethod::Transfer,
            Self::UPP_DEVICE => PaymentMethod::UppDevice,
            other => PaymentMethod::Other(other.to_string()),
        }
    }
}

impl From<&str> for PaymentMethod {
    fn from(code: &str) -> Self {
        PaymentMethod::from(code.to_string())
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.code().to_string()
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Settlement route chosen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentRoute {
    /// Settled on submission
    Traditional,
    /// Settled by a device gateway
    Device,
}

impl PaymentRoute {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentRoute::Traditional => "TRADITIONAL",
            PaymentRoute::Device => "DEVICE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "TRADITIONAL" => Some(PaymentRoute::Traditional),
            "DEVICE" => Some(PaymentRoute::Device),
            _ => None,
        }
    }
}

/// A payment against a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Booking the money moves against
    pub booking_id: BookingId,
    /// Signed amount; negative for refunds
    pub amount: Money,
    pub method: PaymentMethod,
    pub route: PaymentRoute,
    pub status: PaymentStatus,
    pub customer_email: Option<String>,
    pub description: Option<String>,
    /// When the payment reached a terminal status
    pub processed_at: Option<DateTime<Utc>>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    /// Gateway transaction id
    pub upp_transaction_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    /// Opaque gateway-supplied details
    pub metadata: Option<Value>,
    /// Original payment, when this payment is a refund
    pub refunded_payment_id: Option<PaymentId>,
    /// Soft-delete flag
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for a booking
    pub fn new(booking: &Booking, amount: Money, method: PaymentMethod, route: PaymentRoute) -> Self {
        let now = Utc::now();

        Self {
            id: PaymentId::new_v7(),
            booking_id: booking.id,
            amount,
            method,
            route,
            status: PaymentStatus::Pending,
            customer_email: None,
            description: Some(format!("Payment for {}", booking.display_name())),
            processed_at: None,
            device_type: None,
            device_id: None,
            upp_transaction_id: None,
            stripe_payment_intent_id: None,
            metadata: None,
            refunded_payment_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds the completed inverse payment for `original`
    pub fn refund_of(original: &Payment, refund_amount: Money) -> Self {
        let now = Utc::now();
        let device_routed = original.route == PaymentRoute::Device;

        Self {
            id: PaymentId::new_v7(),
            booking_id: original.booking_id,
            amount: -refund_amount,
            method: original.method.clone(),
            route: original.route,
            status: PaymentStatus::Completed,
            customer_email: original.customer_email.clone(),
            description: Some(format!("Refund for payment #{}", original.id)),
            processed_at: Some(now),
            device_type: original.device_type.clone().filter(|_| device_routed),
            device_id: original.device_id.clone().filter(|_| device_routed),
            // Traceability convention, not a gateway-issued id
            upp_transaction_id: original
                .upp_transaction_id
                .as_ref()
                .filter(|_| device_routed)
                .map(|id| format!("{}_refund", id)),
            stripe_payment_intent_id: None,
            metadata: None,
            refunded_payment_id: Some(original.id),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_customer_email(mut self, email: Option<String>) -> Self {
        self.customer_email = email;
        self
    }

    pub fn with_device(mut self, device_type: Option<String>, device_id: Option<String>) -> Self {
        self.device_type = device_type;
        self.device_id = device_id;
        self
    }

    pub fn is_refund(&self) -> bool {
        self.amount.is_negative()
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    pub fn is_device_routed(&self) -> bool {
        self.route == PaymentRoute::Device
    }

    /// Marks a traditional payment settled
    pub fn complete(&mut self) -> Result<(), BookingError> {
        self.transition_to(PaymentStatus::Completed)
    }

    /// Marks a device payment settled and records the gateway's references
    pub fn complete_with_gateway(&mut self, outcome: &GatewayOutcome) -> Result<(), BookingError> {
        self.transition_to(PaymentStatus::Completed)?;
        let processed_at = outcome.processed_at.unwrap_or_else(Utc::now);
        self.processed_at = Some(processed_at);
        self.upp_transaction_id = outcome.transaction_id.clone();
        self.stripe_payment_intent_id = outcome.payment_intent_id.clone();
        self.metadata = Some(json!({
            "upp_device_type": self.device_type,
            "upp_device_id": self.device_id,
            "upp_risk_score": outcome.risk_score,
            "upp_processed_at": processed_at.to_rfc3339(),
        }));
        Ok(())
    }

    /// Marks the payment failed and records the reason
    pub fn fail(&mut self, reason: &str) -> Result<(), BookingError> {
        self.transition_to(PaymentStatus::Failed)?;
        self.metadata = Some(if self.is_device_routed() {
            json!({
                "upp_error": reason,
                "upp_device_type": self.device_type,
                "upp_device_id": self.device_id,
            })
        } else {
            json!({ "error": reason })
        });
        Ok(())
    }

    /// The failure reason recorded by [`Payment::fail`]
    pub fn failure_reason(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        metadata
            .get("upp_error")
            .or_else(|| metadata.get("error"))
            .and_then(Value::as_str)
    }

    fn transition_to(&mut self, target: PaymentStatus) -> Result<(), BookingError> {
        if self.status != PaymentStatus::Pending {
            return Err(BookingError::invalid_transition(self.status, target));
        }
        let now = Utc::now();
        self.status = target;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// Outcome of a payment or refund operation
///
/// Every failure crosses the service boundary as a value, never as a panic
/// or error return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    pub message: String,
    pub payment: Option<Payment>,
    pub failure: Option<FailureKind>,
}

impl PaymentResult {
    pub fn succeeded(message: impl Into<String>, payment: Payment) -> Self {
        Self {
            success: true,
            message: message.into(),
            payment: Some(payment),
            failure: None,
        }
    }

    pub fn failed(error: &BookingError, message: impl Into<String>, payment: Option<Payment>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payment,
            failure: Some(error.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::PaymentFrequency;
    use core_kernel::{Currency, GuestId, RoomId};
    use rust_decimal_macros::dec;

    fn booking() -> Booking {
        Booking::check_in(
            RoomId::new(),
            GuestId::new(),
            Utc::now(),
            Money::new(dec!(50), Currency::USD),
            PaymentFrequency::Daily,
        )
        .with_room_label("7")
        .with_guest_name("Ana Lima")
    }

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    #[test]
    fn test_method_codes_round_trip_through_strings() {
        assert_eq!(PaymentMethod::from("upp_device"), PaymentMethod::UppDevice);
        assert_eq!(PaymentMethod::from("CASH"), PaymentMethod::Cash);
        assert_eq!(
            PaymentMethod::from("crypto_wallet"),
            PaymentMethod::Other("CRYPTO_WALLET".to_string())
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::UppDevice).unwrap(),
            "\"UPP_DEVICE\""
        );
    }

    #[test]
    fn test_new_payment_description() {
        let payment = Payment::new(&booking(), usd(dec!(10)), PaymentMethod::Cash, PaymentRoute::Traditional);
        assert_eq!(payment.description.as_deref(), Some("Payment for Room 7 - Ana Lima"));
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut payment = Payment::new(&booking(), usd(dec!(10)), PaymentMethod::Cash, PaymentRoute::Traditional);
        payment.complete().unwrap();
        assert!(payment.processed_at.is_some());

        assert!(matches!(
            payment.fail("late failure"),
            Err(BookingError::InvalidStateTransition { .. })
        ));
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[test]
    fn test_device_failure_records_reason() {
        let mut payment = Payment::new(&booking(), usd(dec!(10)), PaymentMethod::UppDevice, PaymentRoute::Device)
            .with_device(Some("smartphone".into()), Some("dev-1".into()));
        payment.fail("Device offline").unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason(), Some("Device offline"));
        assert_eq!(payment.metadata.as_ref().unwrap()["upp_device_id"], "dev-1");
    }

    #[test]
    fn test_complete_with_gateway_records_references() {
        let mut payment = Payment::new(&booking(), usd(dec!(10)), PaymentMethod::UppDevice, PaymentRoute::Device)
            .with_device(Some("pos".into()), Some("t-9".into()));
        let outcome = GatewayOutcome::approved("upp_tx_1", Some("pi_123".into()), Some(12));

        payment.complete_with_gateway(&outcome).unwrap();
        assert_eq!(payment.upp_transaction_id.as_deref(), Some("upp_tx_1"));
        assert_eq!(payment.stripe_payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(payment.metadata.as_ref().unwrap()["upp_risk_score"], 12);
    }

    #[test]
    fn test_refund_of_device_payment_derives_transaction_id() {
        let mut original = Payment::new(&booking(), usd(dec!(100)), PaymentMethod::UppDevice, PaymentRoute::Device)
            .with_device(Some("pos".into()), Some("t-9".into()))
            .with_customer_email(Some("ana@example.com".into()));
        original
            .complete_with_gateway(&GatewayOutcome::approved("upp_tx_1", None, None))
            .unwrap();

        let refund = Payment::refund_of(&original, usd(dec!(25)));
        assert_eq!(refund.amount, usd(dec!(-25)));
        assert!(refund.is_refund());
        assert_eq!(refund.status, PaymentStatus::Completed);
        assert_eq!(refund.upp_transaction_id.as_deref(), Some("upp_tx_1_refund"));
        assert_eq!(refund.device_id.as_deref(), Some("t-9"));
        assert_eq!(refund.customer_email.as_deref(), Some("ana@example.com"));
        assert_eq!(refund.refunded_payment_id, Some(original.id));
        assert_eq!(
            refund.description,
            Some(format!("Refund for payment #{}", original.id))
        );
    }

    #[test]
    fn test_refund_of_cash_payment_has_no_device_fields() {
        let mut original = Payment::new(&booking(), usd(dec!(100)), PaymentMethod::Cash, PaymentRoute::Traditional);
        original.complete().unwrap();

        let refund = Payment::refund_of(&original, usd(dec!(100)));
        assert!(refund.upp_transaction_id.is_none());
        assert!(refund.device_type.is_none());
        assert_eq!(refund.method, PaymentMethod::Cash);
    }
}
