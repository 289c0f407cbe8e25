//! Payment service
//!
//! Entry point for moving money against bookings. Routing follows one
//! state machine:
//!
//! ```text
//! RECEIVED ──▶ ROUTE_TRADITIONAL ─────────────────────────▶ APPLYING ──▶ COMPLETED
//!    │                                                          ▲
//!    └──────▶ ROUTE_DEVICE ──▶ save PENDING ──▶ gateway call ───┘
//!                                                   │
//!                                                   └──────────────────▶ FAILED
//! ```
//!
//! The gateway call happens before, and outside of, the store's unit of
//! work. APPLYING is a single [`LedgerStore::settle_payment`] call that
//! records the payment's terminal status and the booking's new totals
//! together. Every outcome is returned as a [`PaymentResult`].

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use core_kernel::{BookingId, Currency, Money, PaymentId};

use crate::booking::{Booking, BookingMutation};
use crate::error::BookingError;
use crate::gateway::{
    DeviceRegistration, GatewayOutcome, GatewayRegistry, PaymentGateway, SupportedCurrencies,
};
use crate::payment::{Payment, PaymentMethod, PaymentResult, PaymentRoute};
use crate::ports::{LedgerStore, PaymentStatistics};
use crate::transaction::{RoomTransaction, TransactionCategory, TransactionType};

/// Router settings
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentServiceConfig {
    /// Upper bound on one gateway call; exceeding it fails the payment
    pub gateway_timeout: Duration,
    /// Number of recent payments in statistics
    pub recent_payments_limit: usize,
    /// Currency used for statistics totals
    pub currency: Currency,
    /// PENDING payments older than this need attention
    pub stale_pending_after: ChronoDuration,
    /// Mirror settled payments and charges into the room ledger
    pub journal_room_transactions: bool,
}

impl Default for PaymentServiceConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
            recent_payments_limit: 10,
            currency: Currency::USD,
            stale_pending_after: ChronoDuration::minutes(30),
            journal_room_transactions: true,
        }
    }
}

/// A payment instruction
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub booking_id: BookingId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub customer_email: Option<String>,
}

impl PaymentRequest {
    pub fn new(booking_id: BookingId, amount: Decimal, method: PaymentMethod) -> Self {
        Self {
            booking_id,
            amount,
            method,
            device_type: None,
            device_id: None,
            customer_email: None,
        }
    }

    pub fn with_device(mut self, device_type: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }
}

/// Payment router and refund handler
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    gateways: GatewayRegistry,
    config: PaymentServiceConfig,
}

impl PaymentService {
    pub fn new(store: Arc<dyn LedgerStore>, gateways: GatewayRegistry, config: PaymentServiceConfig) -> Self {
        Self {
            store,
            gateways,
            config,
        }
    }

    pub fn config(&self) -> &PaymentServiceConfig {
        &self.config
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Accepts a payment instruction and settles it
    #[instrument(skip(self, request), fields(booking_id = %request.booking_id, method = %request.method))]
    pub async fn process_payment(&self, request: PaymentRequest) -> PaymentResult {
        if request.amount <= Decimal::ZERO {
            let err = BookingError::invalid_amount(format!("payment must be positive, got {}", request.amount));
            return PaymentResult::failed(&err, format!("Payment processing failed: {}", err), None);
        }

        let booking = match self.store.get_booking(request.booking_id).await {
            Ok(booking) => booking,
            Err(e) => {
                let err = BookingError::from(e);
                warn!(error = %err, "Payment rejected");
                return PaymentResult::failed(&err, format!("Payment processing failed: {}", err), None);
            }
        };

        let amount = Money::new(request.amount, booking.currency());
        info!(amount = %amount, "Payment accepted");

        match self.gateways.resolve(&request.method) {
            Some(gateway) => {
                debug!(gateway = gateway.gateway_id(), "Routing to device gateway");
                let payment = Payment::new(&booking, amount, request.method.clone(), PaymentRoute::Device)
                    .with_customer_email(request.customer_email.clone())
                    .with_device(request.device_type.clone(), request.device_id.clone());
                self.process_device_payment(&booking, payment, gateway.as_ref()).await
            }
            None => {
                debug!("Routing as traditional payment");
                let payment = Payment::new(&booking, amount, request.method.clone(), PaymentRoute::Traditional)
                    .with_customer_email(request.customer_email.clone());
                self.process_traditional_payment(&booking, payment).await
            }
        }
    }

    async fn process_traditional_payment(&self, booking: &Booking, mut payment: Payment) -> PaymentResult {
        if let Err(err) = payment.complete() {
            return PaymentResult::failed(&err, format!("Traditional payment failed: {}", err), None);
        }

        match self.settle(booking, &payment).await {
            Ok(updated) => {
                info!(
                    payment_id = %payment.id,
                    balance = %updated.current_balance(),
                    status = updated.payment_status().code(),
                    "Ledger applied"
                );
                PaymentResult::succeeded("Payment processed successfully", payment)
            }
            Err(err) => {
                error!(payment_id = %payment.id, error = %err, "Traditional payment not persisted");
                PaymentResult::failed(&err, format!("Traditional payment failed: {}", err), None)
            }
        }
    }

    async fn process_device_payment(
        &self,
        booking: &Booking,
        mut payment: Payment,
        gateway: &dyn PaymentGateway,
    ) -> PaymentResult {
        if let Err(e) = self.store.save_payment(&payment).await {
            let err = BookingError::from(e);
            error!(payment_id = %payment.id, error = %err, "Could not record pending device payment");
            return PaymentResult::failed(&err, format!("Payment processing failed: {}", err), None);
        }

        let outcome = self.call_gateway(gateway, &payment).await;

        let outcome = match outcome {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => return self.fail_device_payment(payment, &outcome.failure_reason()).await,
            Err(reason) => return self.fail_device_payment(payment, &reason).await,
        };

        let pending = payment.clone();
        if let Err(err) = payment.complete_with_gateway(&outcome) {
            return self.fail_device_payment(payment, &err.to_string()).await;
        }

        match self.settle(booking, &payment).await {
            Ok(updated) => {
                info!(
                    payment_id = %payment.id,
                    transaction_id = ?payment.upp_transaction_id,
                    balance = %updated.current_balance(),
                    status = updated.payment_status().code(),
                    "Ledger applied"
                );
                PaymentResult::succeeded(
                    outcome
                        .message
                        .unwrap_or_else(|| "Payment processed successfully".to_string()),
                    payment,
                )
            }
            Err(err) => {
                error!(
                    payment_id = %payment.id,
                    transaction_id = ?payment.upp_transaction_id,
                    error = %err,
                    "Gateway approved payment but ledger was not updated"
                );
                let payment = self.mark_failed_after_error(pending, &payment, &err).await;
                PaymentResult::failed(&err, format!("Payment processing failed: {}", err), Some(payment))
            }
        }
    }

    async fn call_gateway(&self, gateway: &dyn PaymentGateway, payment: &Payment) -> Result<GatewayOutcome, String> {
        let call = gateway.process_payment(
            payment,
            payment.device_type.as_deref(),
            payment.device_id.as_deref(),
        );

        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "Gateway call timed out after {}ms",
                self.config.gateway_timeout.as_millis()
            )),
        }
    }

    async fn fail_device_payment(&self, mut payment: Payment, reason: &str) -> PaymentResult {
        warn!(payment_id = %payment.id, reason, "Device payment failed");
        let err = BookingError::GatewayFailure(reason.to_string());

        if let Err(e) = payment.fail(reason) {
            return PaymentResult::failed(&e, format!("Payment processing failed: {}", e), Some(payment));
        }
        if let Err(e) = self.store.save_payment(&payment).await {
            let persist = BookingError::from(e);
            error!(payment_id = %payment.id, error = %persist, "Could not record failed device payment");
            return PaymentResult::failed(&persist, format!("Payment processing failed: {}", persist), Some(payment));
        }

        PaymentResult::failed(&err, format!("Device payment failed: {}", reason), Some(payment))
    }

    /// Best effort: the payment is recorded FAILED so it is not left pending.
    /// The gateway's transaction id is kept for manual follow-up.
    async fn mark_failed_after_error(&self, mut failed: Payment, approved: &Payment, err: &BookingError) -> Payment {
        failed.upp_transaction_id = approved.upp_transaction_id.clone();
        failed.stripe_payment_intent_id = approved.stripe_payment_intent_id.clone();
        if failed.fail(&err.to_string()).is_ok() {
            if let Err(e) = self.store.save_payment(&failed).await {
                error!(payment_id = %failed.id, error = %e, "Could not mark payment failed");
            }
        }
        failed
    }

    async fn settle(&self, booking: &Booking, payment: &Payment) -> Result<Booking, BookingError> {
        let journal = self.journal_for_payment(booking, payment)?;
        self.store
            .settle_payment(payment, journal)
            .await
            .map_err(BookingError::from)
    }

    fn journal_for_payment(&self, booking: &Booking, payment: &Payment) -> Result<Option<RoomTransaction>, BookingError> {
        if !self.config.journal_room_transactions {
            return Ok(None);
        }
        let (kind, category) = if payment.is_refund() {
            (TransactionType::Refund, TransactionCategory::Rent)
        } else {
            (TransactionType::Payment, TransactionCategory::Rent)
        };
        let description = payment
            .description
            .clone()
            .unwrap_or_else(|| format!("Payment {}", payment.id));

        let mut line = RoomTransaction::new(booking.room_id, description, payment.amount, kind)?
            .with_category(category)
            .with_reference(payment.id.to_string());
        if let Some(name) = &booking.guest_name {
            line = line.paid_by(name.clone());
        }
        Ok(Some(line))
    }

    /// Refunds part or all of a completed payment
    #[instrument(skip(self))]
    pub async fn refund_payment(&self, payment_id: PaymentId, refund_amount: Decimal) -> PaymentResult {
        if refund_amount <= Decimal::ZERO {
            let err = BookingError::invalid_amount(format!("refund must be positive, got {}", refund_amount));
            return PaymentResult::failed(&err, format!("Refund failed: {}", err), None);
        }

        let original = match self.store.get_payment(payment_id).await {
            Ok(payment) => payment,
            Err(e) => {
                let err = BookingError::from(e);
                return PaymentResult::failed(&err, format!("Refund failed: {}", err), None);
            }
        };

        if original.is_refund() {
            let err = BookingError::RefundOfRefund;
            return PaymentResult::failed(&err, err.to_string(), None);
        }
        if !original.is_completed() {
            let err = BookingError::OriginalNotCompleted;
            return PaymentResult::failed(&err, err.to_string(), None);
        }

        let refund_money = Money::new(refund_amount, original.amount.currency());
        if refund_money.amount() > original.amount.amount() {
            let err = BookingError::RefundExceedsOriginal;
            return PaymentResult::failed(&err, err.to_string(), None);
        }

        let booking = match self.store.get_booking(original.booking_id).await {
            Ok(booking) => booking,
            Err(e) => {
                let err = BookingError::from(e);
                return PaymentResult::failed(&err, format!("Refund failed: {}", err), None);
            }
        };

        let refund = Payment::refund_of(&original, refund_money);
        let journal = match self.journal_for_payment(&booking, &refund) {
            Ok(journal) => journal,
            Err(err) => return PaymentResult::failed(&err, format!("Refund failed: {}", err), None),
        };

        match self.store.settle_payment(&refund, journal).await {
            Ok(updated) => {
                info!(
                    refund_id = %refund.id,
                    original_id = %original.id,
                    amount = %refund.amount,
                    balance = %updated.current_balance(),
                    "Refund applied"
                );
                PaymentResult::succeeded("Refund processed successfully", refund)
            }
            Err(core_kernel::PortError::Conflict { message }) => {
                warn!(original_id = %original.id, %message, "Cumulative refund limit reached");
                let err = BookingError::RefundExceedsOriginal;
                PaymentResult::failed(&err, err.to_string(), None)
            }
            Err(e) => {
                let err = BookingError::from(e);
                error!(original_id = %original.id, error = %err, "Refund not persisted");
                PaymentResult::failed(&err, format!("Refund failed: {}", err), None)
            }
        }
    }

    /// Accrues a charge against a booking
    #[instrument(skip(self))]
    pub async fn add_charge(
        &self,
        booking_id: BookingId,
        amount: Decimal,
        category: TransactionCategory,
        description: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.store.get_booking(booking_id).await?;
        let charge = Money::new(amount, booking.currency());
        if !charge.is_positive() {
            return Err(BookingError::invalid_amount(format!("charge must be positive, got {}", amount)));
        }

        let kind = match category {
            TransactionCategory::LateFee => TransactionType::Fee,
            _ => TransactionType::Charge,
        };
        let journal = if self.config.journal_room_transactions {
            Some(RoomTransaction::new(booking.room_id, description, charge, kind)?.with_category(category))
        } else {
            None
        };

        let updated = self
            .store
            .mutate_booking(booking_id, BookingMutation::AddCharge(charge), journal)
            .await?;
        info!(charge = %charge, balance = %updated.current_balance(), "Charge applied");
        Ok(updated)
    }

    /// Charges `nights` at the booking's nightly rate
    pub async fn charge_nights(&self, booking_id: BookingId, nights: u32) -> Result<Booking, BookingError> {
        if nights == 0 {
            return Err(BookingError::invalid_amount("cannot charge zero nights"));
        }
        let booking = self.store.get_booking(booking_id).await?;
        let charge = booking.nightly_rate.checked_mul(Decimal::from(nights))?;
        let description = format!("{} night(s) at {}", nights, booking.nightly_rate);
        self.add_charge(booking_id, charge.amount(), TransactionCategory::Rent, &description)
            .await
    }

    /// Flags a booking overdue; called by the overdue sweep
    #[instrument(skip(self))]
    pub async fn mark_overdue(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let updated = self
            .store
            .mutate_booking(booking_id, BookingMutation::MarkOverdue, None)
            .await?;
        info!("Booking marked overdue");
        Ok(updated)
    }

    /// Active payments for a booking, most recent first
    pub async fn payment_history(&self, booking_id: BookingId) -> Result<Vec<Payment>, BookingError> {
        Ok(self.store.payment_history(booking_id).await?)
    }

    pub async fn payment_statistics(&self) -> Result<PaymentStatistics, BookingError> {
        Ok(self
            .store
            .payment_statistics(self.config.currency, self.config.recent_payments_limit)
            .await?)
    }

    /// Failed payments and device payments stuck in PENDING
    pub async fn payments_needing_attention(&self) -> Result<Vec<Payment>, BookingError> {
        let cutoff = Utc::now() - self.config.stale_pending_after;
        Ok(self.store.payments_needing_attention(cutoff).await?)
    }

    fn gateway_for(&self, method: &PaymentMethod) -> Result<Arc<dyn PaymentGateway>, BookingError> {
        self.gateways
            .resolve(method)
            .ok_or_else(|| BookingError::GatewayFailure(format!("no gateway registered for {}", method)))
    }

    pub async fn is_gateway_healthy(&self, method: &PaymentMethod) -> bool {
        match self.gateways.resolve(method) {
            Some(gateway) => gateway.is_configured() && gateway.is_service_healthy().await,
            None => false,
        }
    }

    pub async fn device_capabilities(
        &self,
        method: &PaymentMethod,
        device_type: &str,
    ) -> Result<HashMap<String, Value>, BookingError> {
        self.gateway_for(method)?
            .device_capabilities(device_type)
            .await
            .map_err(|e| BookingError::GatewayFailure(e.to_string()))
    }

    pub async fn supported_currencies(&self, method: &PaymentMethod) -> Result<SupportedCurrencies, BookingError> {
        self.gateway_for(method)?
            .supported_currencies()
            .await
            .map_err(|e| BookingError::GatewayFailure(e.to_string()))
    }

    pub async fn register_device(
        &self,
        method: &PaymentMethod,
        device_type: &str,
        device_id: &str,
        capabilities: &[String],
    ) -> Result<DeviceRegistration, BookingError> {
        self.gateway_for(method)?
            .register_device(device_type, device_id, capabilities)
            .await
            .map_err(|e| BookingError::GatewayFailure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{LedgerStatus, PaymentFrequency};
    use crate::error::FailureKind;
    use crate::payment::PaymentStatus;
    use crate::ports::mock::InMemoryLedgerStore;
    use crate::transaction::TransactionType;
    use async_trait::async_trait;
    use core_kernel::{AdapterHealth, DomainPort, GuestId, HealthCheckResult, HealthCheckable, PortError, RoomId};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway that answers with a fixed outcome
    struct ScriptedGateway {
        outcome: GatewayOutcome,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn approving() -> Self {
            Self {
                outcome: GatewayOutcome::approved("upp_tx_1", Some("pi_1".to_string()), Some(12)),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn declining(reason: &str) -> Self {
            Self {
                outcome: GatewayOutcome::declined(reason),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::approving()
            }
        }
    }

    impl DomainPort for ScriptedGateway {}

    #[async_trait]
    impl HealthCheckable for ScriptedGateway {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult {
                adapter_id: "scripted".to_string(),
                status: AdapterHealth::Healthy,
                latency_ms: 0,
                message: None,
                checked_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn gateway_id(&self) -> &str {
            "scripted"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn process_payment(
            &self,
            _payment: &Payment,
            _device_type: Option<&str>,
            _device_id: Option<&str>,
        ) -> Result<GatewayOutcome, PortError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.outcome.clone())
        }

        async fn is_service_healthy(&self) -> bool {
            true
        }

        async fn device_capabilities(&self, _device_type: &str) -> Result<HashMap<String, Value>, PortError> {
            Ok(HashMap::from([("nfc".to_string(), Value::Bool(true))]))
        }

        async fn supported_currencies(&self) -> Result<SupportedCurrencies, PortError> {
            Ok(SupportedCurrencies::default())
        }

        async fn register_device(
            &self,
            device_type: &str,
            device_id: &str,
            _capabilities: &[String],
        ) -> Result<DeviceRegistration, PortError> {
            Ok(DeviceRegistration {
                device_id: device_id.to_string(),
                device_type: device_type.to_string(),
                trust_score: Some(80),
                expires_at: None,
            })
        }
    }

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn booking_with_charge(charge: Decimal) -> Booking {
        let mut booking = Booking::check_in(
            RoomId::new(),
            GuestId::new(),
            Utc::now(),
            usd(dec!(50)),
            PaymentFrequency::Daily,
        )
        .with_room_label("101")
        .with_guest_name("Ada Guest");
        booking.add_charge(usd(charge)).unwrap();
        booking
    }

    async fn setup(
        charge: Decimal,
        gateway: Option<Arc<ScriptedGateway>>,
    ) -> (PaymentService, Arc<InMemoryLedgerStore>, BookingId) {
        let booking = booking_with_charge(charge);
        let id = booking.id;
        let store = Arc::new(InMemoryLedgerStore::with_bookings(vec![booking]).await);
        let mut gateways = GatewayRegistry::new();
        if let Some(gateway) = gateway {
            gateways.register(PaymentMethod::UppDevice, gateway);
        }
        let service = PaymentService::new(store.clone(), gateways, PaymentServiceConfig::default());
        (service, store, id)
    }

    #[tokio::test]
    async fn test_cash_payment_settles_immediately() {
        let (service, store, booking_id) = setup(dec!(200), None).await;

        let result = service
            .process_payment(PaymentRequest::new(booking_id, dec!(50.00), PaymentMethod::Cash))
            .await;

        assert!(result.success, "{}", result.message);
        let payment = result.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.route, PaymentRoute::Traditional);
        assert_eq!(payment.description.as_deref(), Some("Payment for Room 101 - Ada Guest"));
        assert_eq!(store.payment_count().await, 1);
        assert_eq!(store.booking_write_count(), 1);

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.current_balance(), usd(dec!(150)));
        assert_eq!(booking.payment_status(), LedgerStatus::Partial);
    }

    #[tokio::test]
    async fn test_payments_pay_off_booking() {
        let (service, store, booking_id) = setup(dec!(200), None).await;

        for amount in [dec!(50), dec!(150)] {
            let result = service
                .process_payment(PaymentRequest::new(booking_id, amount, PaymentMethod::Card))
                .await;
            assert!(result.success);
        }

        let booking = store.get_booking(booking_id).await.unwrap();
        assert!(booking.current_balance().is_zero());
        assert_eq!(booking.payment_status(), LedgerStatus::Paid);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected_without_side_effects() {
        let (service, store, booking_id) = setup(dec!(200), None).await;

        for amount in [dec!(0), dec!(-10)] {
            let result = service
                .process_payment(PaymentRequest::new(booking_id, amount, PaymentMethod::Cash))
                .await;
            assert!(!result.success);
            assert_eq!(result.failure, Some(FailureKind::InvalidAmount));
        }
        assert_eq!(store.payment_count().await, 0);
        assert_eq!(store.booking_write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_booking_rejected() {
        let (service, store, _) = setup(dec!(200), None).await;

        let result = service
            .process_payment(PaymentRequest::new(BookingId::new(), dec!(10), PaymentMethod::Cash))
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::BookingNotFound));
        assert_eq!(store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_device_payment_approved() {
        let gateway = Arc::new(ScriptedGateway::approving());
        let (service, store, booking_id) = setup(dec!(200), Some(gateway.clone())).await;

        let request = PaymentRequest::new(booking_id, dec!(75), PaymentMethod::UppDevice)
            .with_device("smartwatch", "watch-7");
        let result = service.process_payment(request).await;

        assert!(result.success, "{}", result.message);
        let payment = result.payment.unwrap();
        assert_eq!(payment.route, PaymentRoute::Device);
        assert_eq!(payment.upp_transaction_id.as_deref(), Some("upp_tx_1"));
        assert_eq!(payment.metadata.as_ref().unwrap()["upp_device_id"], "watch-7");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.booking_write_count(), 1);

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.current_balance(), usd(dec!(125)));
    }

    #[tokio::test]
    async fn test_declined_device_payment_leaves_ledger_untouched() {
        let gateway = Arc::new(ScriptedGateway::declining("Device offline"));
        let (service, store, booking_id) = setup(dec!(200), Some(gateway)).await;

        let result = service
            .process_payment(PaymentRequest::new(booking_id, dec!(50), PaymentMethod::UppDevice))
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::GatewayFailure));
        assert!(result.message.contains("Device offline"));

        let payments = store.all_payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert_eq!(payments[0].failure_reason(), Some("Device offline"));
        assert_eq!(store.booking_write_count(), 0);

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.current_balance(), usd(dec!(200)));
    }

    #[tokio::test]
    async fn test_gateway_timeout_fails_payment() {
        let gateway = Arc::new(ScriptedGateway::slow(Duration::from_millis(200)));
        let booking = booking_with_charge(dec!(100));
        let booking_id = booking.id;
        let store = Arc::new(InMemoryLedgerStore::with_bookings(vec![booking]).await);
        let config = PaymentServiceConfig {
            gateway_timeout: Duration::from_millis(20),
            ..PaymentServiceConfig::default()
        };
        let service = PaymentService::new(
            store.clone(),
            GatewayRegistry::new().with_gateway(PaymentMethod::UppDevice, gateway),
            config,
        );

        let result = service
            .process_payment(PaymentRequest::new(booking_id, dec!(50), PaymentMethod::UppDevice))
            .await;

        assert!(!result.success);
        assert!(result.message.contains("timed out"));
        assert_eq!(result.payment.unwrap().status, PaymentStatus::Failed);
        assert_eq!(store.booking_write_count(), 0);
    }

    #[tokio::test]
    async fn test_traditional_persistence_failure_returns_no_payment() {
        let (service, store, booking_id) = setup(dec!(200), None).await;
        store.set_fail_settlements(true);

        let result = service
            .process_payment(PaymentRequest::new(booking_id, dec!(50), PaymentMethod::Cash))
            .await;

        assert!(!result.success);
        assert!(result.payment.is_none());
        assert_eq!(result.failure, Some(FailureKind::PersistenceFailure));
        assert_eq!(store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_approved_device_payment_fails_when_ledger_rejects_apply() {
        let gateway = Arc::new(ScriptedGateway::approving());
        let (service, store, booking_id) = setup(dec!(200), Some(gateway)).await;
        store.set_reject_ledger_applies(true);

        let result = service
            .process_payment(PaymentRequest::new(booking_id, dec!(60), PaymentMethod::UppDevice))
            .await;

        assert!(!result.success);
        let payment = result.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.upp_transaction_id.as_deref(), Some("upp_tx_1"));
        assert!(payment.failure_reason().unwrap().contains("rejected the apply"));

        let stored = store.get_payment(payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(store.booking_write_count(), 0);
        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.current_balance(), usd(dec!(200)));
    }

    #[tokio::test]
    async fn test_partial_refund() {
        let (service, store, booking_id) = setup(dec!(200), None).await;
        let original = service
            .process_payment(PaymentRequest::new(booking_id, dec!(100), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();

        let result = service.refund_payment(original.id, dec!(25)).await;

        assert!(result.success, "{}", result.message);
        let refund = result.payment.unwrap();
        assert_eq!(refund.amount, usd(dec!(-25)));
        assert_eq!(refund.status, PaymentStatus::Completed);
        assert_eq!(refund.refunded_payment_id, Some(original.id));
        assert_eq!(refund.description, Some(format!("Refund for payment #{}", original.id)));

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.total_payments(), usd(dec!(75)));
        assert_eq!(booking.current_balance(), usd(dec!(125)));
    }

    #[tokio::test]
    async fn test_refund_exceeding_original_rejected() {
        let (service, store, booking_id) = setup(dec!(200), None).await;
        let original = service
            .process_payment(PaymentRequest::new(booking_id, dec!(100), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();
        let writes = store.booking_write_count();

        let result = service.refund_payment(original.id, dec!(150)).await;

        assert!(!result.success);
        assert_eq!(result.message, "Refund amount cannot exceed original payment");
        assert_eq!(result.failure, Some(FailureKind::RefundExceedsOriginal));
        assert_eq!(store.payment_count().await, 1);
        assert_eq!(store.booking_write_count(), writes);
    }

    #[tokio::test]
    async fn test_cumulative_refunds_capped() {
        let (service, _store, booking_id) = setup(dec!(200), None).await;
        let original = service
            .process_payment(PaymentRequest::new(booking_id, dec!(100), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();

        assert!(service.refund_payment(original.id, dec!(60)).await.success);
        let second = service.refund_payment(original.id, dec!(60)).await;

        assert!(!second.success);
        assert_eq!(second.failure, Some(FailureKind::RefundExceedsOriginal));
        assert!(service.refund_payment(original.id, dec!(40)).await.success);
    }

    #[tokio::test]
    async fn test_full_refund_restores_totals() {
        let (service, store, booking_id) = setup(dec!(200), None).await;
        let before = store.get_booking(booking_id).await.unwrap();
        let original = service
            .process_payment(PaymentRequest::new(booking_id, dec!(80), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();

        assert!(service.refund_payment(original.id, dec!(80)).await.success);

        let after = store.get_booking(booking_id).await.unwrap();
        assert_eq!(after.total_payments(), before.total_payments());
        assert_eq!(after.current_balance(), before.current_balance());
        assert_eq!(after.payment_status(), LedgerStatus::Pending);
    }

    #[tokio::test]
    async fn test_refund_of_refund_rejected() {
        let (service, _store, booking_id) = setup(dec!(200), None).await;
        let original = service
            .process_payment(PaymentRequest::new(booking_id, dec!(100), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();
        let refund = service.refund_payment(original.id, dec!(10)).await.payment.unwrap();

        let result = service.refund_payment(refund.id, dec!(5)).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::RefundOfRefund));
    }

    #[tokio::test]
    async fn test_refund_of_failed_payment_rejected() {
        let gateway = Arc::new(ScriptedGateway::declining("Card declined"));
        let (service, _store, booking_id) = setup(dec!(200), Some(gateway)).await;
        let failed = service
            .process_payment(PaymentRequest::new(booking_id, dec!(50), PaymentMethod::UppDevice))
            .await
            .payment
            .unwrap();

        let result = service.refund_payment(failed.id, dec!(10)).await;
        assert!(!result.success);
        assert_eq!(result.message, "Cannot refund incomplete payment");
    }

    #[tokio::test]
    async fn test_refund_unknown_payment() {
        let (service, _store, _) = setup(dec!(200), None).await;
        let result = service.refund_payment(PaymentId::new(), dec!(10)).await;
        assert_eq!(result.failure, Some(FailureKind::PaymentNotFound));
    }

    #[tokio::test]
    async fn test_concurrent_payments_both_applied() {
        let (service, store, booking_id) = setup(dec!(200), None).await;
        let service = Arc::new(service);

        let a = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .process_payment(PaymentRequest::new(booking_id, dec!(50), PaymentMethod::Cash))
                    .await
            })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .process_payment(PaymentRequest::new(booking_id, dec!(30), PaymentMethod::Card))
                    .await
            })
        };
        assert!(a.await.unwrap().success);
        assert!(b.await.unwrap().success);

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.total_payments(), usd(dec!(80)));
        assert_eq!(booking.current_balance(), usd(dec!(120)));
    }

    #[tokio::test]
    async fn test_payments_journal_room_transactions() {
        let (service, store, booking_id) = setup(dec!(0.01), None).await;
        let room_id = store.get_booking(booking_id).await.unwrap().room_id;

        service.add_charge(booking_id, dec!(100), TransactionCategory::Rent, "Week 1").await.unwrap();
        let paid = service
            .process_payment(PaymentRequest::new(booking_id, dec!(60), PaymentMethod::Cash))
            .await
            .payment
            .unwrap();
        service.refund_payment(paid.id, dec!(10)).await;

        let lines = store.transactions_for_room(room_id).await.unwrap();
        let kinds: Vec<TransactionType> = lines.iter().map(|t| t.transaction_type).collect();
        assert_eq!(kinds, vec![TransactionType::Charge, TransactionType::Payment, TransactionType::Refund]);
        assert_eq!(lines[2].running_balance, Some(usd(dec!(50))));
        assert_eq!(lines[1].reference_number, Some(paid.id.to_string()));
    }

    #[tokio::test]
    async fn test_charge_nights_uses_nightly_rate() {
        let (service, _store, booking_id) = setup(dec!(10), None).await;
        let booking = service.charge_nights(booking_id, 3).await.unwrap();
        assert_eq!(booking.total_charges(), usd(dec!(160)));
        assert!(service.charge_nights(booking_id, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_overdue_requires_balance() {
        let (service, _store, booking_id) = setup(dec!(40), None).await;
        let booking = service.mark_overdue(booking_id).await.unwrap();
        assert!(booking.is_overdue());

        let (service, _store, paid_id) = setup(dec!(40), None).await;
        service
            .process_payment(PaymentRequest::new(paid_id, dec!(40), PaymentMethod::Cash))
            .await;
        assert!(service.mark_overdue(paid_id).await.is_err());
    }

    #[tokio::test]
    async fn test_statistics_and_history() {
        let gateway = Arc::new(ScriptedGateway::declining("Device offline"));
        let (service, _store, booking_id) = setup(dec!(300), Some(gateway)).await;

        service.process_payment(PaymentRequest::new(booking_id, dec!(20), PaymentMethod::Cash)).await;
        service.process_payment(PaymentRequest::new(booking_id, dec!(30), PaymentMethod::Card)).await;
        service.process_payment(PaymentRequest::new(booking_id, dec!(40), PaymentMethod::UppDevice)).await;

        let stats = service.payment_statistics().await.unwrap();
        assert_eq!(stats.completed_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.count_for(&PaymentMethod::UppDevice), 1);

        let history = service.payment_history(booking_id).await.unwrap();
        assert_eq!(history.len(), 3);

        let attention = service.payments_needing_attention().await.unwrap();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_auxiliary_gateway_operations() {
        let gateway = Arc::new(ScriptedGateway::approving());
        let (service, _store, _) = setup(dec!(10), Some(gateway)).await;

        assert!(service.is_gateway_healthy(&PaymentMethod::UppDevice).await);
        assert!(!service.is_gateway_healthy(&PaymentMethod::Cash).await);

        let caps = service.device_capabilities(&PaymentMethod::UppDevice, "smartwatch").await.unwrap();
        assert_eq!(caps["nfc"], Value::Bool(true));

        let registration = service
            .register_device(&PaymentMethod::UppDevice, "smartwatch", "watch-7", &["nfc".to_string()])
            .await
            .unwrap();
        assert_eq!(registration.device_id, "watch-7");

        assert!(matches!(
            service.supported_currencies(&PaymentMethod::Cash).await,
            Err(BookingError::GatewayFailure(_))
        ));
    }
}
