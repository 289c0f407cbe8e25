//! Device payment gateways
//!
//! A gateway settles a payment on a payment-capable device. Gateways are
//! registered in a [`GatewayRegistry`] under payment-method codes; the
//! router sends a payment to a gateway only when its method has one
//! registered, so new device families need a registration and nothing else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core_kernel::{DomainPort, HealthCheckable, PortError};
use crate::payment::{Payment, PaymentMethod};

/// Result reported by a gateway for one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub risk_score: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub error_message: Option<String>,
}

impl GatewayOutcome {
    pub fn approved(
        transaction_id: impl Into<String>,
        payment_intent_id: Option<String>,
        risk_score: Option<i64>,
    ) -> Self {
        Self {
            success: true,
            transaction_id: Some(transaction_id.into()),
            payment_intent_id,
            risk_score,
            processed_at: Some(Utc::now()),
            message: Some("Payment processed successfully".to_string()),
            error_message: None,
        }
    }

    pub fn declined(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            payment_intent_id: None,
            risk_score: None,
            processed_at: Some(Utc::now()),
            message: Some("Payment processing failed".to_string()),
            error_message: Some(error_message.into()),
        }
    }

    /// Reason to record on a failed payment
    pub fn failure_reason(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Gateway declined the payment".to_string())
    }
}

/// A device registered with a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_type: String,
    pub trust_score: Option<i64>,
    pub expires_at: Option<String>,
}

/// Currencies a gateway can settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedCurrencies {
    pub currencies: Vec<String>,
    pub base_currency: String,
}

impl Default for SupportedCurrencies {
    fn default() -> Self {
        Self {
            currencies: vec!["USD".to_string()],
            base_currency: "USD".to_string(),
        }
    }
}

/// Port for device payment gateways
#[async_trait]
pub trait PaymentGateway: DomainPort + HealthCheckable {
    /// Stable identifier used in logs
    fn gateway_id(&self) -> &str;

    /// True when the gateway has enough configuration to take payments
    fn is_configured(&self) -> bool;

    /// Settles a payment synchronously.
    ///
    /// A declined payment is `Ok` with `success == false`; `Err` means the
    /// gateway could not be asked at all. Both are treated as failures.
    async fn process_payment(
        &self,
        payment: &Payment,
        device_type: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<GatewayOutcome, PortError>;

    async fn is_service_healthy(&self) -> bool;

    async fn device_capabilities(&self, device_type: &str) -> Result<HashMap<String, Value>, PortError>;

    async fn supported_currencies(&self) -> Result<SupportedCurrencies, PortError>;

    async fn register_device(
        &self,
        device_type: &str,
        device_id: &str,
        capabilities: &[String],
    ) -> Result<DeviceRegistration, PortError>;
}

/// Gateways keyed by payment-method code
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `gateway` for payments tendered with `method`
    pub fn with_gateway(mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(method, gateway);
        self
    }

    pub fn register(&mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(method.code().to_string(), gateway);
    }

    /// The gateway that settles `method`, if the method is device-routed
    pub fn resolve(&self, method: &PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(method.code()).cloned()
    }

    pub fn is_device_routed(&self, method: &PaymentMethod) -> bool {
        self.gateways.contains_key(method.code())
    }

    /// Registered method codes, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.gateways.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Each distinct registered gateway once
    pub fn gateways(&self) -> Vec<Arc<dyn PaymentGateway>> {
        let mut seen: Vec<Arc<dyn PaymentGateway>> = Vec::new();
        for gateway in self.gateways.values() {
            if !seen.iter().any(|g| g.gateway_id() == gateway.gateway_id()) {
                seen.push(Arc::clone(gateway));
            }
        }
        seen
    }
}

impl fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_failure_reason_prefers_error_message() {
        let outcome = GatewayOutcome::declined("Device offline");
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason(), "Device offline");
    }

    #[test]
    fn test_supported_currencies_fallback() {
        let fallback = SupportedCurrencies::default();
        let json = serde_json::to_value(&fallback).unwrap();
        assert_eq!(json["baseCurrency"], "USD");
        assert_eq!(json["currencies"][0], "USD");
    }

    #[test]
    fn test_empty_registry_routes_nothing_to_devices() {
        let registry = GatewayRegistry::new();
        assert!(!registry.is_device_routed(&PaymentMethod::UppDevice));
        assert!(registry.resolve(&PaymentMethod::Cash).is_none());
    }
}
