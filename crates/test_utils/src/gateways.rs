//! Scripted device gateway
//!
//! A [`PaymentGateway`] that answers every payment the same way, for
//! exercising the router without a device service.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use core_kernel::{AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_booking::{
    DeviceRegistration, GatewayOutcome, Payment, PaymentGateway, SupportedCurrencies,
};

/// How the gateway answers a payment
#[derive(Debug, Clone)]
pub enum GatewayScript {
    Approve { transaction_id: String },
    Decline { reason: String },
    /// The gateway cannot be reached
    Unreachable,
}

/// Device seen on a gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub payment_id: String,
    pub amount: String,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
}

pub struct ScriptedGateway {
    script: GatewayScript,
    delay: Option<Duration>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new(script: GatewayScript) -> Self {
        Self {
            script,
            delay: None,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn approving(transaction_id: impl Into<String>) -> Self {
        Self::new(GatewayScript::Approve {
            transaction_id: transaction_id.into(),
        })
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self::new(GatewayScript::Decline {
            reason: reason.into(),
        })
    }

    pub fn unreachable() -> Self {
        Self::new(GatewayScript::Unreachable)
    }

    /// Sleeps before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl DomainPort for ScriptedGateway {}

#[async_trait]
impl HealthCheckable for ScriptedGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let status = if self.healthy.load(Ordering::SeqCst) {
            AdapterHealth::Healthy
        } else {
            AdapterHealth::Unhealthy
        };
        HealthCheckResult {
            adapter_id: self.gateway_id().to_string(),
            status,
            latency_ms: 0,
            message: None,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn gateway_id(&self) -> &str {
        "scripted-device"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn process_payment(
        &self,
        payment: &Payment,
        device_type: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<GatewayOutcome, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedCall {
                payment_id: payment.id.to_string(),
                amount: payment.amount.amount().to_string(),
                device_type: device_type.map(str::to_string),
                device_id: device_id.map(str::to_string),
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            GatewayScript::Approve { transaction_id } => Ok(GatewayOutcome::approved(
                transaction_id.clone(),
                Some(format!("pi_{}", transaction_id)),
                Some(10),
            )),
            GatewayScript::Decline { reason } => Ok(GatewayOutcome::declined(reason.clone())),
            GatewayScript::Unreachable => Err(PortError::connection("scripted gateway is unreachable")),
        }
    }

    async fn is_service_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn device_capabilities(&self, device_type: &str) -> Result<HashMap<String, Value>, PortError> {
        Ok(HashMap::from([
            ("deviceType".to_string(), Value::String(device_type.to_string())),
            ("nfc".to_string(), Value::Bool(true)),
        ]))
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
            trust_score: Some(75),
            expires_at: None,
        })
    }
}
