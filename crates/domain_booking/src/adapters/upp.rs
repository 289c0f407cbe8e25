//! Universal Payment Protocol adapter
//!
//! Talks to the UPP device-payment service over HTTP/JSON:
//!
//! | operation | request |
//! |---|---|
//! | process payment | `POST /api/v1/payments/process` |
//! | health | `GET /health` |
//! | device capabilities | `GET /api/v1/devices/{type}/capabilities` |
//! | supported currencies | `GET /api/v1/currencies/supported` |
//! | register device | `POST /api/v1/devices/register` |
//!
//! # Error Handling
//!
//! A payment the service declines, an HTTP error status, and an unreachable
//! service all come back as a declined [`GatewayOutcome`]; connection and
//! timeout failures carry the message `"Connection failed"`. Only an open
//! circuit breaker or an amount that cannot be put on the wire produce
//! `Err`. The router treats both the same way.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use core_kernel::{AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, PortError};

use crate::gateway::{DeviceRegistration, GatewayOutcome, PaymentGateway, SupportedCurrencies};
use crate::payment::Payment;

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes before an open circuit closes
    pub success_threshold: u32,
    /// Seconds before an open circuit lets a probe through
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout_secs: 60,
        }
    }
}

/// Configuration for the UPP gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UppConfig {
    /// Base URL of the UPP service (e.g., "http://localhost:3000")
    pub base_url: String,
    /// Device id used when a payment names none
    pub default_device_id: String,
    /// Device type used when a payment names none
    pub default_device_type: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub enabled: bool,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for UppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            default_device_id: "property_management_system".to_string(),
            default_device_type: "smartphone".to_string(),
            timeout_secs: 30,
            enabled: true,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    is_open: AtomicBool,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            is_open: AtomicBool::new(false),
            opened_at: RwLock::new(None),
        }
    }

    async fn is_available(&self) -> bool {
        if !self.is_open.load(Ordering::Relaxed) {
            return true;
        }
        // Half-open once the reset timeout has passed
        match *self.opened_at.read().await {
            Some(at) => at.elapsed() > Duration::from_secs(self.config.reset_timeout_secs),
            None => false,
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= u64::from(self.config.success_threshold) {
            self.is_open.store(false, Ordering::Relaxed);
            self.success_count.store(0, Ordering::Relaxed);
        }
    }

    async fn record_failure(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= u64::from(self.config.failure_threshold) {
            self.is_open.store(true, Ordering::Relaxed);
            *self.opened_at.write().await = Some(Instant::now());
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    success: bool,
    transaction_id: Option<String>,
    payment_intent_id: Option<String>,
    #[serde(rename = "riskScore")]
    risk_score: Option<i64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapabilitiesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    capabilities: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrenciesResponse {
    #[serde(default)]
    success: bool,
    currencies: Option<Vec<String>>,
    base_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResponse {
    #[serde(default)]
    success: bool,
    device_id: Option<String>,
    trust_score: Option<i64>,
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: Option<String>,
}

/// HTTP client for the UPP service
#[derive(Debug)]
pub struct UppHttpGateway {
    config: UppConfig,
    client: reqwest::Client,
    circuit_breaker: Option<CircuitBreaker>,
}

impl UppHttpGateway {
    pub fn new(config: UppConfig) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PortError::Internal {
                message: "failed to build UPP HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;
        let circuit_breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);

        Ok(Self {
            config,
            client,
            circuit_breaker,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn ensure_circuit_closed(&self) -> Result<(), PortError> {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.is_available().await {
                return Err(PortError::ServiceUnavailable {
                    service: "upp (circuit open)".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn record(&self, healthy: bool) {
        if let Some(cb) = &self.circuit_breaker {
            if healthy {
                cb.record_success();
            } else {
                cb.record_failure().await;
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, reqwest::Error> {
        self.client
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}

fn fingerprint(device_type: &str, device_id: &str) -> String {
    format!("{}_{}_{}", device_type, device_id, Utc::now().timestamp_millis())
}

impl DomainPort for UppHttpGateway {}

#[async_trait]
impl HealthCheckable for UppHttpGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let (status, message) = match self.get_json::<HealthResponse>("/health").await {
            Ok(body) if body.status.as_deref() == Some("healthy") => (AdapterHealth::Healthy, None),
            Ok(body) => (AdapterHealth::Degraded, body.status),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
        };

        HealthCheckResult {
            adapter_id: "upp-http".to_string(),
            status,
            latency_ms: start.elapsed().as_millis() as u64,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PaymentGateway for UppHttpGateway {
    fn gateway_id(&self) -> &str {
        "upp"
    }

    fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.base_url.trim().is_empty()
    }

    async fn process_payment(
        &self,
        payment: &Payment,
        device_type: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<GatewayOutcome, PortError> {
        self.ensure_circuit_closed().await?;

        let device_type = device_type.unwrap_or(self.config.default_device_type.as_str());
        let device_id = device_id.unwrap_or(self.config.default_device_id.as_str());
        // The service expects a JSON number
        let amount = payment.amount.amount().to_f64().ok_or_else(|| {
            PortError::transformation(format!("amount {} is not representable", payment.amount))
        })?;

        info!(payment_id = %payment.id, booking_id = %payment.booking_id, amount, device_type, "Sending UPP payment");

        let body = json!({
            "amount": amount,
            "currency": payment.amount.currency().code(),
            "deviceType": device_type,
            "deviceId": device_id,
            "description": payment.description,
            "customerEmail": payment.customer_email,
            "metadata": {
                "booking_id": payment.booking_id.to_string(),
                "payment_id": payment.id.to_string(),
                "property_management": "true",
            },
        });

        let response = self
            .client
            .post(self.url("/api/v1/payments/process"))
            .header("X-Device-ID", device_id)
            .header("X-Device-Type", device_type)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                error!(error = %e, "UPP API connection error");
                self.record(false).await;
                return Ok(GatewayOutcome::declined("Connection failed"));
            }
            Err(e) => {
                error!(error = %e, "UPP payment request failed");
                self.record(false).await;
                return Ok(GatewayOutcome::declined(e.to_string()));
            }
        };

        let status = response.status();
        let parsed = response.json::<ProcessResponse>().await;
        self.record(!status.is_server_error()).await;

        match parsed {
            Ok(body) if status.is_success() && body.success => {
                debug!(transaction_id = ?body.transaction_id, risk_score = ?body.risk_score, "UPP approved payment");
                Ok(GatewayOutcome {
                    transaction_id: body.transaction_id,
                    ..GatewayOutcome::approved(String::new(), body.payment_intent_id, body.risk_score)
                })
            }
            Ok(body) => {
                let reason = body
                    .error
                    .unwrap_or_else(|| format!("UPP returned {}", status));
                warn!(%status, reason = %reason, "UPP declined payment");
                Ok(GatewayOutcome::declined(reason))
            }
            Err(e) => {
                warn!(%status, error = %e, "Unreadable UPP response");
                Ok(GatewayOutcome::declined(format!("UPP returned {}", status)))
            }
        }
    }

    async fn is_service_healthy(&self) -> bool {
        self.health_check().await.is_healthy()
    }

    async fn device_capabilities(&self, device_type: &str) -> Result<HashMap<String, Value>, PortError> {
        let path = format!("/api/v1/devices/{}/capabilities", device_type);
        match self.get_json::<CapabilitiesResponse>(&path).await {
            Ok(body) if body.success => Ok(body.capabilities),
            Ok(_) => {
                warn!(device_type, "UPP reported no capabilities");
                Ok(HashMap::new())
            }
            Err(e) => {
                error!(device_type, error = %e, "Failed to fetch UPP device capabilities");
                Ok(HashMap::new())
            }
        }
    }

    async fn supported_currencies(&self) -> Result<SupportedCurrencies, PortError> {
        match self.get_json::<CurrenciesResponse>("/api/v1/currencies/supported").await {
            Ok(CurrenciesResponse {
                success: true,
                currencies: Some(currencies),
                base_currency,
            }) => Ok(SupportedCurrencies {
                currencies,
                base_currency: base_currency.unwrap_or_else(|| "USD".to_string()),
            }),
            Ok(_) => Ok(SupportedCurrencies::default()),
            Err(e) => {
                error!(error = %e, "Failed to fetch UPP currencies");
                Ok(SupportedCurrencies::default())
            }
        }
    }

    async fn register_device(
        &self,
        device_type: &str,
        device_id: &str,
        capabilities: &[String],
    ) -> Result<DeviceRegistration, PortError> {
        self.ensure_circuit_closed().await?;
        info!(device_type, device_id, "Registering device with UPP");

        let body = json!({
            "deviceType": device_type,
            "capabilities": capabilities,
            "fingerprint": fingerprint(device_type, device_id),
        });

        let response = self
            .client
            .post(self.url("/api/v1/devices/register"))
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Connection {
                message: "Failed to register device with UPP".to_string(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let body: RegistrationResponse = response.json().await.map_err(|e| {
            PortError::transformation(format!("unreadable UPP registration response ({}): {}", status, e))
        })?;

        match body {
            RegistrationResponse {
                success: true,
                device_id: Some(registered_id),
                trust_score,
                expires_at,
            } => Ok(DeviceRegistration {
                device_id: registered_id,
                device_type: device_type.to_string(),
                trust_score,
                expires_at,
            }),
            _ => Err(PortError::internal(format!(
                "Device registration failed with status {}",
                status
            ))),
        }
    }
}
