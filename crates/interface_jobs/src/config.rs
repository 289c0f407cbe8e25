//! Job configuration
//!
//! Loaded from an optional `ledger.{toml,yaml,json}` file and then from
//! environment variables prefixed with `LEDGER_`, using `__` between
//! nested keys:
//!
//! ```bash
//! LEDGER_DATABASE__URL=postgres://localhost/rental_ledger
//! LEDGER_UPP__BASE_URL=http://upp.internal:3000
//! LEDGER_GATEWAY_TIMEOUT_SECS=15
//! LEDGER_LOG_JSON=true
//! ```

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use core_kernel::{CoreError, Currency};
use domain_booking::{PaymentServiceConfig, UppConfig};
use infra_db::DatabaseConfig;

/// Configuration shared by the ledger batch jobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub database: DatabaseConfig,
    pub upp: UppConfig,
    /// Router-side bound on one device gateway call
    pub gateway_timeout_secs: u64,
    pub recent_payments_limit: usize,
    /// ISO code of the ledger currency
    pub currency: String,
    pub journal_room_transactions: bool,
    /// PENDING device payments older than this need attention
    pub stale_pending_after_mins: i64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            upp: UppConfig::default(),
            gateway_timeout_secs: 30,
            recent_payments_limit: 10,
            currency: "USD".to_string(),
            journal_room_transactions: true,
            stale_pending_after_mins: 30,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl JobsConfig {
    /// Loads `.env`, then the optional config file and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_environment(Self::environment())
    }

    /// The environment source with the `LEDGER_` prefix and `__` nesting
    pub fn environment() -> config::Environment {
        config::Environment::with_prefix("LEDGER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name("ledger").required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config
            .validate()
            .map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        self.currency()?;
        if self.gateway_timeout_secs == 0 {
            return Err(CoreError::configuration("gateway_timeout_secs", "must be positive"));
        }
        if self.recent_payments_limit == 0 {
            return Err(CoreError::configuration("recent_payments_limit", "must be positive"));
        }
        if self.stale_pending_after_mins < 0 {
            return Err(CoreError::configuration("stale_pending_after_mins", "must not be negative"));
        }
        if self.database.url.trim().is_empty() {
            return Err(CoreError::configuration("database.url", "must not be empty"));
        }
        Ok(())
    }

    pub fn currency(&self) -> Result<Currency, CoreError> {
        Ok(Currency::from_str(&self.currency)?)
    }

    /// Router settings derived from this configuration
    pub fn payment_service_config(&self) -> Result<PaymentServiceConfig, CoreError> {
        Ok(PaymentServiceConfig {
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
            recent_payments_limit: self.recent_payments_limit,
            currency: self.currency()?,
            stale_pending_after: ChronoDuration::minutes(self.stale_pending_after_mins),
            journal_room_transactions: self.journal_room_transactions,
        })
    }
}
