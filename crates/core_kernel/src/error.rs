//! Errors raised while assembling the ledger from configuration

use thiserror::Error;
use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A configured currency or amount is not usable
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Configuration error: {key} {message}")]
    Configuration { key: String, message: String },
}

impl CoreError {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// The offending configuration key, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            CoreError::Configuration { key, .. } => Some(key),
            CoreError::Money(_) => None,
        }
    }
}
