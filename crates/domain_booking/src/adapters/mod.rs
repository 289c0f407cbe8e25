//! Gateway adapters

pub mod upp;

pub use upp::{UppHttpGateway, UppConfig, CircuitBreakerConfig};
