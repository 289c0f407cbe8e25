//! Ledger Batch Jobs
//!
//! Wiring shared by the job binaries: configuration, tracing setup, and
//! construction of the payment and room-balance services from a store.
//!
//! # Binaries
//!
//! - `ledger-reconcile`: compares every room's derived balance with its
//!   booking ledgers and exits non-zero on divergence

pub mod config;
pub mod telemetry;
pub mod reconcile;

use std::sync::Arc;

use core_kernel::PortError;
use domain_booking::{
    GatewayRegistry, LedgerStore, PaymentMethod, PaymentService, RoomBalanceService,
    UppHttpGateway,
};

pub use config::JobsConfig;
pub use reconcile::{gateway_health, reconcile, ReconcileSummary};
pub use telemetry::init_tracing;

/// Registers the UPP gateway for `UPP_DEVICE` payments when it is enabled
pub fn gateway_registry(config: &JobsConfig) -> Result<GatewayRegistry, PortError> {
    let mut registry = GatewayRegistry::new();
    if config.upp.enabled {
        let gateway = UppHttpGateway::new(config.upp.clone())?;
        registry.register(PaymentMethod::UppDevice, Arc::new(gateway));
    }
    Ok(registry)
}

/// Builds the payment service over `store`
pub fn payment_service(
    config: &JobsConfig,
    store: Arc<dyn LedgerStore>,
) -> anyhow::Result<PaymentService> {
    let registry = gateway_registry(config)?;
    Ok(PaymentService::new(store, registry, config.payment_service_config()?))
}

pub fn room_balance_service(
    config: &JobsConfig,
    store: Arc<dyn LedgerStore>,
) -> anyhow::Result<RoomBalanceService> {
    Ok(RoomBalanceService::new(store, config.currency()?))
}
