//! Room balance reconciliation run

use serde::Serialize;
use tracing::{info, warn};

use core_kernel::{HealthCheckResult, HealthCheckable, RoomId};
use domain_booking::{
    BookingError, GatewayRegistry, PaymentGateway, ReconciliationReport, RoomBalanceService,
};

/// Result of one reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub reports: Vec<ReconciliationReport>,
}

impl ReconcileSummary {
    pub fn rooms_checked(&self) -> usize {
        self.reports.len()
    }

    pub fn diverged(&self) -> impl Iterator<Item = &ReconciliationReport> {
        self.reports.iter().filter(|r| r.diverged)
    }

    pub fn has_divergence(&self) -> bool {
        self.diverged().next().is_some()
    }
}

/// Reconciles one room, or every room with transactions
pub async fn reconcile(
    service: &RoomBalanceService,
    room: Option<RoomId>,
) -> Result<ReconcileSummary, BookingError> {
    let reports = match room {
        Some(room_id) => vec![service.reconcile_room(room_id).await?],
        None => service.reconcile_all().await?,
    };
    Ok(ReconcileSummary { reports })
}

/// Health of every registered gateway
pub async fn gateway_health(registry: &GatewayRegistry) -> Vec<HealthCheckResult> {
    let mut results = Vec::new();
    for gateway in registry.gateways() {
        let result = gateway.health_check().await;
        if result.is_healthy() {
            info!(gateway = gateway.gateway_id(), latency_ms = result.latency_ms, "Gateway healthy");
        } else {
            warn!(
                gateway = gateway.gateway_id(),
                status = ?result.status,
                message = ?result.message,
                "Gateway not healthy"
            );
        }
        results.push(result);
    }
    results
}
