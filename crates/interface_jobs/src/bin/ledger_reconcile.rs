//! Room balance reconciliation job
//!
//! Derives each room's balance from its transaction history, compares it
//! with the balances of the room's active bookings, and logs every
//! divergence under the `ledger::integrity` target.
//!
//! # Usage
//!
//! ```bash
//! LEDGER_DATABASE__URL=postgres://... ledger-reconcile
//! ledger-reconcile --room 0192f0c4-7a51-7c3e-9d1e-2b1f0c3a4d5e --json
//! ```
//!
//! Exit status is 0 when every room agrees, 2 when any room diverges.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

use core_kernel::RoomId;
use infra_db::{create_pool, PostgresLedgerStore};
use interface_jobs::{gateway_health, gateway_registry, init_tracing, reconcile, room_balance_service, JobsConfig};

#[derive(Debug, Parser)]
#[command(name = "ledger-reconcile", about = "Reconcile room balances against booking ledgers")]
struct Args {
    /// Reconcile a single room
    #[arg(long)]
    room: Option<Uuid>,

    /// Print the reports as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Skip the device gateway health check
    #[arg(long)]
    skip_gateway_check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let config = JobsConfig::load().context("loading configuration")?;
    init_tracing(&config.log_level, config.log_json);

    tracing::info!(room = ?args.room, "Starting ledger reconciliation");

    let pool = create_pool(config.database.clone())
        .await
        .context("connecting to database")?;
    let store = Arc::new(PostgresLedgerStore::new(pool));
    let service = room_balance_service(&config, store)?;

    let summary = reconcile(&service, args.room.map(RoomId::from_uuid))
        .await
        .context("reconciling room balances")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary.reports)?);
    }

    if !args.skip_gateway_check {
        let registry = gateway_registry(&config).context("building gateway registry")?;
        gateway_health(&registry).await;
    }

    let diverged = summary.diverged().count();
    tracing::info!(rooms = summary.rooms_checked(), diverged, "Reconciliation complete");

    Ok(if diverged > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
