//! Order desk CLI.
//!
//! Places one order per `sku=quantity` argument against a small in-memory
//! warehouse. Orders are placed concurrently; reservations run on a
//! blocking-pool worker team.
//!
//! # Usage
//!
//! ```bash
//! order-desk <sku=quantity>...
//! ```
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=debug order-desk widget=3 gadget=5 widget=4
//! ```

use cadre_core::config::OfficeConfig;
use cadre_execution::office::Office;
use cadre_execution::teams::WorkerTeam;
use cadre_tracing::{TracingFormat, TracingSetup};
use example::{ENTRY, Ledger, Order, Warehouse};
use std::time::Duration;
use tracing::Level;

const WORKERS: usize = 4;

fn parse(argument: &str) -> Option<Order> {
    let (sku, quantity) = argument.split_once('=')?;
    Some(Order::new(sku, quantity.parse().ok()?))
}

#[tokio::main]
async fn main() {
    let level = if std::env::var_os("RUST_LOG").is_some() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    TracingSetup::new()
        .with_level(level)
        .with_format(TracingFormat::Compact)
        .init();

    let orders: Vec<Order> = std::env::args().skip(1).filter_map(|arg| parse(&arg)).collect();
    if orders.is_empty() {
        tracing::error!("usage: order-desk <sku=quantity>...");
        std::process::exit(1);
    }

    let warehouse = Warehouse::with_stock([("widget", 6), ("gadget", 2)]);
    let ledger = Ledger::default();
    let config = OfficeConfig::default().with_default_async_timeout(Duration::from_secs(2));
    let metadata = example::order_desk(config, &warehouse, &ledger, WorkerTeam::current(WORKERS))
        .build();
    if !metadata.issues().is_empty() {
        for issue in metadata.issues() {
            tracing::error!(%issue, "configuration issue");
        }
        std::process::exit(1);
    }

    let office = Office::new(metadata);
    let monitor = office.spawn_monitor();

    let mut handles = Vec::with_capacity(orders.len());
    for order in orders {
        match office.invoke_process(ENTRY, Some(Box::new(order))) {
            Ok(handle) => handles.push(handle),
            Err(error) => tracing::error!(%error, "order rejected"),
        }
    }

    for handle in handles {
        let outcome = handle.completed().await;
        match outcome.escalation() {
            None => tracing::info!(process = %handle.id(), "order processed"),
            Some(cause) => tracing::warn!(process = %handle.id(), %cause, "order failed"),
        }
    }
    monitor.abort();

    tracing::info!(
        widget = warehouse.on_hand("widget"),
        gadget = warehouse.on_hand("gadget"),
        entries = ledger.entries().len(),
        "desk closed"
    );
}
