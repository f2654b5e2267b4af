//! Example order desk built with Cadre.
//!
//! Each order runs as one process through three functions. Reservation is
//! handed to the `fulfilment` team and audited; running out of stock is
//! escalated to a back-order handler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Order process                                               │
//! │                                                              │
//! │  ┌──────────┐   ┌─────────────────────┐   ┌─────────┐        │
//! │  │ validate │──▶│ reserve (fulfilment)│──▶│ confirm │        │
//! │  └──────────┘   └──────────┬──────────┘   └─────────┘        │
//! │                            │ OutOfStock                      │
//! │                            ▼                                 │
//! │                      ┌───────────┐                           │
//! │                      │ backorder │                           │
//! │                      └───────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod audit;
mod objects;

pub use audit::AuditTrail;
pub use objects::{Cart, Inventory, OutOfStock, Warehouse};

use cadre_core::config::OfficeConfig;
use cadre_core::escalation::Escalation;
use cadre_core::index::ManagedObjectScope;
use cadre_core::object::source_fn;
use cadre_core::office::OfficeBuilder;
use cadre_core::team::Team;
use parking_lot::Mutex;
use std::sync::Arc;

/// Name of the function every order process starts at.
pub const ENTRY: &str = "validate";

/// An order for `quantity` units of `sku`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Ordered item.
    pub sku: String,
    /// Units ordered.
    pub quantity: u32,
}

impl Order {
    /// Creates an order.
    #[must_use]
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Raised by `validate` for orders that cannot be placed.
#[derive(Debug, thiserror::Error)]
#[error("invalid order: {0}")]
pub struct InvalidOrder(pub String);

/// Outcome of a successful `reserve`.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// The reserved order.
    pub order: Order,
    /// Units of the item still on hand.
    pub remaining: u32,
}

/// Append-only record of what the desk did, shared across processes.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Ledger {
    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::info!(entry = %entry, "ledger");
        self.entries.lock().push(entry);
    }

    /// Snapshot of every entry so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// Configures the order desk.
///
/// `fulfilment` executes reservations.
pub fn order_desk(
    config: OfficeConfig,
    warehouse: &Warehouse,
    ledger: &Ledger,
    fulfilment: impl Team,
) -> OfficeBuilder {
    let mut builder = OfficeBuilder::new(config);
    builder.add_team("fulfilment", fulfilment);

    let audit_ledger = ledger.clone();
    builder.add_governance("audit", move || AuditTrail::new(audit_ledger.clone()));

    let shared = warehouse.clone();
    builder
        .add_managed_object(
            "inventory",
            ManagedObjectScope::Process,
            source_fn(move || Ok(Inventory::open(&shared))),
        )
        .produces::<Inventory>();
    builder
        .add_managed_object(
            "cart",
            ManagedObjectScope::Function,
            source_fn(|| Ok(Cart::default())),
        )
        .produces::<Cart>()
        .with_dependency("inventory", "inventory")
        .with_governance("audit");

    builder
        .add_fn(ENTRY, |ctx| {
            let order = ctx
                .take_parameter::<Order>()
                .ok_or_else(|| InvalidOrder("no order given".to_string()))?;
            if order.sku.is_empty() {
                return Err(InvalidOrder("empty sku".to_string()).into());
            }
            if order.quantity == 0 {
                return Err(InvalidOrder(format!("zero units of {}", order.sku)).into());
            }
            ctx.set_result(order);
            Ok(())
        })
        .with_parameter::<Order>()
        .with_next("reserve");

    builder
        .add_fn("reserve", |ctx| {
            let order = ctx
                .take_parameter::<Order>()
                .ok_or_else(|| InvalidOrder("no order given".to_string()))?;
            ctx.object_mut::<Inventory>("inventory")?
                .take(&order.sku, order.quantity)?;
            ctx.object_mut::<Cart>("cart")?
                .lines
                .push((order.sku.clone(), order.quantity));
            let remaining = {
                let inventory = ctx.object::<Inventory>("inventory")?;
                inventory.remaining(&order.sku)
            };
            ctx.set_result(Reservation { order, remaining });
            Ok(())
        })
        .with_parameter::<Order>()
        .with_object("inventory")
        .with_object("cart")
        .with_governance("audit")
        .with_team("fulfilment")
        .with_escalation::<OutOfStock>("backorder")
        .with_next("confirm");

    let confirm_ledger = ledger.clone();
    builder
        .add_fn("confirm", move |ctx| {
            let reservation = ctx
                .take_parameter::<Reservation>()
                .ok_or_else(|| Escalation::msg("no reservation given"))?;
            confirm_ledger.record(format!(
                "confirmed {} x {} ({} left)",
                reservation.order.quantity, reservation.order.sku, reservation.remaining
            ));
            Ok(())
        })
        .with_parameter::<Reservation>();

    let backorder_ledger = ledger.clone();
    builder
        .add_fn("backorder", move |ctx| {
            let shortage = ctx
                .parameter::<Escalation>()
                .and_then(|escalation| escalation.downcast_ref::<OutOfStock>().cloned())
                .ok_or_else(|| Escalation::msg("backorder without shortage"))?;
            backorder_ledger.record(format!(
                "backordered {} x {}",
                shortage.requested - shortage.available,
                shortage.sku
            ));
            Ok(())
        })
        .with_parameter::<Escalation>();

    builder
}
