//! Managed objects of the order desk.

use cadre_core::escalation::Escalation;
use cadre_core::object::{Dependencies, ManagedObject};
use cadre_core::operation::Progress;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Stock levels shared by every process of an office.
#[derive(Debug, Clone, Default)]
pub struct Warehouse {
    stock: Arc<Mutex<HashMap<String, u32>>>,
}

impl Warehouse {
    /// Creates a warehouse holding `stock`.
    pub fn with_stock<'a>(stock: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let stock = stock
            .into_iter()
            .map(|(sku, quantity)| (sku.to_string(), quantity))
            .collect();
        Self {
            stock: Arc::new(Mutex::new(stock)),
        }
    }

    /// Units of `sku` on hand.
    #[must_use]
    pub fn on_hand(&self, sku: &str) -> u32 {
        self.stock.lock().get(sku).copied().unwrap_or(0)
    }

    /// Takes `quantity` units of `sku`, returning what was left when there
    /// are not enough.
    fn take(&self, sku: &str, quantity: u32) -> Result<(), u32> {
        let mut stock = self.stock.lock();
        let on_hand = stock.get(sku).copied().unwrap_or(0);
        if on_hand < quantity {
            return Err(on_hand);
        }
        stock.insert(sku.to_string(), on_hand - quantity);
        Ok(())
    }
}

/// Process-scoped view of the [`Warehouse`].
#[derive(Debug)]
pub struct Inventory {
    warehouse: Warehouse,
    /// Units taken by this process.
    pub taken: u32,
}

impl Inventory {
    /// Opens the warehouse for one process.
    #[must_use]
    pub fn open(warehouse: &Warehouse) -> Self {
        Self {
            warehouse: warehouse.clone(),
            taken: 0,
        }
    }

    /// Takes `quantity` units of `sku` out of stock.
    pub fn take(&mut self, sku: &str, quantity: u32) -> Result<(), OutOfStock> {
        self.warehouse
            .take(sku, quantity)
            .map_err(|available| OutOfStock {
                sku: sku.to_string(),
                requested: quantity,
                available,
            })?;
        self.taken += quantity;
        Ok(())
    }

    /// Units of `sku` left in the warehouse.
    #[must_use]
    pub fn remaining(&self, sku: &str) -> u32 {
        self.warehouse.on_hand(sku)
    }
}

impl ManagedObject for Inventory {
    fn release(&mut self) {
        tracing::debug!(taken = self.taken, "inventory closed");
    }
}

/// Raised when an order asks for more than the warehouse holds.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{sku}: requested {requested}, only {available} available")]
pub struct OutOfStock {
    /// Requested item.
    pub sku: String,
    /// Units requested.
    pub requested: u32,
    /// Units on hand.
    pub available: u32,
}

/// Lines reserved by one `reserve` function.
///
/// Depends on the [`Inventory`] under the key `"inventory"`.
#[derive(Debug, Default)]
pub struct Cart {
    /// Reserved `(sku, quantity)` lines.
    pub lines: Vec<(String, u32)>,
    /// Units the inventory had handed out when the cart was coordinated.
    pub opened_after: u32,
}

impl ManagedObject for Cart {
    fn coordinate(&mut self, dependencies: &Dependencies) -> Result<Progress, Escalation> {
        let inventory = dependencies.read::<Inventory>("inventory")?;
        self.opened_after = inventory.taken;
        Ok(Progress::Complete)
    }

    fn release(&mut self) {
        tracing::debug!(lines = self.lines.len(), "cart released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taking_reduces_stock() {
        let warehouse = Warehouse::with_stock([("widget", 5)]);
        let mut inventory = Inventory::open(&warehouse);
        inventory.take("widget", 3).unwrap();
        assert_eq!(warehouse.on_hand("widget"), 2);
        assert_eq!(inventory.taken, 3);
    }

    #[test]
    fn taking_too_much_leaves_stock_untouched() {
        let warehouse = Warehouse::with_stock([("widget", 1)]);
        let mut inventory = Inventory::open(&warehouse);
        let error = inventory.take("widget", 2).unwrap_err();
        assert_eq!(error.available, 1);
        assert_eq!(warehouse.on_hand("widget"), 1);
        assert_eq!(inventory.taken, 0);
    }

    #[test]
    fn unknown_sku_has_no_stock() {
        assert_eq!(Warehouse::default().on_hand("gadget"), 0);
    }
}
