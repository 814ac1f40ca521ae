//! Refill session data and the price formula.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bulk product on sale at the kiosk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Currency units per gram
    pub price_per_gram: u64,
    /// Shelf price of the packaged equivalent, for display only
    pub original_price: Option<u64>,
    /// Grams in the packaged equivalent, for display only
    pub original_gram: Option<u32>,
}

/// Everything the current customer has done so far.
///
/// `combined_weight`, when set, is never below `bottle_weight`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefillSession {
    pub bottle_weight: Option<u32>,
    pub combined_weight: Option<u32>,
    pub selected_product: Option<Product>,
    pub purchase_container: bool,
    pub total_price: Option<u64>,
}

impl RefillSession {
    /// Product weight dispensed, once both weighings are done
    pub fn fill_weight(&self) -> Option<u32> {
        self.combined_weight?.checked_sub(self.bottle_weight?)
    }
}

/// `price_per_gram × fill_weight + container_fee`. `None` on overflow.
pub fn total_price(price_per_gram: u64, fill_weight: u32, container_fee: Option<u64>) -> Option<u64> {
    price_per_gram
        .checked_mul(u64::from(fill_weight))?
        .checked_add(container_fee.unwrap_or(0))
}

/// Handed to checkout when the fill is confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
    pub product_id: String,
    pub bottle_weight: u32,
    pub combined_weight: u32,
    pub fill_weight: u32,
    pub price_per_gram: u64,
    /// Zero unless the customer bought a container
    pub container_fee: u64,
    pub total_price: u64,
    pub completed_at: DateTime<Utc>,
}
