#![deny(warnings)]

//! Core domain models and invariants for distsim.
//!
//! This crate defines the reference catalog (products, routes, customers,
//! calendar), the transaction fact record produced by the simulation engine,
//! the simulation parameter surface with fail-fast validation, and the
//! per-entity seed derivation that keeps every draw stream independent of
//! iteration order.

pub mod catalog;
pub mod config;
pub mod seed;

pub use catalog::{Catalog, CatalogParams, Category, Channel, Customer, Product, Route};
pub use config::{ConfigurationError, SimulationParams};
pub use seed::{derive_seed, rng_for};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unique identifier for a product SKU, e.g. "REF-CC-001".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// Unique identifier for a distribution route, e.g. "RUT-00003".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteId(pub String);

/// Unique identifier for a customer, e.g. "CLI-000042".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

/// One monthly period of the simulated calendar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Zero-based position in the run calendar.
    pub index: u32,
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
}

impl Period {
    /// Partition label, e.g. "2022-01".
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// First calendar day of the period.
    pub fn first_day(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

/// Operational event markers attached to a transaction fact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    /// An out-of-stock event zeroed the volume of this record.
    pub stockout: bool,
    /// A promotion changed the realized price (discount or explicit markup).
    pub promo: bool,
    /// Any injected chaos event (stockout or capacity cap) hit this record.
    pub chaos: bool,
}

impl EventFlags {
    /// No events fired.
    pub fn none() -> Self {
        Self::default()
    }
}

/// One simulated sales record for a (period, product, route, customer)
/// combination sampled as active.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionFact {
    /// Period partition label, e.g. "2023-07".
    pub period: String,
    /// Product sold.
    pub product_id: ProductId,
    /// Route that served the customer.
    pub route_id: RouteId,
    /// Buying customer.
    pub customer_id: CustomerId,
    /// Units sold (physical quantity, >= 0).
    pub volume: f64,
    /// Catalog list price in DOP (> 0).
    pub list_price: Decimal,
    /// Price actually realized in DOP (> 0).
    pub realized_price: Decimal,
    /// Operational event markers.
    pub flags: EventFlags,
}

impl TransactionFact {
    /// Deterministic reference string joining the fact's identifiers.
    ///
    /// Derived records point back at facts through this reference, so it
    /// must stay stable across runs with the same configuration and seed.
    pub fn transaction_ref(&self) -> String {
        format!(
            "TX-{}-{}-{}-{}",
            self.period, self.product_id.0, self.route_id.0, self.customer_id.0
        )
    }
}
