//! Reference catalog: products, routes, customers, and the monthly calendar.
//!
//! The catalog is generated once per run from the global seed and is
//! immutable afterwards. Master data (SKU list with DOP prices and unit
//! costs, channel mix, province weights) models a Dominican Republic FMCG
//! beverage distributor.

use crate::config::ConfigurationError;
use crate::seed::rng_for;
use crate::{CustomerId, Period, ProductId, RouteId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Product category, used to key seasonality profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Carbonated soft drinks.
    SoftDrinks,
    /// Bottled water.
    Water,
    /// Energy drinks.
    Energy,
    /// Sports/isotonic drinks.
    Isotonic,
    /// Juices and nectars.
    Juice,
}

impl Category {
    /// Monthly demand multipliers, January through December.
    ///
    /// Soft drinks peak in the December holidays and the summer months;
    /// water and isotonics follow the hot season; energy drinks are flat.
    pub fn seasonality(&self) -> [f64; 12] {
        match self {
            Category::SoftDrinks => [
                0.95, 0.92, 1.00, 1.02, 1.05, 1.10, 1.12, 1.10, 1.00, 0.98, 1.05, 1.25,
            ],
            Category::Water => [
                0.90, 0.90, 1.00, 1.08, 1.15, 1.20, 1.22, 1.20, 1.05, 0.95, 0.88, 0.92,
            ],
            Category::Energy => [
                1.00, 1.00, 1.00, 1.00, 1.02, 1.04, 1.04, 1.02, 1.00, 1.00, 1.00, 1.02,
            ],
            Category::Isotonic => [
                0.92, 0.94, 1.02, 1.08, 1.12, 1.15, 1.15, 1.12, 1.02, 0.96, 0.90, 0.94,
            ],
            Category::Juice => [
                1.02, 1.00, 1.00, 1.02, 1.02, 1.00, 1.00, 1.00, 1.02, 1.00, 1.02, 1.10,
            ],
        }
    }
}

/// Distribution channel a customer buys through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Traditional corner store ("colmado").
    Colmado,
    /// Supermarket chain.
    SupermarketChain,
    /// Independent supermarket.
    SupermarketIndep,
    /// Hotels, restaurants, catering.
    Horeca,
    /// Wholesale.
    Wholesale,
}

impl Channel {
    /// Share of the customer population in this channel.
    pub fn weight(&self) -> f64 {
        match self {
            Channel::Colmado => 0.55,
            Channel::SupermarketChain => 0.15,
            Channel::SupermarketIndep => 0.10,
            Channel::Horeca => 0.12,
            Channel::Wholesale => 0.08,
        }
    }

    /// Baseline probability that a customer in this channel places an order
    /// for a given product in a given period.
    pub fn base_activity(&self) -> f64 {
        match self {
            Channel::Colmado => 0.40,
            Channel::SupermarketChain => 0.70,
            Channel::SupermarketIndep => 0.55,
            Channel::Horeca => 0.50,
            Channel::Wholesale => 0.65,
        }
    }

    /// Order-size multiplier relative to the product's base volume.
    pub fn volume_factor(&self) -> f64 {
        match self {
            Channel::Colmado => 0.6,
            Channel::SupermarketChain => 2.5,
            Channel::SupermarketIndep => 1.5,
            Channel::Horeca => 1.2,
            Channel::Wholesale => 3.0,
        }
    }

    const ALL: [Channel; 5] = [
        Channel::Colmado,
        Channel::SupermarketChain,
        Channel::SupermarketIndep,
        Channel::Horeca,
        Channel::Wholesale,
    ];
}

/// A product SKU.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// SKU identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Category, keys the seasonality profile.
    pub category: Category,
    /// List price in DOP.
    pub list_price: Decimal,
    /// Production cost per unit in DOP.
    pub unit_cost: Decimal,
    /// Baseline units per order line before channel and season effects.
    pub base_volume: f64,
}

/// A distribution route from a distribution center to a province.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Route identifier.
    pub id: RouteId,
    /// Display name.
    pub name: String,
    /// Destination province.
    pub province: String,
}

/// A customer served by exactly one home route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer identifier.
    pub id: CustomerId,
    /// Channel the customer buys through.
    pub channel: Channel,
    /// Home route serving this customer.
    pub route: RouteId,
    /// Per-period order probability, in (0, 1].
    pub base_activity: f64,
}

/// Sizing knobs for catalog generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogParams {
    /// Number of customers to generate.
    pub customers: usize,
    /// Number of routes to generate.
    pub routes: usize,
    /// First calendar year of the simulated history.
    pub start_year: i32,
}

impl Default for CatalogParams {
    fn default() -> Self {
        Self {
            customers: 120,
            routes: 10,
            start_year: 2022,
        }
    }
}

/// The immutable per-run reference catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Product dimension.
    pub products: Vec<Product>,
    /// Route dimension.
    pub routes: Vec<Route>,
    /// Customer dimension.
    pub customers: Vec<Customer>,
    /// Monthly calendar covering the whole simulated history.
    pub periods: Vec<Period>,
}

// Core SKU master data: (sku, name, category, list price DOP cents,
// unit cost DOP cents, base units per order line).
const CORE_SKUS: [(&str, &str, Category, i64, i64, f64); 10] = [
    ("REF-CC-001", "Coca Cola 2L", Category::SoftDrinks, 9000, 1625, 12.0),
    ("REF-CC-003", "Coca Cola 0.5L", Category::SoftDrinks, 3500, 605, 24.0),
    ("REF-CC-006", "Coca Cola Lata 355ml", Category::SoftDrinks, 4000, 625, 24.0),
    ("REF-SP-001", "Sprite 2L", Category::SoftDrinks, 9500, 1750, 12.0),
    ("REF-FA-001", "Fanta Naranja 2L", Category::SoftDrinks, 8000, 1500, 12.0),
    ("AGU-DS-001", "Dasani 1.5L", Category::Water, 5500, 340, 12.0),
    ("AGU-DS-002", "Dasani 600ml", Category::Water, 3500, 180, 24.0),
    ("ISO-PW-001", "Powerade Azul 500ml", Category::Isotonic, 4000, 590, 24.0),
    ("NRG-MN-001", "Monster Original 500ml", Category::Energy, 15000, 900, 12.0),
    ("JUG-DV-002", "Del Valle Manzana 1L", Category::Juice, 7000, 675, 12.0),
];

// Province weights for route placement (share of national volume).
const PROVINCES: [(&str, f64); 6] = [
    ("Santo Domingo", 0.45),
    ("Santiago", 0.18),
    ("La Vega", 0.10),
    ("San Cristobal", 0.10),
    ("Puerto Plata", 0.09),
    ("La Altagracia", 0.08),
];

impl Catalog {
    /// Generate the full catalog for one run.
    ///
    /// Deterministic given (`params`, `years`, `seed`); all sampling runs on
    /// a dedicated seed stream so later additions to the engine cannot
    /// perturb catalog content.
    pub fn generate(
        params: &CatalogParams,
        years: u32,
        seed: u64,
    ) -> Result<Catalog, ConfigurationError> {
        if years == 0 {
            return Err(ConfigurationError::NoYears);
        }
        if params.routes == 0 {
            return Err(ConfigurationError::EmptyCatalog("route"));
        }
        if params.customers == 0 {
            return Err(ConfigurationError::EmptyCatalog("customer"));
        }

        let products: Vec<Product> = CORE_SKUS
            .iter()
            .map(|(sku, name, category, price_cents, cost_cents, base_volume)| Product {
                id: ProductId((*sku).to_string()),
                name: (*name).to_string(),
                category: *category,
                list_price: Decimal::new(*price_cents, 2),
                unit_cost: Decimal::new(*cost_cents, 2),
                base_volume: *base_volume,
            })
            .collect();

        let mut rng = rng_for(seed, &["catalog"]);

        let province_weights: Vec<f64> = PROVINCES.iter().map(|p| p.1).collect();
        let routes: Vec<Route> = (0..params.routes)
            .map(|i| {
                let province = PROVINCES[weighted_pick(&mut rng, &province_weights)].0;
                let id = RouteId(format!("RUT-{:05}", i + 1));
                let name = format!("Ruta {:04}-{}", i + 1, province);
                Route {
                    id,
                    name,
                    province: province.to_string(),
                }
            })
            .collect();

        let channel_weights: Vec<f64> = Channel::ALL.iter().map(|c| c.weight()).collect();
        let customers: Vec<Customer> = (0..params.customers)
            .map(|i| {
                let channel = Channel::ALL[weighted_pick(&mut rng, &channel_weights)];
                let route = routes[rng.gen_range(0..routes.len())].id.clone();
                let jitter: f64 = rng.gen_range(0.85..1.15);
                let base_activity = (channel.base_activity() * jitter).clamp(0.01, 1.0);
                Customer {
                    id: CustomerId(format!("CLI-{:06}", i + 1)),
                    channel,
                    route,
                    base_activity,
                }
            })
            .collect();

        let periods: Vec<Period> = (0..years * 12)
            .map(|i| Period {
                index: i,
                year: params.start_year + (i / 12) as i32,
                month: i % 12 + 1,
            })
            .collect();

        debug!(
            products = products.len(),
            routes = routes.len(),
            customers = customers.len(),
            periods = periods.len(),
            "catalog generated"
        );

        Ok(Catalog {
            products,
            routes,
            customers,
            periods,
        })
    }

    /// Look up a product by id.
    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    /// Look up a route by id.
    pub fn route(&self, id: &RouteId) -> Option<&Route> {
        self.routes.iter().find(|r| &r.id == id)
    }

    /// Last calendar year of the simulated history.
    pub fn final_year(&self) -> i32 {
        self.periods.last().map(|p| p.year).unwrap_or(0)
    }
}

/// Category-typical elasticity coefficients for the core SKU list.
///
/// Convenience for default configurations; every coefficient remains
/// overridable through [`crate::SimulationParams::elasticity`].
pub fn default_elasticity() -> std::collections::BTreeMap<ProductId, f32> {
    CORE_SKUS
        .iter()
        .map(|(sku, _, category, ..)| {
            let coefficient = match category {
                Category::SoftDrinks => 0.25,
                Category::Water => 0.30,
                Category::Energy => 0.10,
                Category::Isotonic => 0.20,
                Category::Juice => 0.20,
            };
            (ProductId((*sku).to_string()), coefficient)
        })
        .collect()
}

/// Index into `weights` drawn proportionally to the weight values.
fn weighted_pick(rng: &mut ChaCha8Rng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut draw = rng.gen_range(0.0..total);
    for (i, w) in weights.iter().enumerate() {
        if draw < *w {
            return i;
        }
        draw -= w;
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    #[test]
    fn generation_is_deterministic() {
        let params = CatalogParams::default();
        let a = Catalog::generate(&params, 4, 420).unwrap();
        let b = Catalog::generate(&params, 4, 420).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let params = CatalogParams::default();
        let a = Catalog::generate(&params, 4, 420).unwrap();
        let b = Catalog::generate(&params, 4, 421).unwrap();
        assert_ne!(a.customers, b.customers);
    }

    #[test]
    fn ids_are_unique() {
        let cat = Catalog::generate(&CatalogParams::default(), 4, 420).unwrap();
        let products: BTreeSet<_> = cat.products.iter().map(|p| &p.id).collect();
        let routes: BTreeSet<_> = cat.routes.iter().map(|r| &r.id).collect();
        let customers: BTreeSet<_> = cat.customers.iter().map(|c| &c.id).collect();
        assert_eq!(products.len(), cat.products.len());
        assert_eq!(routes.len(), cat.routes.len());
        assert_eq!(customers.len(), cat.customers.len());
    }

    #[test]
    fn customers_reference_generated_routes() {
        let cat = Catalog::generate(&CatalogParams::default(), 1, 420).unwrap();
        for c in &cat.customers {
            assert!(cat.route(&c.route).is_some(), "dangling route {:?}", c.route);
        }
    }

    #[test]
    fn calendar_covers_years_in_order() {
        let params = CatalogParams {
            start_year: 2022,
            ..CatalogParams::default()
        };
        let cat = Catalog::generate(&params, 4, 420).unwrap();
        assert_eq!(cat.periods.len(), 48);
        assert_eq!(cat.periods[0].label(), "2022-01");
        assert_eq!(cat.periods[47].label(), "2025-12");
        assert_eq!(cat.final_year(), 2025);
        for (i, p) in cat.periods.iter().enumerate() {
            assert_eq!(p.index as usize, i);
        }
    }

    #[test]
    fn empty_sizing_is_rejected() {
        let mut params = CatalogParams::default();
        params.routes = 0;
        assert!(matches!(
            Catalog::generate(&params, 4, 420),
            Err(ConfigurationError::EmptyCatalog("route"))
        ));
        let mut params = CatalogParams::default();
        params.customers = 0;
        assert!(matches!(
            Catalog::generate(&params, 4, 420),
            Err(ConfigurationError::EmptyCatalog("customer"))
        ));
        assert!(matches!(
            Catalog::generate(&CatalogParams::default(), 0, 420),
            Err(ConfigurationError::NoYears)
        ));
    }

    #[test]
    fn default_elasticity_covers_only_catalog_products() {
        let cat = Catalog::generate(&CatalogParams::default(), 1, 420).unwrap();
        let map = default_elasticity();
        assert_eq!(map.len(), cat.products.len());
        for id in map.keys() {
            assert!(cat.product(id).is_some());
        }
    }

    #[test]
    fn seasonality_profiles_are_positive() {
        for cat in [
            Category::SoftDrinks,
            Category::Water,
            Category::Energy,
            Category::Isotonic,
            Category::Juice,
        ] {
            for m in cat.seasonality() {
                assert!(m > 0.0);
            }
        }
    }

    proptest! {
        #[test]
        fn activity_probabilities_in_range(seed in 0u64..10_000) {
            let cat = Catalog::generate(&CatalogParams::default(), 1, seed).unwrap();
            for c in &cat.customers {
                prop_assert!(c.base_activity > 0.0 && c.base_activity <= 1.0);
            }
        }

        #[test]
        fn weighted_pick_in_bounds(seed in 0u64..10_000) {
            let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
            let weights = [0.5, 0.3, 0.2];
            let i = weighted_pick(&mut rng, &weights);
            prop_assert!(i < weights.len());
        }
    }
}
