//! Stochastic fact generation: lazy per period, restartable from any
//! period boundary, order-independent.
//!
//! Every (period, product, route, customer) combination owns a dedicated
//! ChaCha stream seeded from the global seed and the four identifiers, with
//! a fixed draw order inside the record: eligibility, demand shock, volume
//! noise, promo decision, chaos decision. Reordering iteration can never
//! change output, and any period can be regenerated in isolation.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use sim_core::{
    rng_for, Catalog, ConfigurationError, EventFlags, Period, SimulationParams, TransactionFact,
};
use tracing::debug;

/// All facts generated for one period.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodBatch {
    /// The period the facts belong to.
    pub period: Period,
    /// Facts in catalog iteration order (products outer, customers inner).
    pub facts: Vec<TransactionFact>,
}

/// The validated simulation engine for one run.
///
/// Construction fails fast on malformed parameters; after that, generation
/// cannot fail.
pub struct SalesEngine<'a> {
    catalog: &'a Catalog,
    params: &'a SimulationParams,
    seed: u64,
}

impl<'a> SalesEngine<'a> {
    /// Validate the parameters against the catalog and build the engine.
    pub fn new(
        catalog: &'a Catalog,
        params: &'a SimulationParams,
        seed: u64,
    ) -> Result<Self, ConfigurationError> {
        params.validate(catalog)?;
        Ok(Self {
            catalog,
            params,
            seed,
        })
    }

    /// Generate every fact of one period.
    ///
    /// A period where no combination samples as eligible emits an empty
    /// vector; that is a valid quiet period, not an error.
    pub fn generate_period(&self, period: &Period) -> Vec<TransactionFact> {
        let label = period.label();
        let month_idx = (period.month - 1) as usize;
        let (clip_lo, clip_hi) = self.params.shock_clip;
        let shock_dist = Normal::<f64>::new(0.0, 1.0).expect("unit normal is well-formed");
        let noise_dist = Normal::new(0.0, self.params.volume_noise_sigma)
            .expect("volume noise sigma validated non-negative");

        let mut facts = Vec::new();
        for product in &self.catalog.products {
            let seasonal = product.category.seasonality()[month_idx];
            let elasticity = self.params.elasticity_for(&product.id);
            for customer in &self.catalog.customers {
                let mut rng = rng_for(
                    self.seed,
                    &[
                        label.as_str(),
                        product.id.0.as_str(),
                        customer.route.0.as_str(),
                        customer.id.0.as_str(),
                    ],
                );

                // 1. Eligibility.
                if rng.gen::<f64>() >= customer.base_activity {
                    continue;
                }

                // 2. Shared demand shock, clipped.
                let shock: f64 = shock_dist
                    .sample(&mut rng)
                    .clamp(f64::from(clip_lo), f64::from(clip_hi));

                // 3. Volume noise.
                let noise: f64 = noise_dist.sample(&mut rng);
                let mut volume = sim_econ::seasonal_volume(
                    product.base_volume * customer.channel.volume_factor(),
                    seasonal,
                    shock,
                    self.params.demand_gain,
                    noise,
                );

                let mut flags = EventFlags::none();

                // 4. Pricing: elasticity against the shared shock, then an
                // optional promotion.
                let base_price =
                    sim_econ::capped_elastic_price(product.list_price, elasticity, shock as f32)
                        .expect("validated elasticity keeps the price factor positive");
                let mut realized_price = base_price;
                if rng.gen::<f64>() < self.params.promo_probability {
                    flags.promo = true;
                    realized_price = if rng.gen::<f64>() < self.params.promo_markup_share {
                        sim_econ::markup_price(base_price, self.params.promo_markup)
                            .expect("validated promo markup is non-negative")
                    } else {
                        sim_econ::promo_price(base_price, self.params.promo_discount)
                            .expect("validated promo discount is below one")
                    };
                }

                // 5. Chaos: stockout or capacity cap.
                if rng.gen::<f64>() < self.params.chaos_probability {
                    flags.chaos = true;
                    if rng.gen::<f64>() < self.params.stockout_share {
                        flags.stockout = true;
                        volume = 0.0;
                    } else {
                        let (lo, hi) = self.params.chaos_magnitude_range;
                        let magnitude = rng.gen_range(lo..=hi);
                        volume *= 1.0 - magnitude;
                    }
                }

                facts.push(TransactionFact {
                    period: label.clone(),
                    product_id: product.id.clone(),
                    route_id: customer.route.clone(),
                    customer_id: customer.id.clone(),
                    volume,
                    list_price: product.list_price,
                    realized_price,
                    flags,
                });
            }
        }
        debug!(period = %label, facts = facts.len(), "period generated");
        facts
    }

    /// Lazy stream over all periods of the run calendar.
    pub fn stream(&self) -> FactStream<'_> {
        self.stream_from(0)
    }

    /// Lazy stream starting at an arbitrary period boundary.
    pub fn stream_from(&self, start_index: usize) -> FactStream<'_> {
        FactStream {
            engine: self,
            cursor: start_index,
        }
    }
}

/// Iterator yielding one [`PeriodBatch`] per calendar period.
pub struct FactStream<'a> {
    engine: &'a SalesEngine<'a>,
    cursor: usize,
}

impl Iterator for FactStream<'_> {
    type Item = PeriodBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let period = *self.engine.catalog.periods.get(self.cursor)?;
        self.cursor += 1;
        Some(PeriodBatch {
            facts: self.engine.generate_period(&period),
            period,
        })
    }
}
