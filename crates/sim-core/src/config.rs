//! Simulation parameter surface and the run-wide configuration error type.
//!
//! All validation happens before any generation starts; a
//! [`ConfigurationError`] always aborts the whole run.

use crate::catalog::Catalog;
use crate::ProductId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Invalid or inconsistent input configuration, detected before generation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    /// An elasticity coefficient references a product not in the catalog.
    #[error("elasticity coefficient references unknown product: {0}")]
    UnknownProduct(String),
    /// A probability field is outside [0, 1].
    #[error("{field} must be a probability in [0,1], got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },
    /// A (min, max) range field has min > max.
    #[error("{field} range is invalid: min {min} must not exceed max {max}")]
    InvalidRange { field: &'static str, min: f64, max: f64 },
    /// The elasticity coefficient would let the price factor reach zero
    /// inside the configured shock clip range.
    #[error("elasticity {coefficient} for {product} reaches a non-positive price within shock clip +/-{clip}")]
    PriceFactorCrossesZero {
        product: String,
        coefficient: f32,
        clip: f32,
    },
    /// A catalog dimension would be empty.
    #[error("catalog must contain at least one {0}")]
    EmptyCatalog(&'static str),
    /// The simulated history must cover at least one year.
    #[error("years must be >= 1")]
    NoYears,
    /// A tax rule without a code cannot be reported in tax detail.
    #[error("tax rule at position {index} has an empty code")]
    EmptyTaxCode { index: usize },
    /// A margin layer without a name cannot be reported as a column.
    #[error("margin layer at position {index} has an empty name")]
    EmptyLayerName { index: usize },
    /// A tax or layer rate is outside [0, 1).
    #[error("{kind} rate for {name} must be in [0,1), got {rate}")]
    RateOutOfRange {
        kind: &'static str,
        name: String,
        rate: Decimal,
    },
    /// A churn factor weight is negative.
    #[error("churn weight {factor} must be non-negative, got {weight}")]
    NegativeWeight { factor: &'static str, weight: f64 },
    /// All churn weights are zero; the score would be undefined.
    #[error("churn weights must not all be zero")]
    ZeroWeightSum,
    /// OOS concentration threshold outside (0, 1].
    #[error("oos concentration threshold must be in (0,1], got {0}")]
    ThresholdOutOfRange(f64),
    /// The projection needs at least one sampled path.
    #[error("projection path count must be >= 1")]
    NoProjectionPaths,
    /// Stance parameters do not keep the optimistic path factor above the
    /// pessimistic one across the shock clip range.
    #[error("optimistic stance must dominate pessimistic at z={z}: factor {optimistic} < {pessimistic}")]
    StancesNotOrdered {
        z: f64,
        optimistic: f64,
        pessimistic: f64,
    },
}

/// Engine knobs for the stochastic fact generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Years of history to simulate.
    pub years: u32,
    /// Price sensitivity to the demand shock, per product.
    pub elasticity: BTreeMap<ProductId, f32>,
    /// Probability that a chaos event hits a record.
    pub chaos_probability: f64,
    /// Uniform range for the capacity-cap magnitude of a chaos price shock.
    pub chaos_magnitude_range: (f64, f64),
    /// Probability that a promotion applies to a record.
    pub promo_probability: f64,
    /// Clip bounds for the standard-normal demand shock.
    pub shock_clip: (f32, f32),
    /// Volume response to the shared demand shock.
    pub demand_gain: f64,
    /// Standard deviation of the multiplicative volume noise.
    pub volume_noise_sigma: f64,
    /// Discount fraction applied by a discount promotion.
    pub promo_discount: f32,
    /// Markup fraction applied by a markup promotion.
    pub promo_markup: f32,
    /// Fraction of promotions that are markups rather than discounts.
    pub promo_markup_share: f64,
    /// Fraction of chaos events that are stockouts rather than capacity caps.
    pub stockout_share: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            years: 4,
            elasticity: BTreeMap::new(),
            chaos_probability: 0.04,
            chaos_magnitude_range: (0.3, 0.9),
            promo_probability: 0.08,
            shock_clip: (-2.5, 2.5),
            demand_gain: 0.25,
            volume_noise_sigma: 0.15,
            promo_discount: 0.10,
            promo_markup: 0.05,
            promo_markup_share: 0.0,
            stockout_share: 0.5,
        }
    }
}

impl SimulationParams {
    /// Check every parameter against the catalog. Fails fast; nothing may
    /// be generated from invalid parameters.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), ConfigurationError> {
        if self.years == 0 {
            return Err(ConfigurationError::NoYears);
        }
        for (field, value) in [
            ("chaos_probability", self.chaos_probability),
            ("promo_probability", self.promo_probability),
            ("promo_markup_share", self.promo_markup_share),
            ("stockout_share", self.stockout_share),
        ] {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(ConfigurationError::ProbabilityOutOfRange { field, value });
            }
        }
        let (lo, hi) = self.chaos_magnitude_range;
        if !(lo.is_finite() && hi.is_finite()) || lo > hi || lo < 0.0 || hi > 1.0 {
            return Err(ConfigurationError::InvalidRange {
                field: "chaos_magnitude_range",
                min: lo,
                max: hi,
            });
        }
        let (clip_lo, clip_hi) = self.shock_clip;
        if !(clip_lo.is_finite() && clip_hi.is_finite()) || clip_lo >= clip_hi {
            return Err(ConfigurationError::InvalidRange {
                field: "shock_clip",
                min: clip_lo as f64,
                max: clip_hi as f64,
            });
        }
        if !(0.0..1.0).contains(&self.promo_discount) {
            return Err(ConfigurationError::ProbabilityOutOfRange {
                field: "promo_discount",
                value: self.promo_discount as f64,
            });
        }
        if !self.promo_markup.is_finite() || self.promo_markup < 0.0 {
            return Err(ConfigurationError::ProbabilityOutOfRange {
                field: "promo_markup",
                value: self.promo_markup as f64,
            });
        }
        if !self.volume_noise_sigma.is_finite() || self.volume_noise_sigma < 0.0 {
            return Err(ConfigurationError::InvalidRange {
                field: "volume_noise_sigma",
                min: 0.0,
                max: self.volume_noise_sigma,
            });
        }
        if !self.demand_gain.is_finite() {
            return Err(ConfigurationError::InvalidRange {
                field: "demand_gain",
                min: self.demand_gain,
                max: self.demand_gain,
            });
        }
        let max_abs_shock = clip_lo.abs().max(clip_hi.abs());
        for (product, coefficient) in &self.elasticity {
            if catalog.product(product).is_none() {
                return Err(ConfigurationError::UnknownProduct(product.0.clone()));
            }
            if !coefficient.is_finite() || coefficient.abs() * max_abs_shock >= 1.0 {
                return Err(ConfigurationError::PriceFactorCrossesZero {
                    product: product.0.clone(),
                    coefficient: *coefficient,
                    clip: max_abs_shock,
                });
            }
        }
        Ok(())
    }

    /// Elasticity coefficient for a product, zero when unconfigured.
    pub fn elasticity_for(&self, product: &ProductId) -> f32 {
        self.elasticity.get(product).copied().unwrap_or(0.0)
    }
}
