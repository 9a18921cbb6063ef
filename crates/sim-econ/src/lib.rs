#![deny(warnings)]

//! Economic models: pricing and demand helpers for distsim.
//!
//! This module provides validated utilities for:
//! - Linear price elasticity on a clipped demand shock
//! - Promotional discount and markup pricing
//! - Seasonal volume with shared-shock demand response
//!
//! The financial derivation layer (taxes, margin layers) lives in
//! [`finance`].

pub mod finance;

pub use finance::{
    derive, DataIntegrityError, FinancialRecord, FinancialRules, LayerBasis, MarginLayerRule,
    TaxBase, TaxRule,
};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Elasticity coefficients must be finite.
    #[error("invalid elasticity: {0}")]
    InvalidElasticity(f32),
    /// Prices must be strictly positive.
    #[error("invalid price value")]
    InvalidPrice,
    /// The price factor `1 - elasticity * shock` dropped to zero or below.
    #[error("price factor is non-positive for shock {0}")]
    NonPositiveFactor(f32),
    /// Numeric conversion to or from floating point failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Realized price under linear elasticity on a demand shock.
///
/// `price = list * (1 - elasticity * shock)`. A positive coefficient makes
/// price fall when demand surges and rise when it collapses; with volume
/// responding to the same shock, high-volume low-margin periods emerge
/// without being scripted. Callers are expected to have validated that the
/// factor stays positive across their shock clip range; a non-positive
/// factor is still rejected here.
///
/// Example:
/// let list = Decimal::new(9000, 2); // 90.00
/// let p = elastic_price(list, 0.25, 1.0).unwrap();
/// assert!(p < list);
pub fn elastic_price(list: Decimal, elasticity: f32, shock: f32) -> Result<Decimal, EconError> {
    if !elasticity.is_finite() {
        return Err(EconError::InvalidElasticity(elasticity));
    }
    if list <= Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    if !shock.is_finite() {
        return Err(EconError::NonFinite);
    }
    let factor = 1.0 - elasticity * shock;
    if factor <= 0.0 {
        return Err(EconError::NonPositiveFactor(shock));
    }
    let factor_dec = Decimal::from_f32(factor).ok_or(EconError::NonFinite)?;
    Ok((list * factor_dec).round_dp(4))
}

/// Elastic price capped at list.
///
/// Non-promotional records never realize above list; upward elasticity
/// moves are absorbed at the list price.
pub fn capped_elastic_price(
    list: Decimal,
    elasticity: f32,
    shock: f32,
) -> Result<Decimal, EconError> {
    Ok(elastic_price(list, elasticity, shock)?.min(list))
}

/// Apply a promotional discount to a price. `discount_frac` in [0, 1).
///
/// Example:
/// let p = promo_price(Decimal::new(1000, 2), 0.1).unwrap();
/// assert_eq!(p, Decimal::new(900, 2));
pub fn promo_price(price: Decimal, discount_frac: f32) -> Result<Decimal, EconError> {
    if price <= Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    if !(0.0..1.0).contains(&discount_frac) || !discount_frac.is_finite() {
        return Err(EconError::NonFinite);
    }
    let f = Decimal::from_f32(1.0 - discount_frac).ok_or(EconError::NonFinite)?;
    Ok((price * f).round_dp(4))
}

/// Apply an explicit promotional markup to a price. `markup_frac` >= 0.
///
/// The only path by which a realized price may exceed list; the caller must
/// set the promo flag on the resulting record.
pub fn markup_price(price: Decimal, markup_frac: f32) -> Result<Decimal, EconError> {
    if price <= Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    if !markup_frac.is_finite() || markup_frac < 0.0 {
        return Err(EconError::NonFinite);
    }
    let f = Decimal::from_f32(1.0 + markup_frac).ok_or(EconError::NonFinite)?;
    Ok((price * f).round_dp(4))
}

/// Order volume for one record: base volume scaled by season and by the
/// shared demand shock, floored at zero.
///
/// `volume = base * seasonal * max(0, 1 + gain * shock + noise)`.
pub fn seasonal_volume(base: f64, seasonal: f64, shock: f64, gain: f64, noise: f64) -> f64 {
    let response = (1.0 + gain * shock + noise).max(0.0);
    base * seasonal * response
}
