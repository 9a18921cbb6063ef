//! Financial derivation: ordered tax rules and margin layers over Decimal.
//!
//! Pure and deterministic: a [`FinancialRecord`] is a function of the fact,
//! the product's unit cost, and the configured rules. Compounding order is
//! a business invariant, so rules are an explicit ordered sequence, never a
//! map. All monetary amounts are rounded to 4 decimal places as they are
//! produced; the net margin is the exact remainder, which makes the
//! reconciliation identity hold by construction.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{ConfigurationError, TransactionFact};
use thiserror::Error;

/// Base a tax rule applies its rate to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxBase {
    /// Gross revenue of the record.
    Gross,
    /// Gross revenue minus all taxes applied before this rule.
    NetOfPriorTaxes,
}

/// One jurisdiction tax rule, applied in declared order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaxRule {
    /// Tax code reported in tax detail, e.g. "ITBIS".
    pub code: String,
    /// Base the rate applies to.
    pub base: TaxBase,
    /// Rate in [0, 1).
    pub rate: Decimal,
}

/// Base a margin layer applies its rate to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerBasis {
    /// Gross revenue of the record.
    GrossRevenue,
    /// Remainder left after taxes, cost of goods, and prior layers.
    RunningRemainder,
}

/// One named margin deduction, applied in declared order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarginLayerRule {
    /// Layer name; becomes the `margin_<name>` output column.
    pub name: String,
    /// Base the rate applies to.
    pub basis: LayerBasis,
    /// Rate in [0, 1).
    pub rate: Decimal,
}

/// The ordered tax and margin rule set for a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialRules {
    /// Tax rules, applied first, in order.
    pub tax_rules: Vec<TaxRule>,
    /// Margin layers, applied to the post-tax post-cost remainder, in order.
    pub margin_layers: Vec<MarginLayerRule>,
}

impl Default for FinancialRules {
    /// Dominican Republic defaults: ISC (selective consumption tax) on
    /// gross, then ITBIS 18% net of prior taxes; logistics, trade discount,
    /// and channel rebate margin layers.
    fn default() -> Self {
        Self {
            tax_rules: vec![
                TaxRule {
                    code: "ISC".to_string(),
                    base: TaxBase::Gross,
                    rate: Decimal::new(10, 2),
                },
                TaxRule {
                    code: "ITBIS".to_string(),
                    base: TaxBase::NetOfPriorTaxes,
                    rate: Decimal::new(18, 2),
                },
            ],
            margin_layers: vec![
                MarginLayerRule {
                    name: "logistics".to_string(),
                    basis: LayerBasis::GrossRevenue,
                    rate: Decimal::new(8, 2),
                },
                MarginLayerRule {
                    name: "trade_discount".to_string(),
                    basis: LayerBasis::RunningRemainder,
                    rate: Decimal::new(5, 2),
                },
                MarginLayerRule {
                    name: "channel_rebate".to_string(),
                    basis: LayerBasis::RunningRemainder,
                    rate: Decimal::new(3, 2),
                },
            ],
        }
    }
}

impl FinancialRules {
    /// Validate codes, names, and rates. Fails fast before any derivation.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (index, rule) in self.tax_rules.iter().enumerate() {
            if rule.code.trim().is_empty() {
                return Err(ConfigurationError::EmptyTaxCode { index });
            }
            if rule.rate < Decimal::ZERO || rule.rate >= Decimal::ONE {
                return Err(ConfigurationError::RateOutOfRange {
                    kind: "tax",
                    name: rule.code.clone(),
                    rate: rule.rate,
                });
            }
        }
        for (index, layer) in self.margin_layers.iter().enumerate() {
            if layer.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyLayerName { index });
            }
            if layer.rate < Decimal::ZERO || layer.rate >= Decimal::ONE {
                return Err(ConfigurationError::RateOutOfRange {
                    kind: "margin layer",
                    name: layer.name.clone(),
                    rate: layer.rate,
                });
            }
        }
        Ok(())
    }

    /// Ordered margin layer names, used for the output table schema.
    pub fn layer_names(&self) -> Vec<String> {
        self.margin_layers.iter().map(|l| l.name.clone()).collect()
    }
}

/// An internal invariant violated during derivation. Signals an upstream
/// engine defect; the run must abort rather than emit a silent zero record.
#[derive(Debug, Error, PartialEq)]
pub enum DataIntegrityError {
    /// Gross revenue came out non-positive for a record with real volume.
    #[error("non-positive gross revenue {gross} for {transaction_ref} with volume {volume}")]
    NonPositiveRevenue {
        transaction_ref: String,
        gross: Decimal,
        volume: f64,
    },
    /// The fact carried a non-finite volume.
    #[error("non-finite volume for {transaction_ref}")]
    NonFiniteVolume { transaction_ref: String },
}

/// Derived financial figures for one transaction fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    /// Back-reference to the source fact.
    pub transaction_ref: String,
    /// Volume times realized price.
    pub gross_revenue: Decimal,
    /// Tax amounts in application order, code -> amount.
    pub tax_detail: Vec<(String, Decimal)>,
    /// Sum of all tax amounts.
    pub tax_total: Decimal,
    /// Unit cost times volume.
    pub cost_of_goods: Decimal,
    /// Margin layer deductions in application order, name -> amount.
    pub margin_layers: Vec<(String, Decimal)>,
    /// Final remainder after taxes, cost of goods, and margin layers.
    pub net_margin: Decimal,
}

/// Derive the financial record for one fact.
///
/// Pure; no randomness, no side effects. The only failure modes are
/// integrity violations that indicate a defective upstream fact.
pub fn derive(
    fact: &TransactionFact,
    unit_cost: Decimal,
    rules: &FinancialRules,
) -> Result<FinancialRecord, DataIntegrityError> {
    let transaction_ref = fact.transaction_ref();
    let volume = Decimal::from_f64(fact.volume).ok_or_else(|| {
        DataIntegrityError::NonFiniteVolume {
            transaction_ref: transaction_ref.clone(),
        }
    })?;
    let gross_revenue = (fact.realized_price * volume).round_dp(4);
    if fact.volume > 0.0 && gross_revenue <= Decimal::ZERO {
        return Err(DataIntegrityError::NonPositiveRevenue {
            transaction_ref,
            gross: gross_revenue,
            volume: fact.volume,
        });
    }

    let mut tax_detail = Vec::with_capacity(rules.tax_rules.len());
    let mut tax_total = Decimal::ZERO;
    for rule in &rules.tax_rules {
        let base = match rule.base {
            TaxBase::Gross => gross_revenue,
            TaxBase::NetOfPriorTaxes => gross_revenue - tax_total,
        };
        let amount = (base * rule.rate).round_dp(4);
        tax_total += amount;
        tax_detail.push((rule.code.clone(), amount));
    }

    let cost_of_goods = (unit_cost * volume).round_dp(4);
    let mut remainder = gross_revenue - tax_total - cost_of_goods;
    let mut margin_layers = Vec::with_capacity(rules.margin_layers.len());
    for layer in &rules.margin_layers {
        let base = match layer.basis {
            LayerBasis::GrossRevenue => gross_revenue,
            LayerBasis::RunningRemainder => remainder,
        };
        let amount = (base * layer.rate).round_dp(4);
        remainder -= amount;
        margin_layers.push((layer.name.clone(), amount));
    }

    Ok(FinancialRecord {
        transaction_ref,
        gross_revenue,
        tax_detail,
        tax_total,
        cost_of_goods,
        margin_layers,
        net_margin: remainder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::{CustomerId, EventFlags, ProductId, RouteId};

    fn fact(volume: f64, realized_cents: i64) -> TransactionFact {
        TransactionFact {
            period: "2022-01".to_string(),
            product_id: ProductId("REF-CC-001".to_string()),
            route_id: RouteId("RUT-00001".to_string()),
            customer_id: CustomerId("CLI-000001".to_string()),
            volume,
            list_price: Decimal::new(9000, 2),
            realized_price: Decimal::new(realized_cents, 2),
            flags: EventFlags::none(),
        }
    }

    fn reconcile(r: &FinancialRecord) -> Decimal {
        let layers: Decimal = r.margin_layers.iter().map(|(_, a)| *a).sum();
        r.gross_revenue - r.tax_total - r.cost_of_goods - layers - r.net_margin
    }

    #[test]
    fn default_rules_validate() {
        FinancialRules::default().validate().unwrap();
    }

    #[test]
    fn known_example_compounds_in_order() {
        // 10 units at 90.00: gross 900, ISC 90, ITBIS 18% of 810 = 145.80.
        let r = derive(
            &fact(10.0, 9000),
            Decimal::new(1625, 2),
            &FinancialRules::default(),
        )
        .unwrap();
        assert_eq!(r.gross_revenue, Decimal::new(9000, 1));
        assert_eq!(r.tax_detail[0], ("ISC".to_string(), Decimal::new(90, 0)));
        assert_eq!(r.tax_detail[1], ("ITBIS".to_string(), Decimal::new(1458, 1)));
        assert_eq!(r.cost_of_goods, Decimal::new(1625, 1));
        assert_eq!(r.margin_layers[0].1, Decimal::new(72, 0));
        assert_eq!(reconcile(&r), Decimal::ZERO);
    }

    #[test]
    fn tax_order_changes_the_total() {
        let mut reversed = FinancialRules::default();
        reversed.tax_rules.reverse();
        let a = derive(&fact(10.0, 9000), Decimal::ZERO, &FinancialRules::default()).unwrap();
        let b = derive(&fact(10.0, 9000), Decimal::ZERO, &reversed).unwrap();
        assert_ne!(a.tax_total, b.tax_total);
    }

    #[test]
    fn zero_volume_record_is_all_zero() {
        let r = derive(
            &fact(0.0, 9000),
            Decimal::new(1625, 2),
            &FinancialRules::default(),
        )
        .unwrap();
        assert_eq!(r.gross_revenue, Decimal::ZERO);
        assert_eq!(r.tax_total, Decimal::ZERO);
        assert_eq!(r.net_margin, Decimal::ZERO);
    }

    #[test]
    fn non_positive_revenue_with_volume_is_an_integrity_error() {
        let mut bad = fact(5.0, 9000);
        bad.realized_price = Decimal::ZERO;
        let err = derive(&bad, Decimal::ZERO, &FinancialRules::default()).unwrap_err();
        assert!(matches!(
            err,
            DataIntegrityError::NonPositiveRevenue { volume, .. } if volume == 5.0
        ));
    }

    #[test]
    fn bad_rates_are_rejected() {
        let mut rules = FinancialRules::default();
        rules.tax_rules[0].rate = Decimal::new(15, 1); // 1.5
        assert!(matches!(
            rules.validate(),
            Err(ConfigurationError::RateOutOfRange { kind: "tax", .. })
        ));

        let mut rules = FinancialRules::default();
        rules.margin_layers[1].name = "  ".to_string();
        assert!(matches!(
            rules.validate(),
            Err(ConfigurationError::EmptyLayerName { index: 1 })
        ));
    }

    #[test]
    fn serde_roundtrip_rules() {
        let rules = FinancialRules::default();
        let s = serde_json::to_string(&rules).unwrap();
        let back: FinancialRules = serde_json::from_str(&s).unwrap();
        assert_eq!(back, rules);
    }

    proptest! {
        // Financial reconciliation: the identity holds for arbitrary
        // volumes and prices, well inside the 1e-6 tolerance.
        #[test]
        fn reconciliation_is_exact(
            volume in 0.01f64..2_000.0,
            price_cents in 1i64..500_000,
            cost_cents in 0i64..100_000,
        ) {
            let r = derive(
                &fact(volume, price_cents),
                Decimal::new(cost_cents, 2),
                &FinancialRules::default(),
            )
            .unwrap();
            let residue = reconcile(&r);
            prop_assert!(residue.abs() < Decimal::new(1, 6));
        }
    }
}
