#![deny(warnings)]

//! Risk and efficiency detectors: churn-risk scoring per customer and
//! out-of-stock concentration analysis per route.
//!
//! Both detectors consume aggregates accumulated during the period loop,
//! never the raw fact stream, so they stay within the one-period memory
//! bound. Scores are recomputed wholesale each run.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{ConfigurationError, CustomerId, RouteId};
use std::collections::BTreeMap;
use tracing::debug;

/// Kind of entity a signal points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A customer.
    Customer,
    /// A distribution route.
    Route,
}

impl EntityType {
    /// Column value for the output table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customer => "customer",
            EntityType::Route => "route",
        }
    }
}

/// Kind of detector that produced a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Customer likely to reduce or end purchasing.
    ChurnRisk,
    /// Route concentrating a disproportionate share of stockouts.
    OosConcentration,
}

impl SignalType {
    /// Column value for the output table.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::ChurnRisk => "churn_risk",
            SignalType::OosConcentration => "oos_concentration",
        }
    }
}

/// One prioritized action signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    /// Customer or route id.
    pub entity_id: String,
    /// Kind of entity.
    pub entity_type: EntityType,
    /// Detector that produced the signal.
    pub signal_type: SignalType,
    /// Score in [0, 1], higher is more urgent.
    pub score: f64,
    /// Named factor contributions; non-negative, sum to the score for
    /// churn signals.
    pub contributing_factors: BTreeMap<String, f64>,
    /// 1-based rank after deterministic ordering.
    pub priority_rank: u32,
}

/// Weighting policy for the churn factors. Policy, not algorithm: any
/// non-negative weights with a positive sum are valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnWeights {
    /// Weight of the declining-volume factor.
    pub volume_trend: f64,
    /// Weight of the rising-stockout-frequency factor.
    pub stockout_frequency: f64,
    /// Weight of the margin-per-unit erosion factor.
    pub margin_erosion: f64,
}

impl Default for ChurnWeights {
    fn default() -> Self {
        Self {
            volume_trend: 0.5,
            stockout_frequency: 0.3,
            margin_erosion: 0.2,
        }
    }
}

impl ChurnWeights {
    /// All weights non-negative, at least one positive.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (factor, weight) in [
            ("volume_trend", self.volume_trend),
            ("stockout_frequency", self.stockout_frequency),
            ("margin_erosion", self.margin_erosion),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigurationError::NegativeWeight { factor, weight });
            }
        }
        if self.volume_trend + self.stockout_frequency + self.margin_erosion <= 0.0 {
            return Err(ConfigurationError::ZeroWeightSum);
        }
        Ok(())
    }

    fn total(&self) -> f64 {
        self.volume_trend + self.stockout_frequency + self.margin_erosion
    }
}

/// OOS concentration threshold must be a share in (0, 1].
pub fn validate_oos_threshold(threshold: f64) -> Result<(), ConfigurationError> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        return Err(ConfigurationError::ThresholdOutOfRange(threshold));
    }
    Ok(())
}

/// Per-customer aggregates for one period, accumulated during generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerPeriodStats {
    /// Period position in the run calendar.
    pub period_index: u32,
    /// Units bought across all facts of the period.
    pub volume: f64,
    /// Stockout-flagged facts.
    pub stockout_events: u32,
    /// All facts.
    pub fact_count: u32,
    /// Net margin contributed.
    pub net_margin: Decimal,
}

#[derive(Default)]
struct WindowStats {
    volume: f64,
    stockouts: u32,
    facts: u32,
    net_margin: f64,
}

impl WindowStats {
    fn absorb(&mut self, s: &CustomerPeriodStats) {
        self.volume += s.volume;
        self.stockouts += s.stockout_events;
        self.facts += s.fact_count;
        self.net_margin += s.net_margin.to_f64().unwrap_or(0.0);
    }

    fn stockout_rate(&self) -> f64 {
        if self.facts == 0 {
            0.0
        } else {
            f64::from(self.stockouts) / f64::from(self.facts)
        }
    }

    fn margin_per_unit(&self) -> f64 {
        if self.volume > 0.0 {
            self.net_margin / self.volume
        } else {
            0.0
        }
    }
}

/// Score every customer for churn risk and rank the result.
///
/// The history is split into an earlier and a recent half at
/// `total_periods / 2`; each factor compares the halves and is clamped to
/// [0, 1], so the weighted score is monotone non-decreasing in every
/// factor. Ordering: score descending, ties by customer id ascending.
pub fn churn_signals(
    histories: &BTreeMap<CustomerId, Vec<CustomerPeriodStats>>,
    weights: &ChurnWeights,
    total_periods: u32,
) -> Vec<RiskSignal> {
    let split = total_periods / 2;
    let total_weight = weights.total();
    let mut signals: Vec<RiskSignal> = histories
        .iter()
        .map(|(customer, stats)| {
            let mut early = WindowStats::default();
            let mut recent = WindowStats::default();
            for s in stats {
                if s.period_index < split {
                    early.absorb(s);
                } else {
                    recent.absorb(s);
                }
            }

            let volume_trend = if early.volume > 0.0 {
                ((early.volume - recent.volume) / early.volume).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let stockout_rise =
                (recent.stockout_rate() - early.stockout_rate()).clamp(0.0, 1.0);
            let early_mpu = early.margin_per_unit();
            let margin_erosion = if early_mpu > 0.0 {
                ((early_mpu - recent.margin_per_unit()) / early_mpu).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let mut contributing_factors = BTreeMap::new();
            contributing_factors.insert(
                "volume_trend".to_string(),
                weights.volume_trend * volume_trend / total_weight,
            );
            contributing_factors.insert(
                "stockout_frequency".to_string(),
                weights.stockout_frequency * stockout_rise / total_weight,
            );
            contributing_factors.insert(
                "margin_erosion".to_string(),
                weights.margin_erosion * margin_erosion / total_weight,
            );
            let score: f64 = contributing_factors.values().sum();

            RiskSignal {
                entity_id: customer.0.clone(),
                entity_type: EntityType::Customer,
                signal_type: SignalType::ChurnRisk,
                score,
                contributing_factors,
                priority_rank: 0,
            }
        })
        .collect();

    signals.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    for (i, s) in signals.iter_mut().enumerate() {
        s.priority_rank = (i + 1) as u32;
    }
    debug!(customers = signals.len(), "churn scoring complete");
    signals
}

/// Flag the minimal set of routes whose cumulative stockout share reaches
/// the threshold.
///
/// Greedy cumulative-sum selection over routes sorted by share descending
/// (ties by route id ascending); not a combinatorial optimum by design.
/// No stockouts anywhere yields no signals.
pub fn oos_concentration(
    route_stockouts: &BTreeMap<RouteId, u64>,
    threshold: f64,
) -> Vec<RiskSignal> {
    let total: u64 = route_stockouts.values().sum();
    if total == 0 {
        return Vec::new();
    }

    let mut shares: Vec<(&RouteId, u64, f64)> = route_stockouts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(route, count)| (route, *count, *count as f64 / total as f64))
        .collect();
    shares.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(b.0)));

    let mut signals = Vec::new();
    let mut cumulative = 0.0;
    for (rank, (route, count, share)) in shares.into_iter().enumerate() {
        cumulative += share;
        let mut contributing_factors = BTreeMap::new();
        contributing_factors.insert("stockout_share".to_string(), share);
        contributing_factors.insert("cumulative_share".to_string(), cumulative);
        contributing_factors.insert("stockout_events".to_string(), count as f64);
        signals.push(RiskSignal {
            entity_id: route.0.clone(),
            entity_type: EntityType::Route,
            signal_type: SignalType::OosConcentration,
            score: share,
            contributing_factors,
            priority_rank: (rank + 1) as u32,
        });
        if cumulative >= threshold {
            break;
        }
    }
    debug!(flagged = signals.len(), "oos concentration complete");
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stats(period_index: u32, volume: f64, stockouts: u32, facts: u32, margin: i64) -> CustomerPeriodStats {
        CustomerPeriodStats {
            period_index,
            volume,
            stockout_events: stockouts,
            fact_count: facts,
            net_margin: Decimal::new(margin, 2),
        }
    }

    fn history(decline: f64) -> Vec<CustomerPeriodStats> {
        vec![
            stats(0, 100.0, 0, 10, 50_000),
            stats(1, 100.0, 0, 10, 50_000),
            stats(2, 100.0 * (1.0 - decline), 2, 10, 30_000),
            stats(3, 100.0 * (1.0 - decline), 2, 10, 30_000),
        ]
    }

    #[test]
    fn ranking_is_sorted_and_stable() {
        let mut histories = BTreeMap::new();
        histories.insert(CustomerId("CLI-000003".to_string()), history(0.5));
        histories.insert(CustomerId("CLI-000001".to_string()), history(0.2));
        histories.insert(CustomerId("CLI-000002".to_string()), history(0.5));

        let signals = churn_signals(&histories, &ChurnWeights::default(), 4);
        assert_eq!(signals.len(), 3);

        // Re-sorting by (score desc, id asc) must be a no-op.
        let mut resorted = signals.clone();
        resorted.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        assert_eq!(signals, resorted);

        // Equal-score tie broken by ascending customer id.
        assert_eq!(signals[0].entity_id, "CLI-000002");
        assert_eq!(signals[1].entity_id, "CLI-000003");
        assert_eq!(signals[2].entity_id, "CLI-000001");
        assert_eq!(
            signals.iter().map(|s| s.priority_rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn factors_sum_to_score_and_stay_in_range() {
        let mut histories = BTreeMap::new();
        histories.insert(CustomerId("CLI-000001".to_string()), history(0.8));
        let signals = churn_signals(&histories, &ChurnWeights::default(), 4);
        let s = &signals[0];
        assert!(s.score > 0.0 && s.score <= 1.0);
        let sum: f64 = s.contributing_factors.values().sum();
        assert!((sum - s.score).abs() < 1e-12);
        assert!(s.contributing_factors.values().all(|v| *v >= 0.0));
    }

    #[test]
    fn worsening_factors_never_lower_the_score() {
        let mut mild = BTreeMap::new();
        mild.insert(CustomerId("CLI-000001".to_string()), history(0.2));
        let mut severe = BTreeMap::new();
        severe.insert(CustomerId("CLI-000001".to_string()), history(0.7));

        let weights = ChurnWeights::default();
        let a = churn_signals(&mild, &weights, 4)[0].score;
        let b = churn_signals(&severe, &weights, 4)[0].score;
        assert!(b >= a);
    }

    #[test]
    fn weight_validation() {
        ChurnWeights::default().validate().unwrap();
        let w = ChurnWeights {
            volume_trend: -0.1,
            ..ChurnWeights::default()
        };
        assert!(matches!(
            w.validate(),
            Err(ConfigurationError::NegativeWeight {
                factor: "volume_trend",
                ..
            })
        ));
        let w = ChurnWeights {
            volume_trend: 0.0,
            stockout_frequency: 0.0,
            margin_erosion: 0.0,
        };
        assert_eq!(w.validate(), Err(ConfigurationError::ZeroWeightSum));
    }

    fn route_counts(counts: &[(&str, u64)]) -> BTreeMap<RouteId, u64> {
        counts
            .iter()
            .map(|(id, c)| (RouteId((*id).to_string()), *c))
            .collect()
    }

    #[test]
    fn oos_selection_is_minimal() {
        let routes = route_counts(&[
            ("RUT-00001", 50),
            ("RUT-00002", 30),
            ("RUT-00003", 10),
            ("RUT-00004", 10),
        ]);
        let threshold = 0.8;
        let signals = oos_concentration(&routes, threshold);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].entity_id, "RUT-00001");
        assert_eq!(signals[1].entity_id, "RUT-00002");

        // Flagged set reaches the threshold.
        let flagged: f64 = signals.iter().map(|s| s.score).sum();
        assert!(flagged >= threshold);

        // Removing the highest-share flagged route drops below threshold.
        let without_top: f64 = signals[1..].iter().map(|s| s.score).sum();
        assert!(without_top < threshold);
    }

    #[test]
    fn oos_ties_break_by_route_id() {
        let routes = route_counts(&[("RUT-00002", 10), ("RUT-00001", 10), ("RUT-00003", 10)]);
        let signals = oos_concentration(&routes, 1.0);
        let ids: Vec<&str> = signals.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["RUT-00001", "RUT-00002", "RUT-00003"]);
    }

    #[test]
    fn no_stockouts_no_signals() {
        let routes = route_counts(&[("RUT-00001", 0), ("RUT-00002", 0)]);
        assert!(oos_concentration(&routes, 0.8).is_empty());
    }

    #[test]
    fn threshold_validation() {
        validate_oos_threshold(0.8).unwrap();
        assert!(validate_oos_threshold(0.0).is_err());
        assert!(validate_oos_threshold(1.2).is_err());
    }

    proptest! {
        // The flagged set always reaches the threshold and the greedy
        // prefix is minimal with respect to its own largest element.
        #[test]
        fn oos_threshold_property(
            counts in proptest::collection::vec(0u64..100, 1..12),
            threshold in 0.05f64..1.0,
        ) {
            let routes: BTreeMap<RouteId, u64> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| (RouteId(format!("RUT-{:05}", i + 1)), *c))
                .collect();
            let total: u64 = counts.iter().sum();
            let signals = oos_concentration(&routes, threshold);
            if total == 0 {
                prop_assert!(signals.is_empty());
            } else {
                let flagged: f64 = signals.iter().map(|s| s.score).sum();
                prop_assert!(flagged >= threshold - 1e-12);
                let without_top: f64 = signals[1..].iter().map(|s| s.score).sum();
                prop_assert!(without_top < threshold);
            }
        }
    }
}
