#![deny(warnings)]

//! Forward projection: Monte Carlo resampling of historical period
//! aggregates into optimistic/pessimistic yearly scenario distributions.
//!
//! This is a pure resampling estimator over the simulated history, not a
//! forecast model with exogenous inputs. Both stances replay the same
//! per-path draws (common random numbers), and stance parameters are
//! validated to keep the optimistic path factor above the pessimistic one
//! across the whole shock clip range, which makes the goal-probability
//! ordering a structural guarantee.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{rng_for, ConfigurationError};
use thiserror::Error;
use tracing::{debug, info};

/// Projection stance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// Growth above one with tighter variance.
    Optimistic,
    /// Growth below one with wider variance.
    Pessimistic,
}

impl Stance {
    /// Column value for the output table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Optimistic => "optimistic",
            Stance::Pessimistic => "pessimistic",
        }
    }
}

/// Multipliers for one stance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StanceParams {
    /// Growth multiplier applied to every sampled aggregate.
    pub growth: f64,
    /// Standard deviation of the multiplicative noise.
    pub volatility: f64,
}

impl StanceParams {
    fn factor(&self, z: f64) -> f64 {
        self.growth * (1.0 + self.volatility * z)
    }
}

/// Projection configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionParams {
    /// Number of independent simulated yearly paths per stance.
    pub paths: usize,
    /// Cumulative net margin a path must reach to meet the goal.
    pub goal_target: Decimal,
    /// Clip bound for the standard-normal path noise.
    pub shock_clip: f64,
    /// Optimistic stance multipliers.
    pub optimistic: StanceParams,
    /// Pessimistic stance multipliers.
    pub pessimistic: StanceParams,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            paths: 2000,
            goal_target: Decimal::new(1_500_000, 0),
            shock_clip: 2.0,
            optimistic: StanceParams {
                growth: 1.10,
                volatility: 0.08,
            },
            pessimistic: StanceParams {
                growth: 0.90,
                volatility: 0.12,
            },
        }
    }
}

impl ProjectionParams {
    /// Validate path count, noise bounds, and stance ordering.
    ///
    /// The path factor `growth * (1 + volatility * z)` is linear in z, so
    /// checking dominance and positivity at both clip endpoints covers the
    /// whole range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.paths == 0 {
            return Err(ConfigurationError::NoProjectionPaths);
        }
        if !self.shock_clip.is_finite() || self.shock_clip <= 0.0 {
            return Err(ConfigurationError::InvalidRange {
                field: "projection.shock_clip",
                min: self.shock_clip,
                max: self.shock_clip,
            });
        }
        for (field, stance) in [
            ("optimistic", &self.optimistic),
            ("pessimistic", &self.pessimistic),
        ] {
            if !stance.growth.is_finite()
                || stance.growth <= 0.0
                || !stance.volatility.is_finite()
                || stance.volatility < 0.0
                || stance.factor(-self.shock_clip) < 0.0
            {
                return Err(ConfigurationError::InvalidRange {
                    field,
                    min: stance.growth,
                    max: stance.volatility,
                });
            }
        }
        for z in [-self.shock_clip, self.shock_clip] {
            let optimistic = self.optimistic.factor(z);
            let pessimistic = self.pessimistic.factor(z);
            if optimistic < pessimistic {
                return Err(ConfigurationError::StancesNotOrdered {
                    z,
                    optimistic,
                    pessimistic,
                });
            }
        }
        Ok(())
    }
}

/// Period-level aggregate of the simulated history, the projection input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    /// Period label, e.g. "2023-07".
    pub period: String,
    /// Calendar month, 1-12; resampling is month-matched.
    pub month: u32,
    /// Gross revenue of the period.
    pub gross_revenue: Decimal,
    /// Net margin of the period.
    pub net_margin: Decimal,
    /// Units sold in the period.
    pub volume: f64,
}

/// The projection received an empty history. Raised instead of reporting a
/// misleading all-zero distribution.
#[derive(Debug, Error, PartialEq)]
#[error("projection received no historical aggregates")]
pub struct InsufficientDataError;

/// Distribution summary for one stance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StanceSummary {
    /// Stance the summary describes.
    pub stance: Stance,
    /// Paths simulated.
    pub paths: usize,
    /// Goal the paths were measured against.
    pub goal_target: Decimal,
    /// Fraction of paths whose cumulative net margin met the goal.
    pub goal_probability: f64,
    /// Mean cumulative net margin across paths.
    pub mean_annual_net_margin: Decimal,
    /// 10th percentile of cumulative net margin.
    pub p10_annual_net_margin: Decimal,
    /// 90th percentile of cumulative net margin.
    pub p90_annual_net_margin: Decimal,
    /// Mean projected net margin per month, labeled "YYYY-MM".
    pub monthly_mean: Vec<(String, Decimal)>,
}

/// Both stance summaries for a projected year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionOutcome {
    /// Year the paths simulate.
    pub target_year: i32,
    /// Optimistic distribution summary.
    pub optimistic: StanceSummary,
    /// Pessimistic distribution summary.
    pub pessimistic: StanceSummary,
}

struct PathOutcome {
    optimistic_monthly: [f64; 12],
    pessimistic_monthly: [f64; 12],
}

/// Project one year forward from historical period aggregates.
///
/// Paths are independent trials fanned out over rayon workers; each path
/// draws from its own seed derived from the global seed and the path
/// index, so results do not depend on worker count or scheduling.
pub fn project(
    history: &[PeriodAggregate],
    params: &ProjectionParams,
    target_year: i32,
    seed: u64,
) -> Result<ProjectionOutcome, InsufficientDataError> {
    // Zero paths gives nothing to estimate from; validation rejects it up
    // front, but an unvalidated caller still gets a clean failure.
    if history.is_empty() || params.paths == 0 {
        return Err(InsufficientDataError);
    }

    // Month-matched sampling pools; months absent from the history fall
    // back to the full history.
    let all: Vec<f64> = history.iter().map(|a| decimal_to_f64(a.net_margin)).collect();
    let mut by_month: Vec<Vec<f64>> = vec![Vec::new(); 12];
    for a in history {
        if (1..=12).contains(&a.month) {
            by_month[(a.month - 1) as usize].push(decimal_to_f64(a.net_margin));
        }
    }
    let pools: Vec<&[f64]> = by_month
        .iter()
        .map(|p| if p.is_empty() { all.as_slice() } else { p.as_slice() })
        .collect();

    debug!(
        periods = history.len(),
        paths = params.paths,
        "sampling projection paths"
    );

    let normal = Normal::<f64>::new(0.0, 1.0).expect("unit normal is well-formed");
    let clip = params.shock_clip;
    let outcomes: Vec<PathOutcome> = (0..params.paths)
        .into_par_iter()
        .map(|path| {
            let path_label = path.to_string();
            let mut rng = rng_for(seed, &["projection", path_label.as_str()]);
            let mut optimistic_monthly = [0.0; 12];
            let mut pessimistic_monthly = [0.0; 12];
            for (m, pool) in pools.iter().enumerate() {
                // Common random numbers: both stances share the sampled
                // month and the shock draw.
                let sampled = pool[rng.gen_range(0..pool.len())];
                let z: f64 = normal.sample(&mut rng).clamp(-clip, clip);
                optimistic_monthly[m] = sampled * params.optimistic.factor(z);
                pessimistic_monthly[m] = sampled * params.pessimistic.factor(z);
            }
            PathOutcome {
                optimistic_monthly,
                pessimistic_monthly,
            }
        })
        .collect();

    let optimistic = summarize(
        Stance::Optimistic,
        &outcomes,
        |o| &o.optimistic_monthly,
        params,
        target_year,
    );
    let pessimistic = summarize(
        Stance::Pessimistic,
        &outcomes,
        |o| &o.pessimistic_monthly,
        params,
        target_year,
    );

    info!(
        target_year,
        optimistic_goal_probability = optimistic.goal_probability,
        pessimistic_goal_probability = pessimistic.goal_probability,
        "projection complete"
    );

    Ok(ProjectionOutcome {
        target_year,
        optimistic,
        pessimistic,
    })
}

fn summarize(
    stance: Stance,
    outcomes: &[PathOutcome],
    monthly: impl Fn(&PathOutcome) -> &[f64; 12],
    params: &ProjectionParams,
    target_year: i32,
) -> StanceSummary {
    let n = outcomes.len();
    let goal = decimal_to_f64(params.goal_target);

    let mut totals: Vec<f64> = outcomes
        .iter()
        .map(|o| monthly(o).iter().sum::<f64>())
        .collect();
    let met = totals.iter().filter(|t| **t >= goal).count();
    totals.sort_by(f64::total_cmp);

    let mean = totals.iter().sum::<f64>() / n as f64;
    let mut monthly_mean = Vec::with_capacity(12);
    for m in 0..12 {
        let avg = outcomes.iter().map(|o| monthly(o)[m]).sum::<f64>() / n as f64;
        monthly_mean.push((format!("{:04}-{:02}", target_year, m + 1), to_money(avg)));
    }

    StanceSummary {
        stance,
        paths: n,
        goal_target: params.goal_target,
        goal_probability: met as f64 / n as f64,
        mean_annual_net_margin: to_money(mean),
        p10_annual_net_margin: to_money(percentile(&totals, 0.10)),
        p90_annual_net_margin: to_money(percentile(&totals, 0.90)),
        monthly_mean,
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

fn to_money(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO).round_dp(4)
}
