//! Full run orchestration: catalog, per-period generate/derive/flush,
//! projection, detectors, and the KPI summary.
//!
//! The loop holds one period in memory at a time; projection and the
//! detectors consume aggregates accumulated along the way, never the raw
//! fact set. Configuration and integrity errors abort the whole run; an
//! insufficient-data failure in the projection skips that table only and
//! leaves the already-written simulation and financial outputs valid.

use crate::engine::SalesEngine;
use data_pipeline::{PipelineError, TableStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{
    catalog, Catalog, CatalogParams, ConfigurationError, CustomerId, RouteId, SimulationParams,
};
use sim_econ::{DataIntegrityError, FinancialRules};
use sim_forecast::{InsufficientDataError, PeriodAggregate, ProjectionParams};
use sim_risk::{ChurnWeights, CustomerPeriodStats, RiskSignal};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Complete configuration surface of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Global seed; identical (config, seed) pairs reproduce byte-identical
    /// output tables.
    pub global_seed: u64,
    /// Root directory for the output table sets.
    pub output_dir: PathBuf,
    /// Catalog sizing.
    pub catalog: CatalogParams,
    /// Engine knobs.
    pub simulation: SimulationParams,
    /// Ordered tax and margin rules.
    pub finance: FinancialRules,
    /// Projection configuration.
    pub projection: ProjectionParams,
    /// Churn factor weighting policy.
    pub churn_weights: ChurnWeights,
    /// Cumulative stockout share at which route flagging stops.
    pub oos_concentration_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            global_seed: 420,
            output_dir: PathBuf::from("output"),
            catalog: CatalogParams::default(),
            simulation: SimulationParams {
                elasticity: catalog::default_elasticity(),
                ..SimulationParams::default()
            },
            finance: FinancialRules::default(),
            projection: ProjectionParams::default(),
            churn_weights: ChurnWeights::default(),
            oos_concentration_threshold: 0.8,
        }
    }
}

/// A failure that aborts the run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid configuration, detected before generation.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// Derivation invariant violated; upstream engine defect.
    #[error("data integrity error: {0}")]
    Integrity(#[from] DataIntegrityError),
    /// Output table could not be written.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// End-of-run KPI snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    /// Periods generated.
    pub periods: usize,
    /// Transaction facts written across all periods.
    pub facts: u64,
    /// Total gross revenue.
    pub gross_revenue: Decimal,
    /// Total net margin.
    pub net_margin: Decimal,
    /// Goal probabilities (optimistic, pessimistic); absent when the
    /// projection was skipped for lack of data.
    pub goal_probability: Option<(f64, f64)>,
    /// Customers scored for churn.
    pub churn_signals: usize,
    /// Routes flagged for stockout concentration.
    pub oos_flagged: usize,
    /// Where the table sets were written.
    pub output_dir: PathBuf,
}

/// Execute one full run: validate, generate, derive, flush, project,
/// detect. Idempotent for a given (config, seed).
pub fn run(config: &RunConfig) -> Result<RunSummary, RunError> {
    let seed = config.global_seed;
    let catalog = Catalog::generate(&config.catalog, config.simulation.years, seed)?;

    // Fail fast on every configuration surface before any output exists.
    config.simulation.validate(&catalog)?;
    config.finance.validate()?;
    config.projection.validate()?;
    config.churn_weights.validate()?;
    sim_risk::validate_oos_threshold(config.oos_concentration_threshold)?;

    let engine = SalesEngine::new(&catalog, &config.simulation, seed)?;
    let store = TableStore::create(&config.output_dir, config.finance.layer_names())?;
    info!(
        seed,
        years = config.simulation.years,
        customers = catalog.customers.len(),
        routes = catalog.routes.len(),
        output = %config.output_dir.display(),
        "run started"
    );

    let mut facts_total: u64 = 0;
    let mut gross_total = Decimal::ZERO;
    let mut net_total = Decimal::ZERO;
    let mut period_aggregates: Vec<PeriodAggregate> = Vec::new();
    let mut customer_histories: BTreeMap<CustomerId, Vec<CustomerPeriodStats>> = BTreeMap::new();
    let mut route_stockouts: BTreeMap<RouteId, u64> = BTreeMap::new();
    for route in &catalog.routes {
        route_stockouts.insert(route.id.clone(), 0);
    }

    for batch in engine.stream() {
        let label = batch.period.label();

        let mut records = Vec::with_capacity(batch.facts.len());
        for fact in &batch.facts {
            let unit_cost = catalog
                .product(&fact.product_id)
                .map(|p| p.unit_cost)
                .unwrap_or(Decimal::ZERO);
            records.push(sim_econ::derive(fact, unit_cost, &config.finance)?);
        }

        store.write_transactions(&label, &batch.facts)?;
        store.write_financial(&label, &records)?;

        let mut period_gross = Decimal::ZERO;
        let mut period_net = Decimal::ZERO;
        let mut period_volume = 0.0;
        let mut per_customer: BTreeMap<CustomerId, CustomerPeriodStats> = BTreeMap::new();
        for (fact, record) in batch.facts.iter().zip(&records) {
            period_gross += record.gross_revenue;
            period_net += record.net_margin;
            period_volume += fact.volume;

            let stats = per_customer
                .entry(fact.customer_id.clone())
                .or_insert_with(|| CustomerPeriodStats {
                    period_index: batch.period.index,
                    ..CustomerPeriodStats::default()
                });
            stats.volume += fact.volume;
            stats.fact_count += 1;
            stats.net_margin += record.net_margin;
            if fact.flags.stockout {
                stats.stockout_events += 1;
                *route_stockouts.entry(fact.route_id.clone()).or_insert(0) += 1;
            }
        }
        for (customer, stats) in per_customer {
            customer_histories.entry(customer).or_default().push(stats);
        }

        facts_total += batch.facts.len() as u64;
        gross_total += period_gross;
        net_total += period_net;
        period_aggregates.push(PeriodAggregate {
            period: label,
            month: batch.period.month,
            gross_revenue: period_gross,
            net_margin: period_net,
            volume: period_volume,
        });
    }
    info!(
        facts = facts_total,
        periods = period_aggregates.len(),
        %gross_total,
        "generation and derivation complete"
    );

    // Projection failures for lack of data skip only this module; the
    // simulation and financial tables above stay valid.
    let target_year = catalog.final_year() + 1;
    let goal_probability =
        match sim_forecast::project(&period_aggregates, &config.projection, target_year, seed) {
            Ok(outcome) => {
                store.write_projection(&outcome)?;
                Some((
                    outcome.optimistic.goal_probability,
                    outcome.pessimistic.goal_probability,
                ))
            }
            Err(InsufficientDataError) => {
                warn!("projection skipped: no historical aggregates");
                None
            }
        };

    let total_periods = catalog.periods.len() as u32;
    let churn = sim_risk::churn_signals(&customer_histories, &config.churn_weights, total_periods);
    let oos = sim_risk::oos_concentration(&route_stockouts, config.oos_concentration_threshold);
    let mut signals: Vec<RiskSignal> = churn;
    let churn_count = signals.len();
    let oos_count = oos.len();
    signals.extend(oos);
    store.write_risk_signals(&signals)?;

    let summary = RunSummary {
        periods: period_aggregates.len(),
        facts: facts_total,
        gross_revenue: gross_total.round_dp(2),
        net_margin: net_total.round_dp(2),
        goal_probability,
        churn_signals: churn_count,
        oos_flagged: oos_count,
        output_dir: config.output_dir.clone(),
    };
    info!(
        facts = summary.facts,
        churn = summary.churn_signals,
        oos = summary.oos_flagged,
        "run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dir: &std::path::Path) -> RunConfig {
        let mut config = RunConfig::default();
        config.output_dir = dir.to_path_buf();
        config.catalog.customers = 15;
        config.catalog.routes = 4;
        config.simulation.years = 1;
        config.projection.paths = 50;
        config.projection.goal_target = Decimal::new(100_000, 0);
        config
    }

    #[test]
    fn run_produces_all_table_sets() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&small_config(dir.path())).unwrap();
        assert_eq!(summary.periods, 12);
        assert!(summary.facts > 0);
        assert!(summary.goal_probability.is_some());
        assert_eq!(summary.churn_signals, 15);
        for table in [
            "facts_transactions/period=2022-01/part-000.parquet",
            "facts_financial/period=2022-12/part-000.parquet",
            "facts_projection_2026/part-000.parquet",
            "facts_risk_signals/part-000.parquet",
        ] {
            assert!(dir.path().join(table).exists(), "missing {table}");
        }
    }

    #[test]
    fn invalid_config_aborts_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.oos_concentration_threshold = 1.5;
        let err = run(&config).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
        assert!(!dir.path().join("facts_transactions").exists());
    }

    #[test]
    fn summary_revenue_reconciles_with_margin() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&small_config(dir.path())).unwrap();
        assert!(summary.gross_revenue > Decimal::ZERO);
        assert!(summary.net_margin < summary.gross_revenue);
    }
}
