#![deny(warnings)]

//! Out-of-core columnar writer for the four published table sets.
//!
//! Transactions and financial records are flushed one period partition at a
//! time (`<table>/period=YYYY-MM/part-000.parquet`), so peak memory stays
//! bounded by a single period regardless of how many years are configured.
//! Projection and risk tables are written once per run. All files are
//! zstd-compressed Parquet; money is `Decimal128(18,4)`, physical
//! quantities are `Float64`, event flags are boolean columns, and factor
//! maps are JSON-serialized strings.

use arrow::array::{
    ArrayRef, BooleanArray, Decimal128Array, Float64Array, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use sim_core::TransactionFact;
use sim_econ::FinancialRecord;
use sim_forecast::{ProjectionOutcome, StanceSummary};
use sim_risk::RiskSignal;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Precision of the money columns.
const MONEY_PRECISION: u8 = 18;
/// Scale of the money columns.
const MONEY_SCALE: i8 = 4;

/// Errors raised while persisting table sets.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Filesystem failure, annotated with the path involved.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Arrow array or batch construction failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    /// Parquet encoding failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    /// Contributing factor map could not be serialized.
    #[error("factor serialization error: {0}")]
    Factors(#[from] serde_json::Error),
}

/// Writer for all output table sets of one run.
pub struct TableStore {
    root: PathBuf,
    margin_layer_names: Vec<String>,
}

impl TableStore {
    /// Create the output directory tree for a run.
    ///
    /// `margin_layer_names` fixes the per-layer columns of the financial
    /// table for this run, in application order.
    pub fn create(
        root: impl AsRef<Path>,
        margin_layer_names: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let root = root.as_ref().to_path_buf();
        for table in [
            "facts_transactions",
            "facts_financial",
            "facts_projection_2026",
            "facts_risk_signals",
        ] {
            let dir = root.join(table);
            fs::create_dir_all(&dir).map_err(|source| PipelineError::Io { path: dir, source })?;
        }
        Ok(Self {
            root,
            margin_layer_names,
        })
    }

    /// Root directory of the table sets.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush one period partition of the transactions table.
    pub fn write_transactions(
        &self,
        period: &str,
        facts: &[TransactionFact],
    ) -> Result<PathBuf, PipelineError> {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("period", DataType::Utf8, false),
            Field::new("product_id", DataType::Utf8, false),
            Field::new("route_id", DataType::Utf8, false),
            Field::new("customer_id", DataType::Utf8, false),
            Field::new("volume", DataType::Float64, false),
            Field::new("list_price", money_type(), false),
            Field::new("realized_price", money_type(), false),
            Field::new("flag_stockout", DataType::Boolean, false),
            Field::new("flag_promo", DataType::Boolean, false),
            Field::new("flag_chaos", DataType::Boolean, false),
        ]));

        let columns: Vec<ArrayRef> = vec![
            utf8(facts.iter().map(|f| f.period.clone())),
            utf8(facts.iter().map(|f| f.product_id.0.clone())),
            utf8(facts.iter().map(|f| f.route_id.0.clone())),
            utf8(facts.iter().map(|f| f.customer_id.0.clone())),
            Arc::new(Float64Array::from_iter_values(
                facts.iter().map(|f| f.volume),
            )),
            money(facts.iter().map(|f| f.list_price))?,
            money(facts.iter().map(|f| f.realized_price))?,
            Arc::new(BooleanArray::from_iter(
                facts.iter().map(|f| Some(f.flags.stockout)),
            )),
            Arc::new(BooleanArray::from_iter(
                facts.iter().map(|f| Some(f.flags.promo)),
            )),
            Arc::new(BooleanArray::from_iter(
                facts.iter().map(|f| Some(f.flags.chaos)),
            )),
        ];

        self.write_partition("facts_transactions", Some(period), schema, columns)
    }

    /// Flush one period partition of the financial table.
    pub fn write_financial(
        &self,
        period: &str,
        records: &[FinancialRecord],
    ) -> Result<PathBuf, PipelineError> {
        let mut fields = vec![
            Field::new("transaction_ref", DataType::Utf8, false),
            Field::new("gross_revenue", money_type(), false),
            Field::new("tax_total", money_type(), false),
            Field::new("cost_of_goods", money_type(), false),
        ];
        for name in &self.margin_layer_names {
            fields.push(Field::new(format!("margin_{name}"), money_type(), false));
        }
        fields.push(Field::new("net_margin", money_type(), false));
        let schema: SchemaRef = Arc::new(Schema::new(fields));

        let mut columns: Vec<ArrayRef> = vec![
            utf8(records.iter().map(|r| r.transaction_ref.clone())),
            money(records.iter().map(|r| r.gross_revenue))?,
            money(records.iter().map(|r| r.tax_total))?,
            money(records.iter().map(|r| r.cost_of_goods))?,
        ];
        for i in 0..self.margin_layer_names.len() {
            columns.push(money(records.iter().map(|r| {
                r.margin_layers
                    .get(i)
                    .map(|(_, amount)| *amount)
                    .unwrap_or(Decimal::ZERO)
            }))?);
        }
        columns.push(money(records.iter().map(|r| r.net_margin))?);

        self.write_partition("facts_financial", Some(period), schema, columns)
    }

    /// Write the projection table for both stances.
    pub fn write_projection(&self, outcome: &ProjectionOutcome) -> Result<PathBuf, PipelineError> {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("stance", DataType::Utf8, false),
            Field::new("period", DataType::Utf8, false),
            Field::new("aggregate_metric", DataType::Utf8, false),
            Field::new("value", money_type(), false),
            Field::new("goal_probability", DataType::Float64, false),
        ]));

        let mut stances = Vec::new();
        let mut periods = Vec::new();
        let mut metrics = Vec::new();
        let mut values = Vec::new();
        let mut probabilities = Vec::new();
        for summary in [&outcome.optimistic, &outcome.pessimistic] {
            push_summary_rows(
                summary,
                outcome.target_year,
                &mut stances,
                &mut periods,
                &mut metrics,
                &mut values,
                &mut probabilities,
            );
        }

        let columns: Vec<ArrayRef> = vec![
            utf8(stances.into_iter()),
            utf8(periods.into_iter()),
            utf8(metrics.into_iter()),
            money(values.into_iter())?,
            Arc::new(Float64Array::from(probabilities)),
        ];
        self.write_partition("facts_projection_2026", None, schema, columns)
    }

    /// Write the risk signal table.
    pub fn write_risk_signals(&self, signals: &[RiskSignal]) -> Result<PathBuf, PipelineError> {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("entity_id", DataType::Utf8, false),
            Field::new("entity_type", DataType::Utf8, false),
            Field::new("signal_type", DataType::Utf8, false),
            Field::new("score", DataType::Float64, false),
            Field::new("priority_rank", DataType::UInt32, false),
            Field::new("contributing_factors", DataType::Utf8, false),
        ]));

        let mut factors = Vec::with_capacity(signals.len());
        for s in signals {
            factors.push(serde_json::to_string(&s.contributing_factors)?);
        }

        let columns: Vec<ArrayRef> = vec![
            utf8(signals.iter().map(|s| s.entity_id.clone())),
            utf8(signals.iter().map(|s| s.entity_type.as_str().to_string())),
            utf8(signals.iter().map(|s| s.signal_type.as_str().to_string())),
            Arc::new(Float64Array::from_iter_values(
                signals.iter().map(|s| s.score),
            )),
            Arc::new(UInt32Array::from_iter_values(
                signals.iter().map(|s| s.priority_rank),
            )),
            utf8(factors.into_iter()),
        ];
        self.write_partition("facts_risk_signals", None, schema, columns)
    }

    fn write_partition(
        &self,
        table: &str,
        period: Option<&str>,
        schema: SchemaRef,
        columns: Vec<ArrayRef>,
    ) -> Result<PathBuf, PipelineError> {
        let dir = match period {
            Some(p) => self.root.join(table).join(format!("period={p}")),
            None => self.root.join(table),
        };
        fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join("part-000.parquet");

        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        let file = File::create(&path).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        debug!(table, rows = batch.num_rows(), path = %path.display(), "partition flushed");
        Ok(path)
    }
}

fn money_type() -> DataType {
    DataType::Decimal128(MONEY_PRECISION, MONEY_SCALE)
}

/// Rescale a Decimal to the fixed output scale and take its mantissa.
fn money_to_i128(d: Decimal) -> i128 {
    let mut v = d.round_dp(MONEY_SCALE as u32);
    v.rescale(MONEY_SCALE as u32);
    v.mantissa()
}

fn money(values: impl Iterator<Item = Decimal>) -> Result<ArrayRef, PipelineError> {
    let array = Decimal128Array::from_iter_values(values.map(money_to_i128))
        .with_precision_and_scale(MONEY_PRECISION, MONEY_SCALE)?;
    Ok(Arc::new(array))
}

fn utf8(values: impl Iterator<Item = String>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn push_summary_rows(
    summary: &StanceSummary,
    target_year: i32,
    stances: &mut Vec<String>,
    periods: &mut Vec<String>,
    metrics: &mut Vec<String>,
    values: &mut Vec<Decimal>,
    probabilities: &mut Vec<f64>,
) {
    let stance = summary.stance.as_str().to_string();
    let year = format!("{target_year}");
    for (period, value) in &summary.monthly_mean {
        stances.push(stance.clone());
        periods.push(period.clone());
        metrics.push("net_margin_mean".to_string());
        values.push(*value);
        probabilities.push(summary.goal_probability);
    }
    for (metric, value) in [
        ("annual_net_margin_mean", summary.mean_annual_net_margin),
        ("annual_net_margin_p10", summary.p10_annual_net_margin),
        ("annual_net_margin_p90", summary.p90_annual_net_margin),
    ] {
        stances.push(stance.clone());
        periods.push(year.clone());
        metrics.push(metric.to_string());
        values.push(value);
        probabilities.push(summary.goal_probability);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use sim_core::{CustomerId, EventFlags, ProductId, RouteId};
    use sim_econ::FinancialRules;
    use sim_forecast::{PeriodAggregate, ProjectionParams};
    use std::collections::BTreeMap;

    fn facts() -> Vec<TransactionFact> {
        vec![
            TransactionFact {
                period: "2022-01".to_string(),
                product_id: ProductId("REF-CC-001".to_string()),
                route_id: RouteId("RUT-00001".to_string()),
                customer_id: CustomerId("CLI-000001".to_string()),
                volume: 12.0,
                list_price: Decimal::new(9000, 2),
                realized_price: Decimal::new(8700, 2),
                flags: EventFlags::none(),
            },
            TransactionFact {
                period: "2022-01".to_string(),
                product_id: ProductId("AGU-DS-001".to_string()),
                route_id: RouteId("RUT-00002".to_string()),
                customer_id: CustomerId("CLI-000002".to_string()),
                volume: 0.0,
                list_price: Decimal::new(5500, 2),
                realized_price: Decimal::new(5500, 2),
                flags: EventFlags {
                    stockout: true,
                    promo: false,
                    chaos: true,
                },
            },
        ]
    }

    fn records() -> Vec<FinancialRecord> {
        facts()
            .iter()
            .map(|f| sim_econ::derive(f, Decimal::new(1625, 2), &FinancialRules::default()).unwrap())
            .collect()
    }

    fn read_rows(path: &Path) -> usize {
        let file = File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        reader.map(|b| b.unwrap().num_rows()).sum()
    }

    #[test]
    fn transactions_partition_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::create(dir.path(), FinancialRules::default().layer_names()).unwrap();
        let path = store.write_transactions("2022-01", &facts()).unwrap();
        assert!(path.ends_with("facts_transactions/period=2022-01/part-000.parquet"));
        assert_eq!(read_rows(&path), 2);
    }

    #[test]
    fn financial_partition_has_layer_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::create(dir.path(), FinancialRules::default().layer_names()).unwrap();
        let path = store.write_financial("2022-01", &records()).unwrap();
        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        let names: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert!(names.contains(&"margin_logistics".to_string()));
        assert!(names.contains(&"margin_trade_discount".to_string()));
        assert!(names.contains(&"margin_channel_rebate".to_string()));
        assert!(names.contains(&"net_margin".to_string()));
        assert_eq!(read_rows(&path), 2);
    }

    #[test]
    fn projection_and_risk_tables_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::create(dir.path(), vec![]).unwrap();

        let history: Vec<PeriodAggregate> = (1..=12u32)
            .map(|m| PeriodAggregate {
                period: format!("2022-{m:02}"),
                month: m,
                gross_revenue: Decimal::new(400_000, 0),
                net_margin: Decimal::new(100_000, 0),
                volume: 1_000.0,
            })
            .collect();
        let params = ProjectionParams {
            paths: 20,
            ..ProjectionParams::default()
        };
        let outcome = sim_forecast::project(&history, &params, 2026, 420).unwrap();
        let path = store.write_projection(&outcome).unwrap();
        // 12 monthly rows + 3 annual rows per stance.
        assert_eq!(read_rows(&path), 30);

        let signals = vec![RiskSignal {
            entity_id: "CLI-000001".to_string(),
            entity_type: sim_risk::EntityType::Customer,
            signal_type: sim_risk::SignalType::ChurnRisk,
            score: 0.42,
            contributing_factors: BTreeMap::from([("volume_trend".to_string(), 0.42)]),
            priority_rank: 1,
        }];
        let path = store.write_risk_signals(&signals).unwrap();
        assert_eq!(read_rows(&path), 1);
    }

    #[test]
    fn identical_inputs_write_identical_bytes() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let layers = FinancialRules::default().layer_names();
        let store_a = TableStore::create(dir_a.path(), layers.clone()).unwrap();
        let store_b = TableStore::create(dir_b.path(), layers).unwrap();
        let pa = store_a.write_transactions("2022-01", &facts()).unwrap();
        let pb = store_b.write_transactions("2022-01", &facts()).unwrap();
        assert_eq!(fs::read(pa).unwrap(), fs::read(pb).unwrap());
    }

    #[test]
    fn empty_partition_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::create(dir.path(), vec![]).unwrap();
        let path = store.write_transactions("2022-02", &[]).unwrap();
        assert_eq!(read_rows(&path), 0);
    }
}
