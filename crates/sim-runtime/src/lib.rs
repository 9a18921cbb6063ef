#![deny(warnings)]

//! Simulation runtime: the stochastic fact engine and the full pipeline
//! orchestration for distsim.

pub mod engine;
pub mod pipeline;

pub use engine::{FactStream, PeriodBatch, SalesEngine};
pub use pipeline::{run, RunConfig, RunError, RunSummary};
