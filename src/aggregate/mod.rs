//! Multi-level aggregation of insights.
//!
//! Partitions insights by class, group and student identifier, and computes
//! per-entity sentiment distributions, score statistics, roll-up counts, an
//! attention flag and deterministic representative quotes.

mod aggregate;
pub mod types;
pub mod utility;

pub use aggregate::{aggregate, summarize_level};
pub use types::{
    AggregationOptions, Level, LevelSummaries, LevelSummary, RepresentativeQuote,
    SentimentDistribution, Totals,
};
