//! Student-feedback insight pipeline.
//!
//! CSV exports are loaded ([`loader`]), cleaned ([`preprocess`]), sent one
//! comment at a time to an LLM ([`insight`]) and folded into class, group
//! and student summaries ([`aggregate`]). [`pipeline`] wires the stages
//! together and [`report`] persists the result.

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod insight;
pub mod loader;
pub mod pipeline;
pub mod preprocess;
pub mod record;
pub mod report;
