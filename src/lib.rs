//! Veitider - road-stretch travel-time aggregation service
//!
//! Polls the road authority's DATEX II travel-time feed, aggregates
//! per-segment measurements into named road stretches, and serves the result
//! over HTTP with staleness-aware caching.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod datex;
pub mod fetch;
pub mod freshness;
pub mod mirror;
pub mod pipeline;
pub mod server;
pub mod stretch;
