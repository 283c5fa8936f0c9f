//! Token price tracking pipeline built on the DexScreener public API.
//!
//! The crate is organized around a small set of cooperating services:
//! - `pipeline::selector` decides which tokens are due for a refresh
//! - `pipeline::fetcher` pulls batched pair data and stages raw payloads
//! - `pipeline::processor` turns staged payloads into price metric rows
//! - `pipeline::failures` drives the failure/recovery state machine
//! - `pipeline::classifier` re-tiers tokens by liquidity and market cap
//! - `pipeline::recovery` sweeps dead and inactive tokens back to life
//! - `pipeline::stats` keeps cycle history and per-chain API counters
//!
//! Storage is SQLite behind a small hand-rolled connection pool, see
//! `database::pool`.

pub mod api;
pub mod database;
pub mod errors;
pub mod global;
pub mod logger;
pub mod paths;
pub mod pipeline;
pub mod types;
