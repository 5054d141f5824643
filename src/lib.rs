//! Freightline — freight-listing extraction pipeline.
//!
//! Ingests free-text chat messages about freight loads, extracts structured
//! listings through remote AI providers (with credential caching, rotation,
//! and bounded rate-limit failover), validates locations against an
//! Argentina-only service area, persists accepted listings to a REST sink,
//! and keeps a per-sender trust score.

pub mod config;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod sink;
pub mod store;
pub mod worker;

pub use error::{Error, Result};
