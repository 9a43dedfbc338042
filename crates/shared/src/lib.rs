//! NDISLink shared types
//!
//! Types and helpers used by the API server, the billing crate and the worker.

pub mod db;
pub mod tier;

pub use db::{create_pool, run_migrations};
pub use tier::{ProviderTier, TierParseError};
