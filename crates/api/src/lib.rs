// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! NDISLink API Library
//!
//! HTTP surface of the billing core: authenticated checkout, portal and lead
//! unlock endpoints plus the Stripe webhook receiver.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::{cors_layer, create_router};
pub use state::AppState;
